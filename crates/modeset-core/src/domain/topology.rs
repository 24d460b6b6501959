//! Topology snapshot: controllers, encoders, connectors and modes.
//!
//! A [`TopologySnapshot`] is an arena.  Controllers, encoders and connectors
//! live in plain `Vec`s and refer to each other by *local index* (position in
//! those vectors), never by pointer.  That lets the whole snapshot be dropped
//! as one unit and replaced wholesale whenever the hardware is re-read.
//!
//! Snapshots are built by [`crate::domain::inventory::build_topology`] and
//! mutated in place only by the apply pass in [`crate::domain::apply`].
//!
//! # Vocabulary (for beginners)
//!
//! ```text
//!   Controller (CRTC) ──► Encoder ──► Connector ──► monitor
//!   scans out pixels      converts     physical
//!   at one timing         signal       port
//! ```
//!
//! One controller may feed several connectors at once ("clones"), but every
//! connector is fed by at most one controller.

use serde::Serialize;
use thiserror::Error;

use crate::domain::mask::IndexMask;
use crate::domain::mode::{Mode, ModeId, ModePool};
use crate::domain::transform::MonitorTransform;
use crate::driver::descriptors::{ConnectorKind, EdidRecord};

/// An axis-aligned rectangle in virtual screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const EMPTY: Rect = Rect { x: 0, y: 0, width: 0, height: 0 };

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rightmost X coordinate (exclusive), clamped to `i32::MAX`.
    pub fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }

    /// Bottommost Y coordinate (exclusive), clamped to `i32::MAX`.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }
}

/// Size of the virtual screen spanned by all enabled controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// A display controller (CRTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Controller {
    /// Driver object id.
    pub id: u32,
    /// Area of the virtual screen this controller scans out; empty when off.
    pub rect: Rect,
    pub mode: Option<ModeId>,
    pub transform: MonitorTransform,
    /// Entries per channel in the gamma LUT, `0` if the driver has none.
    pub gamma_size: u32,
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Controller {
    pub fn is_enabled(&self) -> bool {
        self.mode.is_some()
    }
}

/// A signal encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Encoder {
    /// Driver object id.
    pub id: u32,
    /// Local controller indices this encoder can be driven by.
    pub possible_controllers: IndexMask,
    /// Local encoder indices this encoder may share a controller with.
    pub possible_clones: IndexMask,
    /// Local index of the controller currently driving this encoder.
    pub controller: Option<usize>,
}

/// A connected output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connector {
    /// Driver object id.
    pub id: u32,
    /// Human-readable name such as `"HDMI-1"`.
    pub name: String,
    pub kind: ConnectorKind,
    pub kind_id: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub modes: Vec<ModeId>,
    pub preferred_mode: Option<ModeId>,
    /// Local index of the controller driving this connector.
    pub controller: Option<usize>,
    pub is_primary: bool,
    pub is_presentation: bool,
    /// Local encoder indices this connector can be routed through.
    pub encoders: Vec<usize>,
    /// Local index of the encoder currently routing this connector.
    pub current_encoder: Option<usize>,
    /// Union of `possible_controllers` over this connector's encoders.
    pub reachable_controllers: IndexMask,
    /// Intersection of `possible_clones` over this connector's encoders.
    pub clone_equivalence_mask: IndexMask,
    /// Which local encoders belong to this connector.
    pub encoder_identity_mask: IndexMask,
    /// Local indices of connectors this one may legally share a controller with.
    pub clones: Vec<usize>,
    pub edid: Option<EdidRecord>,
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Connector {
    /// Returns `true` if `controller` (a local index) can drive this connector.
    pub fn can_use_controller(&self, controller: usize) -> bool {
        self.reachable_controllers.contains(controller)
    }

    /// Returns `true` if `other` (a local connector index) is in this connector's clone list.
    pub fn can_clone_with(&self, other: usize) -> bool {
        self.clones.contains(&other)
    }
}

/// A set of connectors that may all be driven by one controller together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneGroup {
    /// Local connector indices, ascending.
    pub connectors: Vec<usize>,
}

/// A driver entry that could not be fully resolved while building the topology.
///
/// These are recorded, logged and skipped; the rest of the topology is still
/// built around them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum InventoryIssue {
    #[error("duplicate CRTC id {id}; later entry ignored")]
    DuplicateController { id: u32 },

    #[error("duplicate encoder id {id}; later entry ignored")]
    DuplicateEncoder { id: u32 },

    #[error("duplicate connector id {id}; later entry ignored")]
    DuplicateConnector { id: u32 },

    #[error("encoder {encoder} reports unknown CRTC {crtc} as active")]
    DanglingEncoderController { encoder: u32, crtc: u32 },

    #[error("connector {connector} references unknown encoder {encoder}")]
    DanglingConnectorEncoder { connector: u32, encoder: u32 },

    #[error("connector {connector} is driven by CRTC {crtc}, which none of its encoders can reach; left unbound")]
    UnreachableBinding { connector: u32, crtc: u32 },

    #[error("encoder {encoder} capability mask names resource position {position}, which does not exist")]
    MaskPositionOutOfRange { encoder: u32, position: usize },

    #[error("{count} {kind} exceed the {max} that fit in a capability mask; extras cannot be referenced")]
    TooManyResources { kind: &'static str, count: usize, max: usize },
}

/// Immutable-by-default view of the display hardware.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub(crate) controllers: Vec<Controller>,
    pub(crate) encoders: Vec<Encoder>,
    pub(crate) connectors: Vec<Connector>,
    pub(crate) modes: ModePool,
    pub(crate) clone_groups: Vec<CloneGroup>,
    pub(crate) screen_size: ScreenSize,
    pub(crate) issues: Vec<InventoryIssue>,
    /// Set when a commit failed after staging; nothing in the snapshot can be
    /// trusted until the hardware is read again.
    pub(crate) stale: bool,
}

impl TopologySnapshot {
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    /// Connectors in stable name order.
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn modes(&self) -> &ModePool {
        &self.modes
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.get(id)
    }

    pub fn clone_groups(&self) -> &[CloneGroup] {
        &self.clone_groups
    }

    pub fn screen_size(&self) -> ScreenSize {
        self.screen_size
    }

    /// Driver entries skipped or left unbound while building this snapshot.
    pub fn issues(&self) -> &[InventoryIssue] {
        &self.issues
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Local index of the controller with driver id `id`.
    pub fn controller_index(&self, id: u32) -> Option<usize> {
        self.controllers.iter().position(|c| c.id == id)
    }

    pub fn controller_by_id(&self, id: u32) -> Option<&Controller> {
        self.controllers.iter().find(|c| c.id == id)
    }

    /// Local index of the connector with driver id `id`.
    pub fn connector_index(&self, id: u32) -> Option<usize> {
        self.connectors.iter().position(|c| c.id == id)
    }

    pub fn connector_by_id(&self, id: u32) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    pub fn connector_by_name(&self, name: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.name == name)
    }

    /// Connectors currently bound to the controller at local index `controller`.
    pub fn connectors_on(&self, controller: usize) -> impl Iterator<Item = &Connector> {
        self.connectors
            .iter()
            .filter(move |c| c.controller == Some(controller))
    }

    /// Bounding box of every enabled controller, anchored at the origin.
    pub(crate) fn compute_screen_size(&self) -> ScreenSize {
        self.controllers
            .iter()
            .filter(|c| c.is_enabled() && !c.rect.is_empty())
            .fold(ScreenSize::default(), |size, c| ScreenSize {
                width: size.width.max(c.rect.right().max(0) as u32),
                height: size.height.max(c.rect.bottom().max(0) as u32),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_right_and_bottom_are_exclusive_edges() {
        let r = Rect { x: 1920, y: 0, width: 2560, height: 1440 };
        assert_eq!(r.right(), 4480);
        assert_eq!(r.bottom(), 1440);
    }

    #[test]
    fn test_rect_edges_saturate_instead_of_overflowing() {
        let r = Rect { x: i32::MAX - 100, y: -50, width: 1920, height: u32::MAX };
        assert_eq!(r.right(), i32::MAX);
        assert_eq!(r.bottom(), i32::MAX);
    }

    #[test]
    fn test_rect_with_zero_dimension_is_empty() {
        assert!(Rect::EMPTY.is_empty());
        assert!(Rect { x: 10, y: 10, width: 0, height: 5 }.is_empty());
        assert!(!Rect { x: 0, y: 0, width: 1, height: 1 }.is_empty());
    }

    #[test]
    fn test_inventory_issue_messages_name_the_entity() {
        let issue = InventoryIssue::DanglingConnectorEncoder { connector: 60, encoder: 99 };
        assert_eq!(issue.to_string(), "connector 60 references unknown encoder 99");
    }
}
