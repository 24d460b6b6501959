//! Resource inventory: turns raw driver descriptors into a [`TopologySnapshot`].
//!
//! # Build steps
//!
//! 1. Intern every supported mode into one [`ModePool`] keyed by timing bytes.
//! 2. Materialise one [`Controller`] per driver CRTC, resolving its current
//!    timing against the pool.
//! 3. Materialise one [`Encoder`] per driver encoder, translating its
//!    capability masks from driver resource positions to local indices.
//! 4. Materialise a [`Connector`] for each *connected* driver connector.
//! 5. Sort connectors by name so configuration tools see a stable order.
//! 6. Restore each connector's current controller through its active encoder.
//!
//! Then the compatibility masks, clone lists and clone groups are derived.
//!
//! # Why mask translation matters (for beginners)
//!
//! The driver says "encoder E can be driven by CRTCs `0b0100`".  Bit 2 there
//! means "the third CRTC *in the driver's list*", not "CRTC id 2" and not
//! necessarily "the third controller in our array" (duplicates are dropped,
//! so positions can shift).  Every bit is looked up through a
//! position → local-index table instead of being copied verbatim.
//!
//! Malformed input (duplicate ids, references to ids that do not exist) never
//! aborts the build: the affected entry is skipped or left unbound and an
//! [`InventoryIssue`] is recorded.  A partial topology beats no topology.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::domain::clone_groups::{resolve_clone_groups, resolve_clone_lists};
use crate::domain::compat::connector_compatibility;
use crate::domain::mask::{IndexMask, MAX_MASK_INDEX};
use crate::domain::mode::{ModeId, ModePool};
use crate::domain::topology::{
    Connector, Controller, Encoder, InventoryIssue, Rect, TopologySnapshot,
};
use crate::driver::descriptors::{ConnectionState, DriverResources};

/// Builds a fresh topology snapshot from a driver inventory.
pub fn build_topology(res: &DriverResources) -> TopologySnapshot {
    let mut issues = Vec::new();

    // Step 1: mode pool
    let mut modes = ModePool::new();
    for connector in &res.connectors {
        for raw in &connector.modes {
            modes.intern(raw);
        }
    }

    // Step 2: controllers
    let (controllers, crtc_slots) = build_controllers(res, &mut modes, &mut issues);
    let controller_by_id: HashMap<u32, usize> = controllers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id, i))
        .collect();

    // Step 3: encoders
    let encoder_slots = dedup_slots(
        res.encoders.iter().map(|e| e.id),
        |id| InventoryIssue::DuplicateEncoder { id },
        &mut issues,
    );
    if encoder_slots.iter().flatten().count() > MAX_MASK_INDEX {
        issues.push(InventoryIssue::TooManyResources {
            kind: "encoders",
            count: encoder_slots.iter().flatten().count(),
            max: MAX_MASK_INDEX,
        });
    }
    let mut encoders = Vec::with_capacity(res.encoders.len());
    for (position, desc) in res.encoders.iter().enumerate() {
        if encoder_slots[position].is_none() {
            continue;
        }
        let possible_controllers =
            translate_mask(desc.id, desc.possible_crtcs, &crtc_slots, &mut issues);
        let possible_clones =
            translate_mask(desc.id, desc.possible_clones, &encoder_slots, &mut issues);
        let controller = desc.crtc_id.and_then(|crtc| {
            let found = controller_by_id.get(&crtc).copied();
            if found.is_none() {
                issues.push(InventoryIssue::DanglingEncoderController { encoder: desc.id, crtc });
            }
            found
        });
        encoders.push(Encoder {
            id: desc.id,
            possible_controllers,
            possible_clones,
            controller,
        });
    }
    let encoder_by_id: HashMap<u32, usize> = encoders
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id, i))
        .collect();

    // Step 4: connected connectors
    let mut connectors = Vec::new();
    let mut seen_connectors = HashSet::new();
    for desc in &res.connectors {
        if desc.connection != ConnectionState::Connected {
            continue;
        }
        if !seen_connectors.insert(desc.id) {
            issues.push(InventoryIssue::DuplicateConnector { id: desc.id });
            continue;
        }

        let mode_ids: Vec<ModeId> = desc.modes.iter().map(|raw| modes.intern(raw)).collect();
        let preferred_mode = desc
            .modes
            .iter()
            .zip(&mode_ids)
            .find(|(raw, _)| raw.preferred)
            .map(|(_, id)| *id)
            .or_else(|| mode_ids.first().copied());

        let mut resolve_encoder = |encoder: u32| {
            let found = encoder_by_id.get(&encoder).copied();
            if found.is_none() {
                issues.push(InventoryIssue::DanglingConnectorEncoder {
                    connector: desc.id,
                    encoder,
                });
            }
            found
        };
        let encoder_indices: Vec<usize> = desc
            .encoder_ids
            .iter()
            .filter_map(|&e| resolve_encoder(e))
            .collect();
        let current_encoder = desc.current_encoder_id.and_then(&mut resolve_encoder);

        connectors.push(Connector {
            id: desc.id,
            name: format!("{}-{}", desc.kind.as_str(), desc.kind_id),
            kind: desc.kind,
            kind_id: desc.kind_id,
            width_mm: desc.width_mm,
            height_mm: desc.height_mm,
            modes: mode_ids,
            preferred_mode,
            controller: None,
            is_primary: false,
            is_presentation: false,
            encoders: encoder_indices,
            current_encoder,
            reachable_controllers: IndexMask::EMPTY,
            clone_equivalence_mask: IndexMask::EMPTY,
            encoder_identity_mask: IndexMask::EMPTY,
            clones: Vec::new(),
            edid: desc.edid.clone(),
            dirty: false,
        });
    }

    // Step 5: stable order
    connectors.sort_by(|a, b| {
        (a.kind.as_str(), a.kind_id, a.id).cmp(&(b.kind.as_str(), b.kind_id, b.id))
    });

    // Compatibility masks
    let compat: Vec<_> = connectors
        .iter()
        .map(|c| connector_compatibility(&c.encoders, &encoders))
        .collect();
    for (connector, masks) in connectors.iter_mut().zip(&compat) {
        connector.reachable_controllers = masks.reachable_controllers;
        connector.clone_equivalence_mask = masks.clone_equivalence_mask;
        connector.encoder_identity_mask = masks.encoder_identity_mask;
    }

    // Step 6: current bindings
    for connector in &mut connectors {
        let Some(controller) = connector
            .current_encoder
            .and_then(|e| encoders[e].controller)
        else {
            continue;
        };
        if connector.can_use_controller(controller) {
            connector.controller = Some(controller);
        } else {
            issues.push(InventoryIssue::UnreachableBinding {
                connector: connector.id,
                crtc: controllers[controller].id,
            });
        }
    }

    // Clone lists and groups
    let clone_lists = resolve_clone_lists(&compat);
    let clone_groups = resolve_clone_groups(&clone_lists);
    for (connector, clones) in connectors.iter_mut().zip(clone_lists) {
        connector.clones = clones;
    }

    for issue in &issues {
        warn!("display inventory: {issue}");
    }

    let mut snapshot = TopologySnapshot {
        controllers,
        encoders,
        connectors,
        modes,
        clone_groups,
        screen_size: Default::default(),
        issues,
        stale: false,
    };
    snapshot.screen_size = snapshot.compute_screen_size();

    debug!(
        "built topology: {} controllers, {} encoders, {} connected connectors, {} modes, {} clone groups",
        snapshot.controllers.len(),
        snapshot.encoders.len(),
        snapshot.connectors.len(),
        snapshot.modes.len(),
        snapshot.clone_groups.len()
    );
    snapshot
}

impl TopologySnapshot {
    /// Shorthand for [`build_topology`].
    pub fn from_resources(res: &DriverResources) -> Self {
        build_topology(res)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Materialises controllers and returns the driver-position → local-index table.
fn build_controllers(
    res: &DriverResources,
    modes: &mut ModePool,
    issues: &mut Vec<InventoryIssue>,
) -> (Vec<Controller>, Vec<Option<usize>>) {
    let slots = dedup_slots(
        res.crtcs.iter().map(|c| c.id),
        |id| InventoryIssue::DuplicateController { id },
        issues,
    );
    let count = slots.iter().flatten().count();
    if count > MAX_MASK_INDEX {
        issues.push(InventoryIssue::TooManyResources {
            kind: "CRTCs",
            count,
            max: MAX_MASK_INDEX,
        });
    }

    let mut controllers = Vec::with_capacity(count);
    for (position, desc) in res.crtcs.iter().enumerate() {
        if slots[position].is_none() {
            continue;
        }
        let mode = desc.mode.as_ref().map(|raw| modes.intern(raw));
        let rect = match mode.and_then(|id| modes.get(id)) {
            Some(m) => {
                let (width, height) = desc.transform.apply_to_size(m.width, m.height);
                Rect { x: desc.x, y: desc.y, width, height }
            }
            None => Rect::EMPTY,
        };
        controllers.push(Controller {
            id: desc.id,
            rect,
            mode,
            transform: desc.transform,
            gamma_size: desc.gamma_size,
            dirty: false,
        });
    }
    (controllers, slots)
}

/// Assigns consecutive local indices to driver entries, skipping repeated ids.
///
/// The returned table is indexed by driver position; `None` marks a skipped
/// duplicate.
fn dedup_slots(
    ids: impl Iterator<Item = u32>,
    duplicate: impl Fn(u32) -> InventoryIssue,
    issues: &mut Vec<InventoryIssue>,
) -> Vec<Option<usize>> {
    let mut seen = HashSet::new();
    let mut next = 0;
    ids.map(|id| {
        if seen.insert(id) {
            next += 1;
            Some(next - 1)
        } else {
            issues.push(duplicate(id));
            None
        }
    })
    .collect()
}

/// Re-expresses a driver capability mask in local indices.
fn translate_mask(
    encoder: u32,
    driver_mask: u32,
    slots: &[Option<usize>],
    issues: &mut Vec<InventoryIssue>,
) -> IndexMask {
    let mut local = IndexMask::EMPTY;
    for position in IndexMask::from_bits(driver_mask).iter() {
        match slots.get(position) {
            Some(Some(index)) => {
                local.insert(*index);
            }
            // Position of a skipped duplicate: already reported.
            Some(None) => {}
            None => issues.push(InventoryIssue::MaskPositionOutOfRange { encoder, position }),
        }
    }
    local
}

// ── Tests ─────────────────────────────────────────────────────────────────────
