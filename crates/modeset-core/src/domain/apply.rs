//! Configuration applier: stages a desired layout onto a snapshot and builds
//! the hardware transaction that realises it.
//!
//! # Phases
//!
//! ```text
//!   validate ──► stage (explicit controllers) ──► disable unmentioned ──► commit
//!      │                                                                   │
//!   ApplyError                                         ok: complete_commit()
//!   (nothing touched)                                  err: mark_stale()
//! ```
//!
//! Validation is pure: an invalid desired layout is rejected before a single
//! field of the snapshot changes.  Once staging starts, the snapshot holds the
//! *intended* layout, and it only becomes authoritative after the backend
//! accepts the transaction.  If the backend rejects it, the staged fields are
//! left as they are and the snapshot is flagged stale; the only way back is a
//! full re-read of the hardware.
//!
//! The transaction always covers every controller, not just the ones that
//! changed, so the backend can submit it as one atomic request.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::mode::ModeId;
use crate::domain::topology::{Rect, ScreenSize, TopologySnapshot};
use crate::domain::transform::MonitorTransform;

// ── Desired layout ────────────────────────────────────────────────────────────

/// What one controller should do after the apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerAssignment {
    /// Driver id of the controller.
    pub controller_id: u32,
    /// `None` disables the controller regardless of `connector_ids`.
    pub mode: Option<ModeId>,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub transform: MonitorTransform,
    /// Driver ids of the connectors to drive; more than one means cloning.
    #[serde(default)]
    pub connector_ids: Vec<u32>,
}

impl ControllerAssignment {
    /// An assignment that switches `controller_id` off.
    pub fn disabled(controller_id: u32) -> Self {
        Self {
            controller_id,
            mode: None,
            x: 0,
            y: 0,
            transform: MonitorTransform::Normal,
            connector_ids: Vec::new(),
        }
    }
}

/// Per-connector role flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAssignment {
    pub connector_id: u32,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_presentation: bool,
}

// ── Transaction ───────────────────────────────────────────────────────────────

/// What the backend must program into one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TransactionAction {
    Disable,
    Enable {
        mode: ModeId,
        /// Raw driver timing of `mode`.
        timing: Vec<u8>,
        /// Unrotated mode size.
        width: u32,
        height: u32,
        x: i32,
        y: i32,
        transform: MonitorTransform,
        connector_ids: Vec<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub controller_id: u32,
    #[serde(flatten)]
    pub action: TransactionAction,
}

/// One entry per controller, in controller order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub entries: Vec<TransactionEntry>,
}

impl Transaction {
    pub fn entry(&self, controller_id: u32) -> Option<&TransactionEntry> {
        self.entries.iter().find(|e| e.controller_id == controller_id)
    }

    /// Number of controllers the transaction leaves enabled.
    pub fn enabled_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.action, TransactionAction::Enable { .. }))
            .count()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A desired layout that cannot be staged on this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("the topology snapshot is stale; re-read the hardware before applying")]
    StaleSnapshot,

    #[error("unknown controller {controller}")]
    UnknownController { controller: u32 },

    #[error("controller {controller} is listed more than once")]
    DuplicateController { controller: u32 },

    #[error("unknown or disconnected connector {connector}")]
    UnknownConnector { connector: u32 },

    #[error("controller {controller} requests mode {mode:?}, which is not in the mode pool")]
    UnknownMode { controller: u32, mode: ModeId },

    #[error("connector {connector} cannot be driven by controller {controller}")]
    UnreachableController { connector: u32, controller: u32 },

    #[error("connectors {first} and {second} cannot clone on controller {controller}")]
    IllegalClone { controller: u32, first: u32, second: u32 },

    #[error("connector {connector} does not support mode {mode:?}")]
    UnsupportedMode { connector: u32, mode: ModeId },

    #[error("controller {controller} is enabled but drives no connector")]
    NoConnectors { controller: u32 },

    #[error("controller {controller} at {x},{y} extends past the edge of the coordinate space")]
    OutOfRange { controller: u32, x: i32, y: i32 },

    #[error("connector {connector} is assigned to more than one controller")]
    ConnectorAssignedTwice { connector: u32 },

    #[error("connectors {first} and {second} are both marked primary")]
    MultiplePrimary { first: u32, second: u32 },
}

/// Why [`TopologySnapshot::apply_with`] failed.
#[derive(Debug)]
pub enum ApplyFailure<E> {
    /// Rejected before staging; the snapshot is untouched.
    Invalid(ApplyError),
    /// Rejected by the backend; the snapshot is now stale.
    Commit(E),
}

// ── Applier ───────────────────────────────────────────────────────────────────

impl TopologySnapshot {
    /// Checks a desired layout against this snapshot without touching it.
    pub fn validate(
        &self,
        controllers: &[ControllerAssignment],
        outputs: &[OutputAssignment],
    ) -> Result<(), ApplyError> {
        if self.stale {
            return Err(ApplyError::StaleSnapshot);
        }

        let mut seen_controllers = HashSet::new();
        let mut bound = HashSet::new();
        for assignment in controllers {
            let controller = assignment.controller_id;
            let index = self
                .controller_index(controller)
                .ok_or(ApplyError::UnknownController { controller })?;
            if !seen_controllers.insert(controller) {
                return Err(ApplyError::DuplicateController { controller });
            }
            let Some(mode) = assignment.mode else {
                continue;
            };
            let Some(requested) = self.modes.get(mode) else {
                return Err(ApplyError::UnknownMode { controller, mode });
            };
            if assignment.connector_ids.is_empty() {
                return Err(ApplyError::NoConnectors { controller });
            }
            let (width, height) = assignment.transform.apply_to_size(requested.width, requested.height);
            let fits = |origin: i32, extent: u32| i64::from(origin) + i64::from(extent) <= i64::from(i32::MAX);
            if !fits(assignment.x, width) || !fits(assignment.y, height) {
                return Err(ApplyError::OutOfRange { controller, x: assignment.x, y: assignment.y });
            }

            let mut local = Vec::with_capacity(assignment.connector_ids.len());
            for &connector in &assignment.connector_ids {
                let c = self
                    .connector_index(connector)
                    .ok_or(ApplyError::UnknownConnector { connector })?;
                if !bound.insert(connector) {
                    return Err(ApplyError::ConnectorAssignedTwice { connector });
                }
                if !self.connectors[c].can_use_controller(index) {
                    return Err(ApplyError::UnreachableController { connector, controller });
                }
                local.push(c);
            }

            for (i, &a) in local.iter().enumerate() {
                for &b in &local[i + 1..] {
                    let (ca, cb) = (&self.connectors[a], &self.connectors[b]);
                    if !ca.can_clone_with(b) || !cb.can_clone_with(a) {
                        return Err(ApplyError::IllegalClone {
                            controller,
                            first: ca.id,
                            second: cb.id,
                        });
                    }
                }
            }
            for &c in &local {
                let connector = &self.connectors[c];
                if !connector.modes.contains(&mode) {
                    return Err(ApplyError::UnsupportedMode { connector: connector.id, mode });
                }
            }
        }

        let mut primary: Option<u32> = None;
        for output in outputs {
            if self.connector_index(output.connector_id).is_none() {
                return Err(ApplyError::UnknownConnector { connector: output.connector_id });
            }
            if output.is_primary {
                if let Some(first) = primary {
                    return Err(ApplyError::MultiplePrimary { first, second: output.connector_id });
                }
                primary = Some(output.connector_id);
            }
        }
        Ok(())
    }

    /// Validates and stages a desired layout, returning the transaction.
    ///
    /// On `Ok`, the snapshot holds the staged layout with dirty flags set; call
    /// [`complete_commit`](Self::complete_commit) once the backend accepts the
    /// transaction, or [`mark_stale`](Self::mark_stale) if it does not.
    pub fn stage(
        &mut self,
        controllers: &[ControllerAssignment],
        outputs: &[OutputAssignment],
    ) -> Result<Transaction, ApplyError> {
        self.validate(controllers, outputs)?;

        let mut entries: Vec<Option<TransactionEntry>> = vec![None; self.controllers.len()];

        // Phase 1: explicit assignments
        for assignment in controllers {
            let Some(index) = self.controller_index(assignment.controller_id) else {
                continue;
            };
            let controller = &mut self.controllers[index];
            controller.dirty = true;
            controller.transform = assignment.transform;

            let mode = assignment.mode.and_then(|id| self.modes.get(id));
            let Some(mode) = mode else {
                if !assignment.connector_ids.is_empty() {
                    debug!(
                        "controller {} disabled; ignoring {} listed connector(s)",
                        assignment.controller_id,
                        assignment.connector_ids.len()
                    );
                }
                controller.mode = None;
                controller.rect = Rect::EMPTY;
                entries[index] = Some(TransactionEntry {
                    controller_id: assignment.controller_id,
                    action: TransactionAction::Disable,
                });
                continue;
            };

            let (width, height) = assignment.transform.apply_to_size(mode.width, mode.height);
            controller.mode = Some(mode.id);
            controller.rect = Rect { x: assignment.x, y: assignment.y, width, height };
            entries[index] = Some(TransactionEntry {
                controller_id: assignment.controller_id,
                action: TransactionAction::Enable {
                    mode: mode.id,
                    timing: mode.timing.clone(),
                    width: mode.width,
                    height: mode.height,
                    x: assignment.x,
                    y: assignment.y,
                    transform: assignment.transform,
                    connector_ids: assignment.connector_ids.clone(),
                },
            });

            for &connector_id in &assignment.connector_ids {
                if let Some(c) = self.connector_index(connector_id) {
                    let connector = &mut self.connectors[c];
                    connector.dirty = true;
                    connector.controller = Some(index);
                }
            }
        }

        // Phase 2: disable everything not mentioned
        for (index, controller) in self.controllers.iter_mut().enumerate() {
            if controller.dirty {
                continue;
            }
            controller.mode = None;
            controller.rect = Rect::EMPTY;
            entries[index] = Some(TransactionEntry {
                controller_id: controller.id,
                action: TransactionAction::Disable,
            });
        }
        for connector in self.connectors.iter_mut().filter(|c| !c.dirty) {
            connector.controller = None;
            connector.is_primary = false;
            connector.is_presentation = false;
        }

        // Role flags only stick to connectors that stay lit
        for connector in self.connectors.iter_mut().filter(|c| c.dirty) {
            let flags = outputs.iter().find(|o| o.connector_id == connector.id);
            connector.is_primary = flags.is_some_and(|o| o.is_primary);
            connector.is_presentation = flags.is_some_and(|o| o.is_presentation);
        }

        Ok(Transaction { entries: entries.into_iter().flatten().collect() })
    }

    /// Makes the staged layout authoritative after a successful commit.
    ///
    /// Clears dirty flags, re-derives which encoder routes each bound
    /// connector, and recomputes the virtual screen size, which is returned.
    pub fn complete_commit(&mut self) -> ScreenSize {
        for controller in &mut self.controllers {
            controller.dirty = false;
        }
        for encoder in &mut self.encoders {
            encoder.controller = None;
        }
        for connector in &mut self.connectors {
            connector.dirty = false;
            let Some(controller) = connector.controller else {
                connector.current_encoder = None;
                continue;
            };
            let reaches = |e: usize| {
                self.encoders
                    .get(e)
                    .is_some_and(|enc| enc.controller.is_none() && enc.possible_controllers.contains(controller))
            };
            let encoder = connector
                .current_encoder
                .filter(|&e| reaches(e))
                .or_else(|| connector.encoders.iter().copied().find(|&e| reaches(e)));
            connector.current_encoder = encoder;
            if let Some(e) = encoder {
                self.encoders[e].controller = Some(controller);
            }
        }

        self.screen_size = self.compute_screen_size();
        info!(
            "display layout committed: screen {}x{}, {} controller(s) enabled",
            self.screen_size.width,
            self.screen_size.height,
            self.controllers.iter().filter(|c| c.is_enabled()).count()
        );
        self.screen_size
    }

    /// Flags the snapshot as untrustworthy until the hardware is re-read.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Validates, stages, commits through `commit`, and finalises.
    pub fn apply_with<E, F>(
        &mut self,
        controllers: &[ControllerAssignment],
        outputs: &[OutputAssignment],
        commit: F,
    ) -> Result<ScreenSize, ApplyFailure<E>>
    where
        E: std::fmt::Display,
        F: FnOnce(&Transaction) -> Result<(), E>,
    {
        let transaction = self.stage(controllers, outputs).map_err(ApplyFailure::Invalid)?;
        match commit(&transaction) {
            Ok(()) => Ok(self.complete_commit()),
            Err(e) => {
                error!("display commit rejected: {e}; topology must be re-read");
                self.mark_stale();
                Err(ApplyFailure::Commit(e))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
