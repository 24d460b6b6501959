//! ManageTopology use case: owns the live snapshot and applies layouts.
//!
//! [`TopologyService`] is the single writer of the in-memory topology.  It
//! pairs one [`DisplayBackend`] with the latest [`TopologySnapshot`] and
//! exposes the read / apply cycle to callers:
//!
//! ```text
//!   read_current ──► backend.read_resources ──► build_topology ──► TopologyReplaced
//!
//!   apply_configuration ──► snapshot.stage ──► backend.commit
//!                                               ├─ ok  ──► complete_commit ──► DerivedStateRebuilt
//!                                               └─ err ──► mark_stale ──► read_current ──► Err(Commit)
//! ```
//!
//! # Why re-read after a failed commit? (for beginners)
//!
//! Staging writes the *intended* layout into the snapshot before the driver
//! has said yes.  If the driver then says no, the snapshot describes a layout
//! that is not on screen.  Rather than trying to undo each field, the service
//! throws the snapshot away and reads the hardware again.  If even that read
//! fails, the snapshot stays flagged stale and the next apply re-reads first.

use std::sync::mpsc;

use modeset_core::{
    build_topology, ApplyError, ApplyFailure, ControllerAssignment, OutputAssignment, ScreenSize,
    TopologySnapshot,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::backend::{BackendError, DisplayBackend};

/// Error type for topology use cases.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The backend could not read the hardware inventory.
    #[error("failed to read display hardware: {0}")]
    Read(#[source] BackendError),

    /// The desired layout is invalid for the current topology.
    #[error("invalid display configuration: {0}")]
    Apply(#[from] ApplyError),

    /// The driver refused the mode-set.  The topology has been re-read.
    #[error("display configuration rejected: {0}")]
    Commit(#[source] BackendError),

    /// A gamma read or write failed.
    #[error("gamma update failed: {0}")]
    Gamma(#[source] BackendError),

    #[error("unknown controller {0}")]
    UnknownController(u32),
}

/// Notification sent to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    /// The snapshot was rebuilt from a fresh hardware read.
    TopologyReplaced,
    /// A layout was committed and the virtual screen size recomputed.
    DerivedStateRebuilt { width: u32, height: u32 },
}

/// Owns the backend handle and the current snapshot.
pub struct TopologyService<B> {
    backend: B,
    snapshot: TopologySnapshot,
    subscribers: Vec<mpsc::Sender<TopologyEvent>>,
}

impl<B: DisplayBackend> TopologyService<B> {
    /// Creates the service and performs the initial hardware read.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Read`] if the backend cannot be read.
    pub fn new(mut backend: B) -> Result<Self, TopologyError> {
        let res = backend.read_resources().map_err(TopologyError::Read)?;
        let snapshot = build_topology(&res);
        info!(
            "{} backend: {} connected output(s), {} controller(s)",
            backend.name(),
            snapshot.connectors().len(),
            snapshot.controllers().len()
        );
        Ok(Self {
            backend,
            snapshot,
            subscribers: Vec::new(),
        })
    }

    /// Registers a subscriber; dropped receivers are pruned on the next event.
    pub fn subscribe(&mut self) -> mpsc::Receiver<TopologyEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// The latest snapshot.  Check [`TopologySnapshot::is_stale`] before
    /// trusting it after a failed apply.
    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Re-reads the hardware and replaces the snapshot wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Read`]; the previous snapshot is kept.
    pub fn read_current(&mut self) -> Result<&TopologySnapshot, TopologyError> {
        let res = self.backend.read_resources().map_err(TopologyError::Read)?;
        self.snapshot = build_topology(&res);
        debug!(
            "topology replaced: {} connected output(s)",
            self.snapshot.connectors().len()
        );
        self.emit(TopologyEvent::TopologyReplaced);
        Ok(&self.snapshot)
    }

    /// Validates, stages and commits a desired layout.
    ///
    /// Controllers not named in `controllers` are switched off.  On success
    /// the new virtual screen size is returned.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::Apply`] if the layout is invalid (nothing changed).
    /// - [`TopologyError::Commit`] if the driver refused it (topology re-read).
    /// - [`TopologyError::Read`] if a stale snapshot could not be refreshed.
    pub fn apply_configuration(
        &mut self,
        controllers: &[ControllerAssignment],
        outputs: &[OutputAssignment],
    ) -> Result<ScreenSize, TopologyError> {
        if self.snapshot.is_stale() {
            info!("topology is stale; re-reading before apply");
            self.read_current()?;
        }

        let backend = &mut self.backend;
        let result = self
            .snapshot
            .apply_with(controllers, outputs, |transaction| backend.commit(transaction));

        match result {
            Ok(size) => {
                self.emit(TopologyEvent::DerivedStateRebuilt {
                    width: size.width,
                    height: size.height,
                });
                Ok(size)
            }
            Err(ApplyFailure::Invalid(e)) => Err(TopologyError::Apply(e)),
            Err(ApplyFailure::Commit(e)) => {
                if let Err(read_err) = self.read_current() {
                    warn!("re-read after rejected commit failed, topology stays stale: {read_err}");
                }
                Err(TopologyError::Commit(e))
            }
        }
    }

    fn emit(&mut self, event: TopologyEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::test_backend::TestBackend;
    use crate::infrastructure::backend::MockDisplayBackend;
    use modeset_core::{ModeId, MonitorTransform};

    fn lit(controller_id: u32, mode: ModeId, x: i32, connector: u32) -> ControllerAssignment {
        ControllerAssignment {
            controller_id,
            mode: Some(mode),
            x,
            y: 0,
            transform: MonitorTransform::Normal,
            connector_ids: vec![connector],
        }
    }

    fn preferred(service: &TopologyService<impl DisplayBackend>, name: &str) -> ModeId {
        service
            .snapshot()
            .connector_by_name(name)
            .and_then(|c| c.preferred_mode)
            .expect("preferred mode")
    }

    #[test]
    fn test_new_service_reads_initial_topology() {
        let service = TopologyService::new(TestBackend::sample()).expect("service");

        let names: Vec<_> = service.snapshot().connectors().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["DP-1", "HDMI-1", "eDP-1"]);
        assert_eq!(service.snapshot().connector_by_name("eDP-1").unwrap().controller, Some(0));
    }

    #[test]
    fn test_apply_emits_rebuilt_event_and_updates_backend() {
        // Arrange
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        let events = service.subscribe();
        let layout = vec![
            lit(40, preferred(&service, "eDP-1"), 0, 60),
            lit(41, preferred(&service, "HDMI-1"), 1920, 61),
        ];

        // Act
        let size = service.apply_configuration(&layout, &[]).expect("apply");

        // Assert
        assert_eq!(size, ScreenSize { width: 3840, height: 1200 });
        assert_eq!(
            events.try_recv(),
            Ok(TopologyEvent::DerivedStateRebuilt { width: 3840, height: 1200 })
        );
        assert_eq!(service.backend().commits().len(), 1);
    }

    #[test]
    fn test_read_current_reflects_committed_layout() {
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        let layout = vec![lit(41, preferred(&service, "HDMI-1"), 0, 61)];
        service.apply_configuration(&layout, &[]).expect("apply");

        let snapshot = service.read_current().expect("read");

        let hdmi = snapshot.connector_by_name("HDMI-1").unwrap();
        assert_eq!(hdmi.controller, Some(1));
        assert_eq!(snapshot.connector_by_name("eDP-1").unwrap().controller, None);
        assert!(!snapshot.controllers()[0].is_enabled());
    }

    #[test]
    fn test_invalid_layout_leaves_backend_untouched() {
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        // eDP-1 can only reach CRTC 40
        let layout = vec![lit(42, preferred(&service, "eDP-1"), 0, 60)];

        let err = service.apply_configuration(&layout, &[]).unwrap_err();

        assert!(matches!(
            err,
            TopologyError::Apply(ApplyError::UnreachableController { connector: 60, controller: 42 })
        ));
        assert!(service.backend().commits().is_empty());
        assert!(!service.snapshot().is_stale());
    }

    #[test]
    fn test_rejected_commit_rereads_topology_before_returning() {
        // Arrange
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        let events = service.subscribe();
        service.backend_mut().fail_next_commit("EINVAL");
        let layout = vec![lit(41, preferred(&service, "HDMI-1"), 0, 61)];

        // Act
        let err = service.apply_configuration(&layout, &[]).unwrap_err();

        // Assert: fresh snapshot showing what is really on screen
        assert!(matches!(err, TopologyError::Commit(BackendError::CommitRejected(_))));
        assert_eq!(events.try_recv(), Ok(TopologyEvent::TopologyReplaced));
        assert!(!service.snapshot().is_stale());
        assert_eq!(service.snapshot().connector_by_name("eDP-1").unwrap().controller, Some(0));
        assert_eq!(service.snapshot().connector_by_name("HDMI-1").unwrap().controller, None);
    }

    #[test]
    fn test_failed_reread_keeps_snapshot_stale_until_next_apply() {
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        service.backend_mut().fail_next_commit("EINVAL");
        service.backend_mut().set_fail_reads(true);
        let layout = vec![lit(41, preferred(&service, "HDMI-1"), 0, 61)];

        let first = service.apply_configuration(&layout, &[]);
        assert!(matches!(first, Err(TopologyError::Commit(_))));
        assert!(service.snapshot().is_stale());

        // Still unreadable: the apply refuses to run on stale state
        let second = service.apply_configuration(&layout, &[]);
        assert!(matches!(second, Err(TopologyError::Read(_))));

        // Readable again: re-read, then apply
        service.backend_mut().set_fail_reads(false);
        let third = service.apply_configuration(&layout, &[]);
        assert!(third.is_ok());
        assert!(!service.snapshot().is_stale());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut service = TopologyService::new(TestBackend::sample()).expect("service");
        let kept = service.subscribe();
        drop(service.subscribe());

        service.read_current().expect("read");

        assert_eq!(service.subscribers.len(), 1);
        assert_eq!(kept.try_recv(), Ok(TopologyEvent::TopologyReplaced));
    }

    #[test]
    fn test_initial_read_failure_is_reported() {
        let mut backend = MockDisplayBackend::new();
        backend
            .expect_read_resources()
            .returning(|| Err(BackendError::Driver("permission denied".to_string())));

        let result = TopologyService::new(backend);

        assert!(matches!(result, Err(TopologyError::Read(BackendError::Driver(_)))));
    }

    #[test]
    fn test_commit_error_from_driver_is_surfaced_with_message() {
        // Arrange: a driver that reports an empty machine and refuses every commit
        let mut backend = MockDisplayBackend::new();
        backend.expect_name().return_const("mock");
        backend
            .expect_read_resources()
            .returning(|| Ok(modeset_core::DriverResources::default()));
        backend
            .expect_commit()
            .times(1)
            .returning(|_| Err(BackendError::CommitRejected("ENOSPC".to_string())));
        let mut service = TopologyService::new(backend).expect("service");

        // Act
        let err = service.apply_configuration(&[], &[]).unwrap_err();

        // Assert
        assert_eq!(err.to_string(), "display configuration rejected: driver rejected the mode-set: ENOSPC");
    }
}
