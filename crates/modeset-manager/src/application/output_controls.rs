//! Per-output controls that bypass the mode-set transaction.
//!
//! Gamma lookup tables and monitor power state can be changed without a full
//! mode-set, so they are narrow, independent calls rather than part of
//! [`TopologyService::apply_configuration`].

use tracing::{info, warn};

use crate::application::manage_topology::{TopologyError, TopologyService};
use crate::infrastructure::backend::{BackendError, DisplayBackend, GammaRamp, PowerSaveMode};

impl<B: DisplayBackend> TopologyService<B> {
    /// Reads a controller's gamma table.
    ///
    /// # Errors
    ///
    /// [`TopologyError::UnknownController`] if the id is not in the snapshot,
    /// [`TopologyError::Gamma`] if the driver call fails.
    pub fn get_controller_gamma(&self, controller_id: u32) -> Result<GammaRamp, TopologyError> {
        self.snapshot()
            .controller_by_id(controller_id)
            .ok_or(TopologyError::UnknownController(controller_id))?;
        self.backend().gamma(controller_id).map_err(TopologyError::Gamma)
    }

    /// Replaces a controller's gamma table.
    ///
    /// The ramp must have exactly as many entries per channel as the
    /// controller's lookup table.
    ///
    /// # Errors
    ///
    /// [`TopologyError::UnknownController`] or [`TopologyError::Gamma`].
    pub fn set_controller_gamma(&mut self, controller_id: u32, ramp: &GammaRamp) -> Result<(), TopologyError> {
        let controller = self
            .snapshot()
            .controller_by_id(controller_id)
            .ok_or(TopologyError::UnknownController(controller_id))?;
        let expected = controller.gamma_size as usize;
        let actual = ramp.size().unwrap_or(0);
        if actual != expected {
            return Err(TopologyError::Gamma(BackendError::GammaSizeMismatch {
                controller: controller_id,
                expected,
                actual,
            }));
        }
        self.backend_mut()
            .set_gamma(controller_id, ramp)
            .map_err(TopologyError::Gamma)
    }

    /// Writes `mode` to every connected output, best effort.
    ///
    /// A failure on one connector is logged and does not stop the others.
    /// Returns the names of the connectors that could not be updated.
    pub fn set_power_save_mode(&mut self, mode: PowerSaveMode) -> Vec<String> {
        let targets: Vec<(u32, String)> = self
            .snapshot()
            .connectors()
            .iter()
            .map(|c| (c.id, c.name.clone()))
            .collect();

        let mut failed = Vec::new();
        for (id, name) in targets {
            if let Err(e) = self.backend_mut().set_power_mode(id, mode) {
                warn!("{name}: failed to set power mode {mode:?}: {e}");
                failed.push(name);
            }
        }
        if failed.is_empty() {
            info!("power mode set to {mode:?} on all outputs");
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::test_backend::TestBackend;
    use crate::infrastructure::backend::MockDisplayBackend;
    use modeset_core::{
        ConnectionState, ConnectorDescriptor, ConnectorKind, CrtcDescriptor, DriverResources,
        EncoderDescriptor, MonitorTransform,
    };

    fn service() -> TopologyService<TestBackend> {
        TopologyService::new(TestBackend::sample()).expect("service")
    }

    #[test]
    fn test_gamma_round_trips_through_backend() {
        let mut service = service();
        let mut warm = GammaRamp::linear(256);
        warm.blue.iter_mut().for_each(|v| *v = *v / 4 * 3);

        service.set_controller_gamma(41, &warm).expect("set");

        assert_eq!(service.get_controller_gamma(41).expect("get"), warm);
    }

    #[test]
    fn test_gamma_for_unknown_controller_is_rejected() {
        let service = service();
        assert!(matches!(
            service.get_controller_gamma(99),
            Err(TopologyError::UnknownController(99))
        ));
    }

    #[test]
    fn test_gamma_of_wrong_size_is_rejected_before_reaching_driver() {
        let mut service = service();

        let err = service.set_controller_gamma(40, &GammaRamp::linear(1024)).unwrap_err();

        assert!(matches!(
            err,
            TopologyError::Gamma(BackendError::GammaSizeMismatch { expected: 256, actual: 1024, .. })
        ));
    }

    #[test]
    fn test_power_save_reaches_every_connected_output() {
        let mut service = service();

        let failed = service.set_power_save_mode(PowerSaveMode::Standby);

        assert!(failed.is_empty());
        let mut written: Vec<u32> = service.backend().power_writes().iter().map(|(id, _)| *id).collect();
        written.sort_unstable();
        assert_eq!(written, vec![60, 61, 62]);
    }

    #[test]
    fn test_power_save_failure_on_one_output_does_not_stop_others() {
        let mut service = service();
        service.backend_mut().fail_power_for(61);

        let failed = service.set_power_save_mode(PowerSaveMode::Off);

        assert_eq!(failed, vec!["HDMI-1".to_string()]);
        assert_eq!(service.backend().power_writes().len(), 2);
    }

    #[test]
    fn test_gamma_driver_error_is_wrapped() {
        // Arrange: one CRTC with a LUT, but the driver refuses to read it
        let mut backend = MockDisplayBackend::new();
        backend.expect_name().return_const("mock");
        backend.expect_read_resources().returning(|| {
            Ok(DriverResources {
                crtcs: vec![CrtcDescriptor {
                    id: 7,
                    x: 0,
                    y: 0,
                    mode: None,
                    transform: MonitorTransform::Normal,
                    gamma_size: 256,
                }],
                encoders: vec![EncoderDescriptor { id: 8, crtc_id: None, possible_crtcs: 1, possible_clones: 0 }],
                connectors: vec![ConnectorDescriptor {
                    id: 9,
                    kind: ConnectorKind::Vga,
                    kind_id: 1,
                    connection: ConnectionState::Connected,
                    width_mm: 0,
                    height_mm: 0,
                    modes: vec![],
                    encoder_ids: vec![8],
                    current_encoder_id: None,
                    edid: None,
                }],
            })
        });
        backend
            .expect_gamma()
            .returning(|_| Err(BackendError::Driver("EIO".to_string())));
        let service = TopologyService::new(backend).expect("service");

        // Act
        let err = service.get_controller_gamma(7).unwrap_err();

        // Assert
        assert!(matches!(err, TopologyError::Gamma(BackendError::Driver(_))));
    }
}
