//! In-memory display backend for tests, demos and CI.
//!
//! Holds a [`DriverResources`] inventory and behaves like a small, strict
//! driver: committed transactions are checked against the capability masks
//! and written back into the inventory, so the next read reflects them.
//! A rejected transaction changes nothing.
//!
//! Tests can inject failures (next commit, reads, power writes for a given
//! connector) and inspect what was committed.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use modeset_core::{
    ConnectionState, ConnectorDescriptor, ConnectorKind, CrtcDescriptor, DriverResources,
    EncoderDescriptor, MonitorTransform, RawMode, Transaction, TransactionAction,
};
use tracing::debug;

use super::{BackendError, DisplayBackend, GammaRamp, PowerSaveMode};

/// A driver that lives entirely in memory.
#[derive(Debug, Default)]
pub struct TestBackend {
    resources: DriverResources,
    gamma: HashMap<u32, GammaRamp>,
    commits: Vec<Transaction>,
    power_writes: Vec<(u32, PowerSaveMode)>,
    fail_next_commit: Option<String>,
    fail_reads: bool,
    failing_power: HashSet<u32>,
}

impl TestBackend {
    pub fn new(resources: DriverResources) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    /// Loads the inventory from a JSON file shaped like [`DriverResources`].
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Fixture`] if the file cannot be read or parsed.
    pub fn from_fixture(path: &Path) -> Result<Self, BackendError> {
        let fixture_err = |message: String| BackendError::Fixture {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fixture_err(e.to_string()))?;
        let resources: DriverResources =
            serde_json::from_str(&text).map_err(|e| fixture_err(e.to_string()))?;
        Ok(Self::new(resources))
    }

    /// A laptop panel plus two external monitors on three CRTCs.
    ///
    /// eDP-1 reaches CRTC 0 only; HDMI-1 reaches {0, 1}; DP-1 reaches {1, 2}.
    /// HDMI-1 and DP-1 are declared clone partners.  The panel is lit at boot.
    pub fn sample() -> Self {
        let mode = |width: u32, height: u32, refresh: f64, preferred: bool, tag: u8| RawMode {
            name: format!("{width}x{height}"),
            width,
            height,
            refresh_rate: refresh,
            preferred,
            timing: vec![tag, (width >> 8) as u8, width as u8, (height >> 8) as u8, height as u8],
        };
        let crtc = |id: u32| CrtcDescriptor {
            id,
            x: 0,
            y: 0,
            mode: None,
            transform: MonitorTransform::Normal,
            gamma_size: 256,
        };
        let connector = |id: u32, kind: ConnectorKind, encoder: u32, modes: Vec<RawMode>| {
            ConnectorDescriptor {
                id,
                kind,
                kind_id: 1,
                connection: ConnectionState::Connected,
                width_mm: if kind == ConnectorKind::EmbeddedDisplayPort { 310 } else { 600 },
                height_mm: if kind == ConnectorKind::EmbeddedDisplayPort { 174 } else { 340 },
                modes,
                encoder_ids: vec![encoder],
                current_encoder_id: None,
                edid: None,
            }
        };

        let panel_mode = mode(1920, 1200, 60.0, true, 1);
        let mut boot_crtc = crtc(40);
        boot_crtc.mode = Some(panel_mode.clone());
        let mut panel = connector(60, ConnectorKind::EmbeddedDisplayPort, 50, vec![panel_mode]);
        panel.current_encoder_id = Some(50);

        Self::new(DriverResources {
            crtcs: vec![boot_crtc, crtc(41), crtc(42)],
            encoders: vec![
                EncoderDescriptor { id: 50, crtc_id: Some(40), possible_crtcs: 0b001, possible_clones: 0 },
                EncoderDescriptor { id: 51, crtc_id: None, possible_crtcs: 0b011, possible_clones: 0b100 },
                EncoderDescriptor { id: 52, crtc_id: None, possible_crtcs: 0b110, possible_clones: 0b010 },
            ],
            connectors: vec![
                panel,
                connector(
                    61,
                    ConnectorKind::HdmiA,
                    51,
                    vec![mode(1920, 1080, 60.0, true, 2), mode(1280, 720, 60.0, false, 3)],
                ),
                connector(
                    62,
                    ConnectorKind::DisplayPort,
                    52,
                    vec![
                        mode(2560, 1440, 59.95, true, 4),
                        mode(2560, 1440, 144.0, false, 5),
                        mode(1920, 1080, 60.0, false, 2),
                    ],
                ),
            ],
        })
    }

    /// Direct access to the inventory, e.g. to simulate a hot-plug.
    pub fn resources_mut(&mut self) -> &mut DriverResources {
        &mut self.resources
    }

    /// Marks a connector connected or disconnected.
    pub fn set_connected(&mut self, connector_id: u32, connected: bool) {
        if let Some(c) = self.resources.connectors.iter_mut().find(|c| c.id == connector_id) {
            c.connection = if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
        }
    }

    /// Makes the next commit fail with `message`.
    pub fn fail_next_commit(&mut self, message: impl Into<String>) {
        self.fail_next_commit = Some(message.into());
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Makes every power write to `connector_id` fail.
    pub fn fail_power_for(&mut self, connector_id: u32) {
        self.failing_power.insert(connector_id);
    }

    /// Transactions accepted so far, oldest first.
    pub fn commits(&self) -> &[Transaction] {
        &self.commits
    }

    /// Successful power writes so far, oldest first.
    pub fn power_writes(&self) -> &[(u32, PowerSaveMode)] {
        &self.power_writes
    }

    fn crtc_size(&self, controller_id: u32) -> Result<usize, BackendError> {
        self.resources
            .crtcs
            .iter()
            .find(|c| c.id == controller_id)
            .map(|c| c.gamma_size as usize)
            .ok_or(BackendError::UnknownController(controller_id))
    }

    /// Builds the post-commit inventory, or explains why the driver refuses.
    fn program(&self, transaction: &Transaction) -> Result<DriverResources, String> {
        let mut next = self.resources.clone();
        for encoder in &mut next.encoders {
            encoder.crtc_id = None;
        }
        for connector in &mut next.connectors {
            connector.current_encoder_id = None;
        }

        for entry in &transaction.entries {
            let position = next
                .crtcs
                .iter()
                .position(|c| c.id == entry.controller_id)
                .ok_or_else(|| format!("no CRTC {}", entry.controller_id))?;

            let TransactionAction::Enable { timing, width, height, x, y, transform, connector_ids, .. } =
                &entry.action
            else {
                next.crtcs[position].mode = None;
                continue;
            };

            let raw = next
                .connectors
                .iter()
                .flat_map(|c| c.modes.iter())
                .find(|m| &m.timing == timing)
                .cloned()
                .unwrap_or_else(|| RawMode {
                    name: format!("{width}x{height}"),
                    width: *width,
                    height: *height,
                    refresh_rate: 60.0,
                    preferred: false,
                    timing: timing.clone(),
                });
            let crtc = &mut next.crtcs[position];
            crtc.mode = Some(raw);
            crtc.x = *x;
            crtc.y = *y;
            crtc.transform = *transform;

            for connector_id in connector_ids {
                let c = next
                    .connectors
                    .iter()
                    .position(|c| c.id == *connector_id)
                    .ok_or_else(|| format!("no connector {connector_id}"))?;
                let encoder = next.connectors[c]
                    .encoder_ids
                    .iter()
                    .filter_map(|id| next.encoders.iter().position(|e| e.id == *id))
                    .find(|&e| {
                        let enc = &next.encoders[e];
                        enc.crtc_id.is_none() && position < 32 && enc.possible_crtcs & (1 << position) != 0
                    })
                    .ok_or_else(|| {
                        format!("connector {connector_id} has no free encoder for CRTC {}", entry.controller_id)
                    })?;
                next.encoders[encoder].crtc_id = Some(entry.controller_id);
                next.connectors[c].current_encoder_id = Some(next.encoders[encoder].id);
            }
        }
        Ok(next)
    }
}

impl DisplayBackend for TestBackend {
    fn name(&self) -> &'static str {
        "test"
    }

    fn read_resources(&mut self) -> Result<DriverResources, BackendError> {
        if self.fail_reads {
            return Err(BackendError::Driver("injected read failure".to_string()));
        }
        Ok(self.resources.clone())
    }

    fn commit(&mut self, transaction: &Transaction) -> Result<(), BackendError> {
        if let Some(message) = self.fail_next_commit.take() {
            return Err(BackendError::CommitRejected(message));
        }
        let next = self.program(transaction).map_err(BackendError::CommitRejected)?;
        self.resources = next;
        self.commits.push(transaction.clone());
        debug!("test backend accepted commit #{}", self.commits.len());
        Ok(())
    }

    fn gamma(&self, controller_id: u32) -> Result<GammaRamp, BackendError> {
        let size = self.crtc_size(controller_id)?;
        Ok(self
            .gamma
            .get(&controller_id)
            .cloned()
            .unwrap_or_else(|| GammaRamp::linear(size)))
    }

    fn set_gamma(&mut self, controller_id: u32, ramp: &GammaRamp) -> Result<(), BackendError> {
        let expected = self.crtc_size(controller_id)?;
        let actual = ramp.size().unwrap_or(0);
        if actual != expected {
            return Err(BackendError::GammaSizeMismatch {
                controller: controller_id,
                expected,
                actual,
            });
        }
        self.gamma.insert(controller_id, ramp.clone());
        Ok(())
    }

    fn set_power_mode(&mut self, connector_id: u32, mode: PowerSaveMode) -> Result<(), BackendError> {
        if !self.resources.connectors.iter().any(|c| c.id == connector_id) {
            return Err(BackendError::UnknownConnector(connector_id));
        }
        if self.failing_power.contains(&connector_id) {
            return Err(BackendError::MissingProperty {
                object: connector_id,
                name: "DPMS",
            });
        }
        self.power_writes.push((connector_id, mode));
        Ok(())
    }
}
