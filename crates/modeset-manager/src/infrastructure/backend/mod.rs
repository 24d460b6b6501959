//! Display backends: the boundary between the topology model and a driver.
//!
//! Every backend speaks the same narrow contract, [`DisplayBackend`]:
//!
//! - read the raw controller / encoder / connector inventory,
//! - commit a whole-hardware [`Transaction`] in one go,
//! - read and write per-controller gamma tables,
//! - write a connector's power-save (DPMS) state.
//!
//! One backend is picked at startup by [`open_backend`] and handed to the
//! application layer as an explicit value.  There is no process-wide default.
//!
//! # Testability
//!
//! [`test_backend::TestBackend`] keeps the driver state in memory, so the
//! whole read → apply → re-read cycle runs in tests without a GPU.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use modeset_core::{DriverResources, MonitorTransform, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(all(target_os = "linux", feature = "kms"))]
pub mod kms;
pub mod test_backend;

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The device node could not be opened.
    #[error("cannot open display device {path}: {source}")]
    Device {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A driver call failed.
    #[error("driver call failed: {0}")]
    Driver(String),

    /// The driver refused the transaction; nothing was changed on screen.
    #[error("driver rejected the mode-set: {0}")]
    CommitRejected(String),

    #[error("unknown controller {0}")]
    UnknownController(u32),

    #[error("unknown connector {0}")]
    UnknownConnector(u32),

    /// A gamma ramp does not fit the controller's lookup table.
    #[error("controller {controller} expects {expected} gamma entries per channel, got {actual}")]
    GammaSizeMismatch {
        controller: u32,
        expected: usize,
        actual: usize,
    },

    /// A driver object lacks a property this backend relies on.
    #[error("object {object} has no \"{name}\" property")]
    MissingProperty { object: u32, name: &'static str },

    /// A test fixture could not be read or parsed.
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },

    /// The requested backend is not compiled into this binary.
    #[error("backend not available: {0}")]
    Unsupported(String),
}

/// Per-channel gamma lookup table for one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GammaRamp {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl GammaRamp {
    /// An identity ramp with `size` entries per channel.
    pub fn linear(size: usize) -> Self {
        let channel: Vec<u16> = (0..size)
            .map(|i| {
                if size <= 1 {
                    0
                } else {
                    (i as u32 * u16::MAX as u32 / (size as u32 - 1)) as u16
                }
            })
            .collect();
        Self {
            red: channel.clone(),
            green: channel.clone(),
            blue: channel,
        }
    }

    /// Entries per channel; `None` if the three channels disagree.
    pub fn size(&self) -> Option<usize> {
        let n = self.red.len();
        (self.green.len() == n && self.blue.len() == n).then_some(n)
    }
}

// ── Plane rotation ───────────────────────────────────────────────────────────

/// `rotation` plane property bits (`DRM_MODE_ROTATE_*` / `DRM_MODE_REFLECT_*`).
const ROTATE_MASK: u64 = 0b1111;
const REFLECT_X: u64 = 1 << 4;
const REFLECT_Y: u64 = 1 << 5;

/// Value of a plane's `rotation` bitmask property for `transform`.
pub fn plane_rotation(transform: MonitorTransform) -> u64 {
    let rotate = 1 << transform.quarter_turns();
    if transform.is_flipped() {
        rotate | REFLECT_X
    } else {
        rotate
    }
}

/// Reads a `rotation` bitmask back; `None` unless exactly one rotation bit is set.
///
/// A vertical reflection is a horizontal one plus a half turn.
pub fn transform_from_rotation(value: u64) -> Option<MonitorTransform> {
    let rotate = value & ROTATE_MASK;
    if rotate.count_ones() != 1 {
        return None;
    }
    let reflect_x = value & REFLECT_X != 0;
    let reflect_y = value & REFLECT_Y != 0;
    let turns = rotate.trailing_zeros() as u8 + if reflect_y { 2 } else { 0 };
    Some(MonitorTransform::from_parts(turns, reflect_x != reflect_y))
}

/// Monitor power-save state, written as the connector's DPMS property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PowerSaveMode {
    On,
    Standby,
    Suspend,
    Off,
}

impl PowerSaveMode {
    /// Value of the DPMS property enum for this state.
    pub fn dpms_value(self) -> u64 {
        match self {
            PowerSaveMode::On => 0,
            PowerSaveMode::Standby => 1,
            PowerSaveMode::Suspend => 2,
            PowerSaveMode::Off => 3,
        }
    }

    pub fn from_dpms_value(value: u64) -> Option<Self> {
        match value {
            0 => Some(PowerSaveMode::On),
            1 => Some(PowerSaveMode::Standby),
            2 => Some(PowerSaveMode::Suspend),
            3 => Some(PowerSaveMode::Off),
            _ => None,
        }
    }
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kernel mode-setting on a DRM device node.
    #[default]
    Kms,
    /// In-memory backend fed from a JSON fixture.
    Test,
}

/// Driver access used by the application layer.
///
/// Implementations are synchronous: a commit blocks until the driver has
/// accepted or refused the whole transaction.
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBackend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Reads the full driver inventory in driver resource order.
    fn read_resources(&mut self) -> Result<DriverResources, BackendError>;

    /// Programs every controller in `transaction` as one all-or-nothing update.
    fn commit(&mut self, transaction: &Transaction) -> Result<(), BackendError>;

    /// Reads a controller's current gamma table.
    fn gamma(&self, controller_id: u32) -> Result<GammaRamp, BackendError>;

    /// Replaces a controller's gamma table without a mode-set.
    fn set_gamma(&mut self, controller_id: u32, ramp: &GammaRamp) -> Result<(), BackendError>;

    /// Writes a connector's power-save state.
    fn set_power_mode(&mut self, connector_id: u32, mode: PowerSaveMode) -> Result<(), BackendError>;
}

impl<T: DisplayBackend + ?Sized> DisplayBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn read_resources(&mut self) -> Result<DriverResources, BackendError> {
        (**self).read_resources()
    }

    fn commit(&mut self, transaction: &Transaction) -> Result<(), BackendError> {
        (**self).commit(transaction)
    }

    fn gamma(&self, controller_id: u32) -> Result<GammaRamp, BackendError> {
        (**self).gamma(controller_id)
    }

    fn set_gamma(&mut self, controller_id: u32, ramp: &GammaRamp) -> Result<(), BackendError> {
        (**self).set_gamma(controller_id, ramp)
    }

    fn set_power_mode(&mut self, connector_id: u32, mode: PowerSaveMode) -> Result<(), BackendError> {
        (**self).set_power_mode(connector_id, mode)
    }
}

/// Opens the backend selected in configuration.
///
/// `device` is the DRM node for [`BackendKind::Kms`]; `fixture` is the JSON
/// inventory for [`BackendKind::Test`] (a built-in two-monitor desk when
/// absent).
///
/// # Errors
///
/// Returns [`BackendError::Unsupported`] when KMS support was not compiled
/// in, or the backend's own open error.
pub fn open_backend(
    kind: BackendKind,
    device: &Path,
    fixture: Option<&Path>,
) -> Result<Box<dyn DisplayBackend>, BackendError> {
    match kind {
        BackendKind::Test => {
            let backend = match fixture {
                Some(path) => test_backend::TestBackend::from_fixture(path)?,
                None => test_backend::TestBackend::sample(),
            };
            Ok(Box::new(backend))
        }
        BackendKind::Kms => open_kms(device),
    }
}

#[cfg(all(target_os = "linux", feature = "kms"))]
fn open_kms(device: &Path) -> Result<Box<dyn DisplayBackend>, BackendError> {
    Ok(Box::new(kms::KmsBackend::open(device)?))
}

#[cfg(not(all(target_os = "linux", feature = "kms")))]
fn open_kms(device: &Path) -> Result<Box<dyn DisplayBackend>, BackendError> {
    Err(BackendError::Unsupported(format!(
        "KMS support for {} requires a Linux build with the `kms` feature",
        device.display()
    )))
}
