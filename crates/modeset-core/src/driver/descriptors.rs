//! Raw hardware descriptors as reported by the display driver.
//!
//! These structs are the hand-off point between a backend (which talks to
//! the kernel) and the topology resolver (which never does).  They mirror
//! what a `DRM_IOCTL_MODE_GETRESOURCES` walk produces: plain ids, raw
//! capability bitmasks expressed in the driver's own resource order, and
//! opaque timing blobs.
//!
//! Everything here is `Serialize`/`Deserialize` so that topologies can be
//! captured to JSON and replayed through the test backend.

use serde::{Deserialize, Serialize};

use crate::domain::transform::MonitorTransform;

/// A display timing exactly as the driver describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMode {
    /// Driver-provided name, usually `"1920x1080"`.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Vertical refresh in Hz.
    pub refresh_rate: f64,
    /// Set when the driver flags this mode as the panel's preferred timing.
    #[serde(default)]
    pub preferred: bool,
    /// Opaque driver timing (e.g. a serialized `drm_mode_modeinfo`).
    /// Two modes are the same mode if and only if these bytes are equal.
    pub timing: Vec<u8>,
}

/// One CRTC from the driver's resource list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrtcDescriptor {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    /// Timing currently scanned out, `None` when the CRTC is off.
    #[serde(default)]
    pub mode: Option<RawMode>,
    #[serde(default)]
    pub transform: MonitorTransform,
    /// Number of entries per channel in the hardware gamma LUT.
    #[serde(default)]
    pub gamma_size: u32,
}

/// One encoder from the driver's resource list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderDescriptor {
    pub id: u32,
    /// CRTC currently driving this encoder.
    #[serde(default)]
    pub crtc_id: Option<u32>,
    /// Bit `i` refers to the `i`-th CRTC in [`DriverResources::crtcs`].
    pub possible_crtcs: u32,
    /// Bit `i` refers to the `i`-th encoder in [`DriverResources::encoders`].
    pub possible_clones: u32,
}

/// Physical port type, used to build human-readable connector names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectorKind {
    Unknown,
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    NinePinDin,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    EmbeddedDisplayPort,
    Virtual,
    Dsi,
    Dpi,
    Writeback,
    Spi,
    Usb,
}

impl ConnectorKind {
    /// Prefix used in connector names such as `"HDMI-1"` or `"eDP-1"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::Unknown => "None",
            ConnectorKind::Vga => "VGA",
            ConnectorKind::DviI => "DVI-I",
            ConnectorKind::DviD => "DVI-D",
            ConnectorKind::DviA => "DVI-A",
            ConnectorKind::Composite => "Composite",
            ConnectorKind::SVideo => "SVIDEO",
            ConnectorKind::Lvds => "LVDS",
            ConnectorKind::Component => "Component",
            ConnectorKind::NinePinDin => "DIN",
            ConnectorKind::DisplayPort => "DP",
            ConnectorKind::HdmiA => "HDMI",
            ConnectorKind::HdmiB => "HDMI-B",
            ConnectorKind::Tv => "TV",
            ConnectorKind::EmbeddedDisplayPort => "eDP",
            ConnectorKind::Virtual => "Virtual",
            ConnectorKind::Dsi => "DSI",
            ConnectorKind::Dpi => "DPI",
            ConnectorKind::Writeback => "Writeback",
            ConnectorKind::Spi => "SPI",
            ConnectorKind::Usb => "USB",
        }
    }

    /// Returns `true` for panels built into the machine.
    pub fn is_builtin(self) -> bool {
        matches!(
            self,
            ConnectorKind::Lvds | ConnectorKind::EmbeddedDisplayPort | ConnectorKind::Dsi
        )
    }
}

/// Hot-plug state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// Identity and capability record decoded from a monitor's EDID.
///
/// The resolver never interprets these fields; they ride along on the
/// connector for the configuration UI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdidRecord {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    /// CIE 1931 xy chromaticity of the red, green, blue primaries and white point.
    #[serde(default)]
    pub chromaticity: Option<[(f32, f32); 4]>,
    #[serde(default)]
    pub hdr: Option<HdrMetadata>,
}

/// Static HDR metadata block from the EDID CTA extension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HdrMetadata {
    pub max_luminance: f32,
    pub max_frame_average_luminance: f32,
    pub min_luminance: f32,
    /// Supported EOTFs as a CTA-861 bitfield.
    pub eotfs: u8,
}

/// One connector from the driver's resource list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub id: u32,
    pub kind: ConnectorKind,
    /// Per-kind index, e.g. the `1` in `"HDMI-1"`.
    pub kind_id: u32,
    pub connection: ConnectionState,
    /// Physical size in millimetres.
    #[serde(default)]
    pub width_mm: u32,
    #[serde(default)]
    pub height_mm: u32,
    #[serde(default)]
    pub modes: Vec<RawMode>,
    /// Encoder ids this connector can be routed through.
    #[serde(default)]
    pub encoder_ids: Vec<u32>,
    /// Encoder currently driving this connector.
    #[serde(default)]
    pub current_encoder_id: Option<u32>,
    #[serde(default)]
    pub edid: Option<EdidRecord>,
}

/// Complete driver inventory for one display device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverResources {
    /// In driver resource order; `possible_crtcs` bit positions index this list.
    pub crtcs: Vec<CrtcDescriptor>,
    /// In driver resource order; `possible_clones` bit positions index this list.
    pub encoders: Vec<EncoderDescriptor>,
    pub connectors: Vec<ConnectorDescriptor>,
}
