//! Kernel mode-setting backend (Linux, `kms` feature).
//!
//! Talks to a DRM device node through the `drm` crate:
//!
//! - the inventory comes from `resource_handles` plus one `get_*` call per
//!   object; encoder CRTC masks are re-expressed as driver bit positions,
//! - a [`Transaction`] becomes a single atomic request with
//!   `ALLOW_MODESET`, so the kernel either applies all of it or none,
//! - gamma uses the legacy per-CRTC LUT ioctls,
//! - power save writes the connector's `DPMS` property,
//! - transforms go to the primary plane's `rotation` property.
//!
//! Each enabled CRTC gets a black dumb buffer on its primary plane so the
//! kernel accepts the mode-set; a renderer replaces it with real content.
//! Mode blobs are destroyed once the commit returns; the committed state
//! holds its own reference.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use drm::buffer::DrmFourcc;
use drm::control::atomic::AtomicModeReq;
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{
    self, connector, crtc, framebuffer, plane, property, AtomicCommitFlags,
    Device as ControlDevice, Mode as DrmMode, ModeFlags, ModeTypeFlags, ResourceHandle,
    ResourceHandles,
};
use drm::{ClientCapability, Device as BasicDevice};
use modeset_core::{
    ConnectionState, ConnectorDescriptor, ConnectorKind, CrtcDescriptor, DriverResources,
    EdidRecord, EncoderDescriptor, MonitorTransform, RawMode, Transaction, TransactionAction,
};
use tracing::{debug, info, warn};

use super::{plane_rotation, transform_from_rotation, BackendError, DisplayBackend, GammaRamp, PowerSaveMode};

/// `type` property value of a primary plane.
const PLANE_TYPE_PRIMARY: u64 = 1;

struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

/// Scanout buffer kept alive for an enabled CRTC.
struct Scanout {
    size: (u32, u32),
    buffer: DumbBuffer,
    framebuffer: framebuffer::Handle,
}

/// Property name → (handle, current raw value).
type PropertyMap = HashMap<String, (property::Handle, property::RawValue)>;

pub struct KmsBackend {
    card: Card,
    /// Driver modes seen during the last read, keyed by timing bytes.
    modes: HashMap<Vec<u8>, DrmMode>,
    scanout: HashMap<u32, Scanout>,
}

impl KmsBackend {
    /// Opens `path` and enables atomic mode-setting.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Device`] if the node cannot be opened and
    /// [`BackendError::Driver`] if the driver lacks atomic support.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BackendError::Device {
                path: path.to_path_buf(),
                source,
            })?;
        let card = Card(file);
        card.set_client_capability(ClientCapability::UniversalPlanes, true)
            .map_err(driver("enable universal planes"))?;
        card.set_client_capability(ClientCapability::Atomic, true)
            .map_err(driver("enable atomic mode-setting"))?;
        info!("opened KMS device {}", path.display());
        Ok(Self {
            card,
            modes: HashMap::new(),
            scanout: HashMap::new(),
        })
    }

    fn remember(&mut self, mode: DrmMode) -> RawMode {
        let raw = raw_mode(&mode);
        self.modes.insert(raw.timing.clone(), mode);
        raw
    }

    fn properties<H: ResourceHandle>(&self, handle: H) -> Result<PropertyMap, BackendError> {
        let set = self
            .card
            .get_properties(handle)
            .map_err(driver("get properties"))?;
        let (ids, values) = set.as_props_and_values();
        let mut map = HashMap::with_capacity(ids.len());
        for (&id, &value) in ids.iter().zip(values) {
            let info = self.card.get_property(id).map_err(driver("get property"))?;
            map.insert(info.name().to_string_lossy().into_owned(), (id, value));
        }
        Ok(map)
    }

    fn read_edid(&self, handle: connector::Handle) -> Option<EdidRecord> {
        let props = self.properties(handle).ok()?;
        let &(_, blob) = props.get("EDID")?;
        if blob == 0 {
            return None;
        }
        let data = self.card.get_property_blob(blob).ok()?;
        let edid = edid_rs::parse(&mut io::Cursor::new(data)).ok()?;
        let id = edid.product.manufacturer_id;
        let product = edid
            .descriptors
            .0
            .iter()
            .find_map(|desc| match desc {
                edid_rs::MonitorDescriptor::MonitorName(name) => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| edid.product.product_code.to_string());
        Some(EdidRecord {
            manufacturer: [id.0, id.1, id.2].into_iter().collect(),
            product,
            ..EdidRecord::default()
        })
    }

    fn primary_plane(
        &self,
        res: &ResourceHandles,
        crtc: crtc::Handle,
    ) -> Result<(plane::Handle, PropertyMap), BackendError> {
        let planes = self.card.plane_handles().map_err(driver("list planes"))?;
        for handle in planes {
            let info = self.card.get_plane(handle).map_err(driver("get plane"))?;
            if !res.filter_crtcs(info.possible_crtcs()).contains(&crtc) {
                continue;
            }
            let props = self.properties(handle)?;
            if props.get("type").map(|&(_, v)| v) == Some(PLANE_TYPE_PRIMARY) {
                return Ok((handle, props));
            }
        }
        Err(BackendError::MissingProperty {
            object: crtc.into(),
            name: "primary plane",
        })
    }

    /// Returns a framebuffer of `size` for `crtc_id`, reallocating on resize.
    fn scanout_for(&mut self, crtc_id: u32, size: (u32, u32)) -> Result<framebuffer::Handle, BackendError> {
        if let Some(existing) = self.scanout.get(&crtc_id) {
            if existing.size == size {
                return Ok(existing.framebuffer);
            }
        }
        self.release_scanout(crtc_id);

        let buffer = self
            .card
            .create_dumb_buffer(size, DrmFourcc::Xrgb8888, 32)
            .map_err(driver("create dumb buffer"))?;
        let framebuffer = match self.card.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(e) => {
                let _ = self.card.destroy_dumb_buffer(buffer);
                return Err(driver("add framebuffer")(e));
            }
        };
        self.scanout.insert(crtc_id, Scanout { size, buffer, framebuffer });
        Ok(framebuffer)
    }

    fn release_scanout(&mut self, crtc_id: u32) {
        if let Some(old) = self.scanout.remove(&crtc_id) {
            if let Err(e) = self.card.destroy_framebuffer(old.framebuffer) {
                warn!("failed to destroy framebuffer for CRTC {crtc_id}: {e}");
            }
            if let Err(e) = self.card.destroy_dumb_buffer(old.buffer) {
                warn!("failed to destroy dumb buffer for CRTC {crtc_id}: {e}");
            }
        }
    }

    /// Builds the atomic request, pushing every mode blob it creates onto `blobs`.
    fn build_request(&mut self, transaction: &Transaction, blobs: &mut Vec<u64>) -> Result<AtomicModeReq, BackendError> {
        let res = self.card.resource_handles().map_err(driver("resource handles"))?;
        let mut req = AtomicModeReq::new();

        let lit: Vec<u32> = transaction
            .entries
            .iter()
            .flat_map(|e| match &e.action {
                TransactionAction::Enable { connector_ids, .. } => connector_ids.clone(),
                TransactionAction::Disable => Vec::new(),
            })
            .collect();
        for &conn in res.connectors() {
            if !lit.contains(&u32::from(conn)) {
                let props = self.properties(conn)?;
                req.add_property(conn, prop(&props, conn, "CRTC_ID")?, property::Value::CRTC(None));
            }
        }

        for entry in &transaction.entries {
            let crtc: crtc::Handle = control::from_u32(entry.controller_id)
                .ok_or(BackendError::UnknownController(entry.controller_id))?;
            let crtc_props = self.properties(crtc)?;
            let (plane, plane_props) = self.primary_plane(&res, crtc)?;

            let TransactionAction::Enable { timing, width, height, transform, connector_ids, .. } = &entry.action
            else {
                req.add_property(crtc, prop(&crtc_props, crtc, "ACTIVE")?, property::Value::Boolean(false));
                req.add_property(crtc, prop(&crtc_props, crtc, "MODE_ID")?, property::Value::Blob(0));
                req.add_property(plane, prop(&plane_props, plane, "FB_ID")?, property::Value::Framebuffer(None));
                req.add_property(plane, prop(&plane_props, plane, "CRTC_ID")?, property::Value::CRTC(None));
                continue;
            };

            let mode = *self.modes.get(timing).ok_or_else(|| {
                BackendError::CommitRejected(format!(
                    "mode for CRTC {} was not read from this device",
                    entry.controller_id
                ))
            })?;
            let blob = self
                .card
                .create_property_blob(&mode)
                .map_err(driver("create mode blob"))?;
            if let property::Value::Blob(id) = blob {
                blobs.push(id);
            }
            req.add_property(crtc, prop(&crtc_props, crtc, "MODE_ID")?, blob);
            req.add_property(crtc, prop(&crtc_props, crtc, "ACTIVE")?, property::Value::Boolean(true));

            for &id in connector_ids {
                let conn: connector::Handle =
                    control::from_u32(id).ok_or(BackendError::UnknownConnector(id))?;
                let props = self.properties(conn)?;
                req.add_property(conn, prop(&props, conn, "CRTC_ID")?, property::Value::CRTC(Some(crtc)));
            }

            // The buffer is laid out in rotated space, the CRTC in mode space
            let (fb_w, fb_h) = transform.apply_to_size(*width, *height);
            let fb = self.scanout_for(entry.controller_id, (fb_w, fb_h))?;
            if *transform != MonitorTransform::Normal || plane_props.contains_key("rotation") {
                req.add_property(
                    plane,
                    prop(&plane_props, plane, "rotation")?,
                    property::Value::Bitmask(plane_rotation(*transform)),
                );
            }
            let (w, h) = (u64::from(*width), u64::from(*height));
            for (name, value) in [
                ("FB_ID", property::Value::Framebuffer(Some(fb))),
                ("CRTC_ID", property::Value::CRTC(Some(crtc))),
                ("SRC_X", property::Value::UnsignedRange(0)),
                ("SRC_Y", property::Value::UnsignedRange(0)),
                ("SRC_W", property::Value::UnsignedRange(u64::from(fb_w) << 16)),
                ("SRC_H", property::Value::UnsignedRange(u64::from(fb_h) << 16)),
                ("CRTC_X", property::Value::SignedRange(0)),
                ("CRTC_Y", property::Value::SignedRange(0)),
                ("CRTC_W", property::Value::UnsignedRange(w)),
                ("CRTC_H", property::Value::UnsignedRange(h)),
            ] {
                req.add_property(plane, prop(&plane_props, plane, name)?, value);
            }
        }
        Ok(req)
    }
}

impl DisplayBackend for KmsBackend {
    fn name(&self) -> &'static str {
        "kms"
    }

    fn read_resources(&mut self) -> Result<DriverResources, BackendError> {
        let res = self.card.resource_handles().map_err(driver("resource handles"))?;
        self.modes.clear();
        let mut out = DriverResources::default();

        for &handle in res.crtcs() {
            let info = self.card.get_crtc(handle).map_err(driver("get CRTC"))?;
            let (x, y) = info.position();
            let mode = info.mode().map(|m| self.remember(m));
            let transform = self
                .primary_plane(&res, handle)
                .ok()
                .and_then(|(_, props)| props.get("rotation").and_then(|&(_, v)| transform_from_rotation(v)))
                .unwrap_or_default();
            out.crtcs.push(CrtcDescriptor {
                id: handle.into(),
                x: x as i32,
                y: y as i32,
                mode,
                transform,
                gamma_size: info.gamma_length(),
            });
        }

        for &handle in res.encoders() {
            let info = self.card.get_encoder(handle).map_err(driver("get encoder"))?;
            let allowed = res.filter_crtcs(info.possible_crtcs());
            let possible_crtcs = res
                .crtcs()
                .iter()
                .enumerate()
                .filter(|(_, c)| allowed.contains(c))
                .fold(0u32, |mask, (position, _)| mask | (1 << position));
            out.encoders.push(EncoderDescriptor {
                id: handle.into(),
                crtc_id: info.crtc().map(u32::from),
                possible_crtcs,
                possible_clones: info.possible_clones(),
            });
        }

        for &handle in res.connectors() {
            let info = self
                .card
                .get_connector(handle, true)
                .map_err(driver("get connector"))?;
            let (width_mm, height_mm) = info.size().unwrap_or((0, 0));
            let connection = match info.state() {
                connector::State::Connected => ConnectionState::Connected,
                connector::State::Disconnected => ConnectionState::Disconnected,
                connector::State::Unknown => ConnectionState::Unknown,
            };
            let modes = info.modes().iter().map(|m| self.remember(*m)).collect();
            let edid = if connection == ConnectionState::Connected {
                self.read_edid(handle)
            } else {
                None
            };
            out.connectors.push(ConnectorDescriptor {
                id: handle.into(),
                kind: connector_kind(info.interface()),
                kind_id: info.interface_id(),
                connection,
                width_mm,
                height_mm,
                modes,
                encoder_ids: info.encoders().iter().map(|&e| u32::from(e)).collect(),
                current_encoder_id: info.current_encoder().map(u32::from),
                edid,
            });
        }

        debug!(
            "KMS inventory: {} CRTCs, {} encoders, {} connectors",
            out.crtcs.len(),
            out.encoders.len(),
            out.connectors.len()
        );
        Ok(out)
    }

    fn commit(&mut self, transaction: &Transaction) -> Result<(), BackendError> {
        let mut blobs = Vec::new();
        let result = match self.build_request(transaction, &mut blobs) {
            Ok(req) => self
                .card
                .atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
                .map_err(|e| BackendError::CommitRejected(e.to_string())),
            Err(e) => Err(e),
        };
        for blob in blobs {
            if let Err(e) = self.card.destroy_property_blob(blob) {
                warn!("failed to destroy mode blob {blob}: {e}");
            }
        }
        result?;

        for entry in &transaction.entries {
            if entry.action == TransactionAction::Disable {
                self.release_scanout(entry.controller_id);
            }
        }
        Ok(())
    }

    fn gamma(&self, controller_id: u32) -> Result<GammaRamp, BackendError> {
        let crtc: crtc::Handle =
            control::from_u32(controller_id).ok_or(BackendError::UnknownController(controller_id))?;
        let size = self.card.get_crtc(crtc).map_err(driver("get CRTC"))?.gamma_length() as usize;
        let mut ramp = GammaRamp {
            red: vec![0; size],
            green: vec![0; size],
            blue: vec![0; size],
        };
        self.card
            .get_gamma(crtc, &mut ramp.red, &mut ramp.green, &mut ramp.blue)
            .map_err(driver("get gamma"))?;
        Ok(ramp)
    }

    fn set_gamma(&mut self, controller_id: u32, ramp: &GammaRamp) -> Result<(), BackendError> {
        let crtc: crtc::Handle =
            control::from_u32(controller_id).ok_or(BackendError::UnknownController(controller_id))?;
        let expected = self.card.get_crtc(crtc).map_err(driver("get CRTC"))?.gamma_length() as usize;
        let actual = ramp.size().unwrap_or(0);
        if actual != expected {
            return Err(BackendError::GammaSizeMismatch {
                controller: controller_id,
                expected,
                actual,
            });
        }
        self.card
            .set_gamma(crtc, &ramp.red, &ramp.green, &ramp.blue)
            .map_err(driver("set gamma"))
    }

    fn set_power_mode(&mut self, connector_id: u32, mode: PowerSaveMode) -> Result<(), BackendError> {
        let conn: connector::Handle =
            control::from_u32(connector_id).ok_or(BackendError::UnknownConnector(connector_id))?;
        let props = self.properties(conn)?;
        let dpms = prop(&props, conn, "DPMS")?;
        self.card
            .set_property(conn, dpms, mode.dpms_value())
            .map_err(driver("set DPMS"))
    }
}

impl Drop for KmsBackend {
    fn drop(&mut self) {
        let crtcs: Vec<u32> = self.scanout.keys().copied().collect();
        for crtc in crtcs {
            self.release_scanout(crtc);
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn driver(context: &'static str) -> impl Fn(io::Error) -> BackendError {
    move |e| BackendError::Driver(format!("{context}: {e}"))
}

fn prop<H: Into<u32>>(props: &PropertyMap, object: H, name: &'static str) -> Result<property::Handle, BackendError> {
    props
        .get(name)
        .map(|&(handle, _)| handle)
        .ok_or(BackendError::MissingProperty {
            object: object.into(),
            name,
        })
}

/// Serialises every timing field of a driver mode into identity bytes.
fn raw_mode(mode: &DrmMode) -> RawMode {
    let (hdisplay, vdisplay) = mode.size();
    let (hsync_start, hsync_end, htotal) = mode.hsync();
    let (vsync_start, vsync_end, vtotal) = mode.vsync();

    let mut timing = Vec::with_capacity(36);
    timing.extend_from_slice(&mode.clock().to_le_bytes());
    for field in [
        hdisplay, hsync_start, hsync_end, htotal, mode.hskew(),
        vdisplay, vsync_start, vsync_end, vtotal, mode.vscan(),
    ] {
        timing.extend_from_slice(&field.to_le_bytes());
    }
    timing.extend_from_slice(&mode.vrefresh().to_le_bytes());
    timing.extend_from_slice(&mode.flags().bits().to_le_bytes());

    let mut refresh_rate = if htotal == 0 || vtotal == 0 {
        f64::from(mode.vrefresh())
    } else {
        f64::from(mode.clock()) * 1000.0 / (f64::from(htotal) * f64::from(vtotal))
    };
    if mode.flags().contains(ModeFlags::INTERLACE) {
        refresh_rate *= 2.0;
    }
    if mode.flags().contains(ModeFlags::DBLSCAN) {
        refresh_rate /= 2.0;
    }

    RawMode {
        name: mode.name().to_string_lossy().into_owned(),
        width: u32::from(hdisplay),
        height: u32::from(vdisplay),
        refresh_rate,
        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
        timing,
    }
}

fn connector_kind(interface: connector::Interface) -> ConnectorKind {
    use connector::Interface;
    match interface {
        Interface::VGA => ConnectorKind::Vga,
        Interface::DVII => ConnectorKind::DviI,
        Interface::DVID => ConnectorKind::DviD,
        Interface::DVIA => ConnectorKind::DviA,
        Interface::Composite => ConnectorKind::Composite,
        Interface::SVideo => ConnectorKind::SVideo,
        Interface::LVDS => ConnectorKind::Lvds,
        Interface::Component => ConnectorKind::Component,
        Interface::NinePinDIN => ConnectorKind::NinePinDin,
        Interface::DisplayPort => ConnectorKind::DisplayPort,
        Interface::HDMIA => ConnectorKind::HdmiA,
        Interface::HDMIB => ConnectorKind::HdmiB,
        Interface::TV => ConnectorKind::Tv,
        Interface::EmbeddedDisplayPort => ConnectorKind::EmbeddedDisplayPort,
        Interface::Virtual => ConnectorKind::Virtual,
        Interface::DSI => ConnectorKind::Dsi,
        Interface::DPI => ConnectorKind::Dpi,
        Interface::Writeback => ConnectorKind::Writeback,
        Interface::SPI => ConnectorKind::Spi,
        Interface::USB => ConnectorKind::Usb,
        _ => ConnectorKind::Unknown,
    }
}
