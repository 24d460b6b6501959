//! ResolveLayout use case: turns a stored profile into a desired layout.
//!
//! Profiles name outputs the way a person would ("HDMI-1 at 1920,0 in
//! 2560x1440"), while [`TopologyService::apply_configuration`] wants driver
//! ids, mode ids and a controller for every lit output.  [`resolve_profile`]
//! bridges the two against a live snapshot.
//!
//! # Controller choice
//!
//! 1. **Clones share.**  An entry with `clone_of` rides on the controller of
//!    the entry it names, provided the two connectors may clone.  The group
//!    gets one mode that every member supports.
//! 2. **Restore first.**  An output that is already lit prefers its current
//!    controller, so a re-apply avoids needless full mode-sets.
//! 3. **Then lowest free.**  Other controllers are tried in ascending order,
//!    idle ones before ones another output of the profile is lit on.
//! 4. **No dead ends.**  If a choice leaves a later output stranded, the
//!    search backs up and tries the next controller.  The profile is refused
//!    only when no assignment covers every output.
//!
//! [`TopologyService::apply_configuration`]: crate::application::manage_topology::TopologyService::apply_configuration

use modeset_core::{
    Connector, ControllerAssignment, ModeId, MonitorTransform, OutputAssignment, TopologySnapshot,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Error type for profile resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("profile \"{profile}\" names connector {connector}, which is not connected")]
    UnknownConnector { profile: String, connector: String },

    #[error("connector {connector} appears more than once in the profile")]
    DuplicateConnector { connector: String },

    #[error("\"{spec}\" is not a WIDTHxHEIGHT mode for {connector}")]
    InvalidModeSpec { connector: String, spec: String },

    #[error("{connector} has no mode matching {spec}")]
    NoMatchingMode { connector: String, spec: String },

    #[error("{connector} reports no modes")]
    NoModes { connector: String },

    #[error("no free controller can drive {connector}")]
    NoFreeController { connector: String },

    #[error("{connector} clones {clone_of}, which is not a lit entry of the profile")]
    UnknownCloneSource { connector: String, clone_of: String },

    #[error("{connector} cannot share a controller with {clone_of}")]
    NotCloneable { connector: String, clone_of: String },

    #[error("{connector} and {clone_of} have no mode in common")]
    NoCommonMode { connector: String, clone_of: String },
}

/// A named multi-monitor arrangement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutProfile {
    pub name: String,
    #[serde(default)]
    pub outputs: Vec<OutputProfile>,
}

/// One output inside a [`LayoutProfile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputProfile {
    /// Connector name such as `"HDMI-1"`.
    pub connector: String,
    /// `"WIDTHxHEIGHT"`; the preferred mode when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Refresh rate in Hz; any rate for the size when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<f64>,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub transform: MonitorTransform,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub presentation: bool,
    /// Share this connector's controller instead of taking one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_of: Option<String>,
}

/// Desired layout ready for `apply_configuration`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedLayout {
    pub controllers: Vec<ControllerAssignment>,
    pub outputs: Vec<OutputAssignment>,
}

/// Returns `true` if every connector the profile names is connected.
pub fn profile_matches(profile: &LayoutProfile, topo: &TopologySnapshot) -> bool {
    !profile.outputs.is_empty()
        && profile
            .outputs
            .iter()
            .all(|o| topo.connector_by_name(&o.connector).is_some())
}

/// Parses `"1920x1080"` into `(1920, 1080)`.
pub fn parse_mode_spec(spec: &str) -> Option<(u32, u32)> {
    let (w, h) = spec.trim().split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Resolves `profile` against `topo`.
///
/// Connectors the profile does not mention are left out, so applying the
/// result switches them off.
///
/// # Errors
///
/// Returns a [`ProfileError`] naming the first entry that cannot be resolved.
pub fn resolve_profile(profile: &LayoutProfile, topo: &TopologySnapshot) -> Result<ResolvedLayout, ProfileError> {
    // Connector lookup for every entry
    let mut indices = Vec::with_capacity(profile.outputs.len());
    for entry in &profile.outputs {
        let index = topo
            .connectors()
            .iter()
            .position(|c| c.name == entry.connector)
            .ok_or_else(|| ProfileError::UnknownConnector {
                profile: profile.name.clone(),
                connector: entry.connector.clone(),
            })?;
        if indices.contains(&index) {
            return Err(ProfileError::DuplicateConnector { connector: entry.connector.clone() });
        }
        indices.push(index);
    }

    // Clone entries hang off a lit source entry
    let mut source_of = vec![None; profile.outputs.len()];
    for (i, entry) in profile.outputs.iter().enumerate() {
        let Some(source) = &entry.clone_of else {
            continue;
        };
        let source_entry = profile
            .outputs
            .iter()
            .position(|o| &o.connector == source && o.clone_of.is_none())
            .ok_or_else(|| ProfileError::UnknownCloneSource {
                connector: entry.connector.clone(),
                clone_of: source.clone(),
            })?;
        source_of[i] = Some(source_entry);
    }

    let lit: Vec<usize> = (0..profile.outputs.len()).filter(|&i| source_of[i].is_none()).collect();

    // Entries driven by each lit entry's controller, lead first
    let mut members: Vec<Vec<usize>> = profile.outputs.iter().map(|_| Vec::new()).collect();
    for &lead in &lit {
        members[lead].push(lead);
    }
    for (i, source) in source_of.iter().enumerate() {
        let Some(lead) = *source else {
            continue;
        };
        let me = indices[i];
        let legal = members[lead].iter().all(|&other| {
            let other = indices[other];
            topo.connectors()[me].can_clone_with(other) && topo.connectors()[other].can_clone_with(me)
        });
        if !legal {
            return Err(ProfileError::NotCloneable {
                connector: profile.outputs[i].connector.clone(),
                clone_of: profile.outputs[lead].connector.clone(),
            });
        }
        members[lead].push(i);
    }

    let modes = lit
        .iter()
        .map(|&lead| pick_group_mode(profile, lead, &members[lead][1..], &indices, topo))
        .collect::<Result<Vec<_>, _>>()?;

    let claimed = match_controllers(profile, &lit, &members, &indices, topo)?;

    let controllers = lit
        .iter()
        .zip(claimed)
        .zip(modes)
        .map(|((&i, controller), mode)| {
            let entry = &profile.outputs[i];
            ControllerAssignment {
                controller_id: topo.controllers()[controller].id,
                mode: Some(mode),
                x: entry.x,
                y: entry.y,
                transform: entry.transform,
                connector_ids: members[i].iter().map(|&m| topo.connectors()[indices[m]].id).collect(),
            }
        })
        .collect::<Vec<_>>();

    let outputs = profile
        .outputs
        .iter()
        .zip(&indices)
        .map(|(entry, &index)| OutputAssignment {
            connector_id: topo.connectors()[index].id,
            is_primary: entry.primary,
            is_presentation: entry.presentation,
        })
        .collect();

    debug!(
        "profile \"{}\" resolved to {} controller(s)",
        profile.name,
        controllers.len()
    );
    Ok(ResolvedLayout { controllers, outputs })
}

// ── Controller matching ───────────────────────────────────────────────────────

/// Gives every lit entry its own controller, returned in `lit` order.
///
/// Each entry ranks the controllers its whole clone group can reach: the one
/// it is lit on now, then idle ones, then ones another entry is lit on, each
/// tier in ascending order.  Entries are placed most constrained first and a
/// depth-first search backs out of dead ends, so a layout is only refused
/// when no complete assignment exists.
fn match_controllers(
    profile: &LayoutProfile,
    lit: &[usize],
    members: &[Vec<usize>],
    indices: &[usize],
    topo: &TopologySnapshot,
) -> Result<Vec<usize>, ProfileError> {
    let controller_count = topo.controllers().len();

    // Which lit entry, if any, currently holds each controller
    let mut owner: Vec<Option<usize>> = vec![None; controller_count];
    for (k, &lead) in lit.iter().enumerate() {
        for &m in &members[lead] {
            if let Some(current) = topo.connectors()[indices[m]].controller {
                owner[current].get_or_insert(k);
            }
        }
    }

    let options: Vec<Vec<usize>> = lit
        .iter()
        .enumerate()
        .map(|(k, &lead)| {
            let mut usable: Vec<usize> = (0..controller_count)
                .filter(|&c| {
                    members[lead]
                        .iter()
                        .all(|&m| topo.connectors()[indices[m]].can_use_controller(c))
                })
                .collect();
            usable.sort_by_key(|&c| match owner[c] {
                Some(o) if o == k => (0, c),
                None => (1, c),
                Some(_) => (2, c),
            });
            usable
        })
        .collect();

    // Stable sort: ties keep profile order
    let mut order: Vec<usize> = (0..lit.len()).collect();
    order.sort_by_key(|&k| options[k].len());

    let mut search = Search {
        order: &order,
        options: &options,
        taken: vec![false; controller_count],
        claimed: vec![None; lit.len()],
        deepest: 0,
    };
    if !search.place(0) {
        let stuck = lit[order[search.deepest]];
        return Err(ProfileError::NoFreeController {
            connector: profile.outputs[stuck].connector.clone(),
        });
    }
    Ok(search.claimed.into_iter().flatten().collect())
}

struct Search<'a> {
    order: &'a [usize],
    options: &'a [Vec<usize>],
    taken: Vec<bool>,
    claimed: Vec<Option<usize>>,
    /// Furthest position in `order` the search reached.
    deepest: usize,
}

impl Search<'_> {
    fn place(&mut self, depth: usize) -> bool {
        let Some(&k) = self.order.get(depth) else {
            return true;
        };
        self.deepest = self.deepest.max(depth);
        let options = self.options;
        for &c in &options[k] {
            if self.taken[c] {
                continue;
            }
            self.taken[c] = true;
            self.claimed[k] = Some(c);
            if self.place(depth + 1) {
                return true;
            }
            self.taken[c] = false;
            self.claimed[k] = None;
        }
        false
    }
}

// ── Mode choice ───────────────────────────────────────────────────────────────

/// Picks one mode every member of a clone group can scan out.
///
/// Each member narrows the lead's list by its own `mode`/`refresh`; a member
/// without a spec accepts any mode its connector lists.  The lead's preferred
/// mode wins when it survives, otherwise the first survivor in the lead's
/// driver order.
fn pick_group_mode(
    profile: &LayoutProfile,
    lead: usize,
    clones: &[usize],
    indices: &[usize],
    topo: &TopologySnapshot,
) -> Result<ModeId, ProfileError> {
    let lead_connector = &topo.connectors()[indices[lead]];
    let mut common = acceptable_modes(&profile.outputs[lead], lead_connector, topo)?;

    for &clone in clones {
        let entry = &profile.outputs[clone];
        let own = acceptable_modes(entry, &topo.connectors()[indices[clone]], topo)?;
        common.retain(|id| own.contains(id));
        if common.is_empty() {
            return Err(ProfileError::NoCommonMode {
                connector: entry.connector.clone(),
                clone_of: lead_connector.name.clone(),
            });
        }
    }

    Ok(lead_connector
        .preferred_mode
        .filter(|p| common.contains(p))
        .unwrap_or(common[0]))
}

/// Modes of `connector` that satisfy `entry`, in driver order; never empty.
fn acceptable_modes(entry: &OutputProfile, connector: &Connector, topo: &TopologySnapshot) -> Result<Vec<ModeId>, ProfileError> {
    let Some(spec) = &entry.mode else {
        if connector.modes.is_empty() {
            return Err(ProfileError::NoModes { connector: connector.name.clone() });
        }
        return Ok(connector.modes.clone());
    };
    let (width, height) = parse_mode_spec(spec).ok_or_else(|| ProfileError::InvalidModeSpec {
        connector: connector.name.clone(),
        spec: spec.clone(),
    })?;

    let candidates: Vec<ModeId> = connector
        .modes
        .iter()
        .copied()
        .filter(|&id| {
            topo.mode(id).is_some_and(|m| {
                m.width == width
                    && m.height == height
                    && entry.refresh.map_or(true, |hz| m.matches_refresh(hz))
            })
        })
        .collect();

    if candidates.is_empty() {
        return Err(ProfileError::NoMatchingMode {
            connector: connector.name.clone(),
            spec: match entry.refresh {
                Some(hz) => format!("{spec}@{hz}"),
                None => spec.clone(),
            },
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::test_backend::TestBackend;
    use crate::infrastructure::backend::DisplayBackend;
    use modeset_core::build_topology;

    fn sample_topology() -> TopologySnapshot {
        let mut backend = TestBackend::sample();
        build_topology(&backend.read_resources().expect("read"))
    }

    fn output(connector: &str) -> OutputProfile {
        OutputProfile {
            connector: connector.to_string(),
            mode: None,
            refresh: None,
            x: 0,
            y: 0,
            transform: MonitorTransform::Normal,
            primary: false,
            presentation: false,
            clone_of: None,
        }
    }

    fn profile(outputs: Vec<OutputProfile>) -> LayoutProfile {
        LayoutProfile { name: "desk".to_string(), outputs }
    }

    #[test]
    fn test_parse_mode_spec_accepts_width_x_height() {
        assert_eq!(parse_mode_spec("2560x1440"), Some((2560, 1440)));
        assert_eq!(parse_mode_spec(" 1920X1080 "), Some((1920, 1080)));
        assert_eq!(parse_mode_spec("1920"), None);
        assert_eq!(parse_mode_spec("wide x tall"), None);
    }

    #[test]
    fn test_currently_lit_output_keeps_its_controller() {
        let topo = sample_topology();
        let layout = resolve_profile(&profile(vec![output("eDP-1")]), &topo).expect("resolve");

        assert_eq!(layout.controllers.len(), 1);
        assert_eq!(layout.controllers[0].controller_id, 40);
        assert_eq!(layout.controllers[0].connector_ids, vec![60]);
    }

    #[test]
    fn test_restore_happens_before_lowest_free_assignment() {
        // HDMI-1 is listed first and could take CRTC 40, but eDP-1 is already
        // lit there and can reach nothing else.
        let topo = sample_topology();
        let mut hdmi = output("HDMI-1");
        hdmi.x = 1920;

        let layout = resolve_profile(&profile(vec![hdmi, output("eDP-1")]), &topo).expect("resolve");

        let crtc_of = |id: u32| {
            layout
                .controllers
                .iter()
                .find(|c| c.connector_ids.contains(&id))
                .map(|c| c.controller_id)
        };
        assert_eq!(crtc_of(60), Some(40));
        assert_eq!(crtc_of(61), Some(41));
    }

    #[test]
    fn test_mode_spec_with_refresh_selects_exact_mode() {
        let topo = sample_topology();
        let mut dp = output("DP-1");
        dp.mode = Some("2560x1440".to_string());
        dp.refresh = Some(144.0);

        let layout = resolve_profile(&profile(vec![dp]), &topo).expect("resolve");

        let mode = topo.mode(layout.controllers[0].mode.unwrap()).unwrap();
        assert!(mode.matches_refresh(144.0));
    }

    #[test]
    fn test_mode_spec_without_refresh_prefers_preferred_mode() {
        let topo = sample_topology();
        let mut dp = output("DP-1");
        dp.mode = Some("2560x1440".to_string());

        let layout = resolve_profile(&profile(vec![dp]), &topo).expect("resolve");

        let dp_preferred = topo.connector_by_name("DP-1").unwrap().preferred_mode;
        assert_eq!(layout.controllers[0].mode, dp_preferred);
    }

    #[test]
    fn test_unknown_mode_and_connector_are_reported() {
        let topo = sample_topology();
        let mut hdmi = output("HDMI-1");
        hdmi.mode = Some("3840x2160".to_string());

        assert!(matches!(
            resolve_profile(&profile(vec![hdmi]), &topo),
            Err(ProfileError::NoMatchingMode { .. })
        ));
        assert!(matches!(
            resolve_profile(&profile(vec![output("VGA-1")]), &topo),
            Err(ProfileError::UnknownConnector { .. })
        ));
    }

    #[test]
    fn test_clone_entry_shares_source_controller() {
        let topo = sample_topology();
        let mut dp = output("DP-1");
        dp.clone_of = Some("HDMI-1".to_string());

        let layout = resolve_profile(&profile(vec![output("HDMI-1"), dp]), &topo).expect("resolve");

        assert_eq!(layout.controllers.len(), 1);
        assert_eq!(layout.controllers[0].connector_ids, vec![61, 62]);
        topo.validate(&layout.controllers, &layout.outputs).expect("layout must validate");
    }

    #[test]
    fn test_clone_of_non_partner_is_rejected() {
        let topo = sample_topology();
        let mut hdmi = output("HDMI-1");
        hdmi.clone_of = Some("eDP-1".to_string());

        let err = resolve_profile(&profile(vec![output("eDP-1"), hdmi]), &topo).unwrap_err();

        assert!(matches!(err, ProfileError::NotCloneable { .. }));
    }

    #[test]
    fn test_profile_needing_more_controllers_than_reachable_fails() {
        // Without CRTC 42, eDP-1 and DP-1 each have one controller left and
        // take CRTC 40 and 41, which leaves HDMI-1 with nothing.
        let mut backend = TestBackend::sample();
        backend.resources_mut().crtcs.pop();
        let topo = build_topology(&backend.read_resources().expect("read"));
        let outputs = vec![output("eDP-1"), output("HDMI-1"), output("DP-1")];

        let err = resolve_profile(&profile(outputs), &topo).unwrap_err();

        assert_eq!(err, ProfileError::NoFreeController { connector: "HDMI-1".to_string() });
    }

    #[test]
    fn test_cold_boot_profile_order_does_not_strand_the_panel() {
        // Arrange: nothing lit, HDMI-1 listed before the panel it could starve
        let mut backend = TestBackend::sample();
        let resources = backend.resources_mut();
        resources.crtcs[0].mode = None;
        resources.encoders[0].crtc_id = None;
        for connector in &mut resources.connectors {
            connector.current_encoder_id = None;
        }
        let topo = build_topology(&backend.read_resources().expect("read"));
        let mut hdmi = output("HDMI-1");
        hdmi.x = 1920;

        // Act
        let layout = resolve_profile(&profile(vec![hdmi, output("eDP-1")]), &topo).expect("resolve");

        // Assert: panel gets the only CRTC it can reach, profile order is kept
        let ids: Vec<(u32, Vec<u32>)> = layout
            .controllers
            .iter()
            .map(|c| (c.controller_id, c.connector_ids.clone()))
            .collect();
        assert_eq!(ids, vec![(41, vec![61]), (40, vec![60])]);
        topo.validate(&layout.controllers, &layout.outputs).expect("layout must validate");
    }

    #[test]
    fn test_all_three_outputs_fit_on_three_controllers() {
        let topo = sample_topology();
        let outputs = vec![output("DP-1"), output("HDMI-1"), output("eDP-1")];

        let layout = resolve_profile(&profile(outputs), &topo).expect("resolve");

        let crtcs: Vec<u32> = layout.controllers.iter().map(|c| c.controller_id).collect();
        assert_eq!(crtcs, vec![42, 41, 40]);
    }

    // ── Clone modes ───────────────────────────────────────────────────────────

    #[test]
    fn test_clone_group_falls_back_to_mode_both_connectors_support() {
        // DP-1 prefers 2560x1440, which HDMI-1 cannot show
        let topo = sample_topology();
        let mut hdmi = output("HDMI-1");
        hdmi.clone_of = Some("DP-1".to_string());

        let layout = resolve_profile(&profile(vec![output("DP-1"), hdmi]), &topo).expect("resolve");

        let mode = topo.mode(layout.controllers[0].mode.unwrap()).unwrap();
        assert_eq!((mode.width, mode.height), (1920, 1080));
        assert_eq!(layout.controllers[0].connector_ids, vec![62, 61]);
        topo.validate(&layout.controllers, &layout.outputs).expect("layout must validate");
    }

    #[test]
    fn test_clone_group_without_common_mode_is_rejected() {
        let topo = sample_topology();
        let mut dp = output("DP-1");
        dp.mode = Some("2560x1440".to_string());
        let mut hdmi = output("HDMI-1");
        hdmi.clone_of = Some("DP-1".to_string());

        let err = resolve_profile(&profile(vec![dp, hdmi]), &topo).unwrap_err();

        assert_eq!(
            err,
            ProfileError::NoCommonMode { connector: "HDMI-1".to_string(), clone_of: "DP-1".to_string() }
        );
    }

    #[test]
    fn test_clone_entry_mode_spec_narrows_group_mode() {
        let topo = sample_topology();
        let mut hdmi = output("HDMI-1");
        hdmi.mode = Some("1280x720".to_string());
        let mut dp = output("DP-1");
        dp.clone_of = Some("HDMI-1".to_string());
        dp.mode = Some("1920x1080".to_string());

        // The clone's own spec is honoured, not silently replaced
        let err = resolve_profile(&profile(vec![hdmi, dp]), &topo).unwrap_err();

        assert!(matches!(err, ProfileError::NoCommonMode { .. }));
    }

    #[test]
    fn test_profile_matches_only_when_all_connectors_present() {
        let topo = sample_topology();
        assert!(profile_matches(&profile(vec![output("eDP-1"), output("DP-1")]), &topo));
        assert!(!profile_matches(&profile(vec![output("eDP-1"), output("DP-2")]), &topo));
        assert!(!profile_matches(&profile(vec![]), &topo));
    }
}
