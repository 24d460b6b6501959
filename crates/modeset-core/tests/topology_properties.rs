//! Integration tests for topology resolution and the apply pass.
//!
//! These drive the public API only: driver descriptors go in, a snapshot
//! comes out, and desired layouts are staged and committed against it.

use modeset_core::{
    build_topology, ConnectionState, ConnectorDescriptor, ConnectorKind, ControllerAssignment,
    CrtcDescriptor, DriverResources, EncoderDescriptor, ModeId, MonitorTransform, RawMode, Rect,
    ScreenSize, TopologySnapshot, Transaction, TransactionAction,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn mode(width: u32, height: u32, tag: u8) -> RawMode {
    RawMode {
        name: format!("{width}x{height}"),
        width,
        height,
        refresh_rate: 60.0,
        preferred: true,
        timing: vec![tag, 0xAA],
    }
}

fn crtc(id: u32) -> CrtcDescriptor {
    CrtcDescriptor {
        id,
        x: 0,
        y: 0,
        mode: None,
        transform: MonitorTransform::Normal,
        gamma_size: 1024,
    }
}

fn encoder(id: u32, possible_crtcs: u32, possible_clones: u32) -> EncoderDescriptor {
    EncoderDescriptor { id, crtc_id: None, possible_crtcs, possible_clones }
}

fn connector(id: u32, kind: ConnectorKind, encoders: &[u32], modes: Vec<RawMode>) -> ConnectorDescriptor {
    ConnectorDescriptor {
        id,
        kind,
        kind_id: 1,
        connection: ConnectionState::Connected,
        width_mm: 530,
        height_mm: 300,
        modes,
        encoder_ids: encoders.to_vec(),
        current_encoder_id: None,
        edid: None,
    }
}

/// Three controllers; HDMI-1 reaches {0, 1}, DP-1 reaches {1, 2}.
fn workstation() -> DriverResources {
    DriverResources {
        crtcs: vec![crtc(31), crtc(32), crtc(33)],
        encoders: vec![encoder(41, 0b011, 0), encoder(42, 0b110, 0)],
        connectors: vec![
            connector(51, ConnectorKind::HdmiA, &[41], vec![mode(1920, 1080, 1)]),
            connector(52, ConnectorKind::DisplayPort, &[42], vec![mode(2560, 1440, 2)]),
        ],
    }
}

fn preferred(topo: &TopologySnapshot, name: &str) -> ModeId {
    topo.connector_by_name(name)
        .and_then(|c| c.preferred_mode)
        .expect("connector must have a preferred mode")
}

fn lit(controller_id: u32, mode: ModeId, x: i32, connectors: &[u32]) -> ControllerAssignment {
    ControllerAssignment {
        controller_id,
        mode: Some(mode),
        x,
        y: 0,
        transform: MonitorTransform::Normal,
        connector_ids: connectors.to_vec(),
    }
}

fn accept(_: &Transaction) -> Result<(), String> {
    Ok(())
}

// ── Transform algebra ─────────────────────────────────────────────────────────

#[test]
fn test_transform_group_laws_hold_for_every_element() {
    for t in MonitorTransform::ALL {
        assert_eq!(t.compose(t.invert()), MonitorTransform::Normal, "{t:?}");
        assert_eq!(t.invert().invert(), t, "{t:?}");
        for o in MonitorTransform::ALL {
            assert_eq!(t.compose(t.relative(o)), o, "{t:?} -> {o:?}");
        }
    }
}

#[test]
fn test_transform_named_scenarios() {
    assert_eq!(
        MonitorTransform::Rotate90.compose(MonitorTransform::Rotate270),
        MonitorTransform::Normal
    );
    assert_eq!(
        MonitorTransform::Flipped.relative(MonitorTransform::Flipped180),
        MonitorTransform::Rotate180
    );
}

// ── Inventory ─────────────────────────────────────────────────────────────────

#[test]
fn test_sole_possible_controller_sets_exactly_its_local_bit() {
    for position in 0..3 {
        let res = DriverResources {
            crtcs: vec![crtc(31), crtc(32), crtc(33)],
            encoders: vec![encoder(41, 1 << position, 0)],
            connectors: vec![connector(51, ConnectorKind::HdmiA, &[41], vec![mode(1920, 1080, 1)])],
        };

        let topo = build_topology(&res);

        let bits: Vec<usize> = topo.connectors()[0].reachable_controllers.iter().collect();
        assert_eq!(bits, vec![position]);
        assert_eq!(topo.controllers()[position].id, res.crtcs[position].id);
    }
}

#[test]
fn test_rebuilding_from_same_descriptors_yields_same_clone_relation() {
    let res = DriverResources {
        crtcs: vec![crtc(31), crtc(32)],
        encoders: vec![encoder(41, 0b11, 0b10), encoder(42, 0b11, 0b01), encoder(43, 0b11, 0)],
        connectors: vec![
            connector(53, ConnectorKind::Vga, &[43], vec![mode(1024, 768, 3)]),
            connector(51, ConnectorKind::HdmiA, &[41], vec![mode(1920, 1080, 1)]),
            connector(52, ConnectorKind::DisplayPort, &[42], vec![mode(1920, 1080, 1)]),
        ],
    };

    let first = build_topology(&res);
    let second = build_topology(&res);

    let clones = |t: &TopologySnapshot| -> Vec<(String, Vec<usize>)> {
        t.connectors().iter().map(|c| (c.name.clone(), c.clones.clone())).collect()
    };
    assert_eq!(clones(&first), clones(&second));
    assert_eq!(first.clone_groups(), second.clone_groups());
    let hdmi = first.connector_by_name("HDMI-1").expect("HDMI-1");
    let dp_index = first.connector_index(52).expect("DP-1");
    assert!(hdmi.can_clone_with(dp_index));
}

#[test]
fn test_snapshot_from_json_fixture() {
    let json = r#"{
        "crtcs": [{ "id": 31, "x": 0, "y": 0, "gamma_size": 256 }],
        "encoders": [{ "id": 41, "crtc_id": null, "possible_crtcs": 1, "possible_clones": 0 }],
        "connectors": [{
            "id": 51, "kind": "EmbeddedDisplayPort", "kind_id": 1, "connection": "Connected",
            "modes": [{ "name": "1920x1200", "width": 1920, "height": 1200,
                        "refresh_rate": 60.0, "timing": [7, 7] }],
            "encoder_ids": [41]
        }]
    }"#;

    let res: DriverResources = serde_json::from_str(json).expect("fixture must parse");
    let topo = build_topology(&res);

    assert_eq!(topo.connectors()[0].name, "eDP-1");
    assert!(topo.issues().is_empty());
}

// ── Apply ─────────────────────────────────────────────────────────────────────

#[test]
fn test_workstation_layout_spans_4480_by_1440() {
    // Arrange
    let mut topo = build_topology(&workstation());
    let layout = vec![
        lit(31, preferred(&topo, "HDMI-1"), 0, &[51]),
        lit(32, preferred(&topo, "DP-1"), 1920, &[52]),
    ];

    // Act
    let size = topo.apply_with(&layout, &[], accept).expect("apply must succeed");

    // Assert
    assert_eq!(size, ScreenSize { width: 4480, height: 1440 });
    assert_eq!(topo.screen_size(), size);
    let third = topo.controller_by_id(33).expect("controller 33");
    assert!(!third.is_enabled());
    assert_eq!(third.rect, Rect::EMPTY);
}

#[test]
fn test_single_controller_layout_disables_the_other_two() {
    let mut topo = build_topology(&workstation());
    let layout = vec![lit(31, preferred(&topo, "HDMI-1"), 0, &[51])];

    let transaction = topo.stage(&layout, &[]).expect("stage must succeed");
    topo.complete_commit();

    for id in [32, 33] {
        assert_eq!(transaction.entry(id).map(|e| &e.action), Some(&TransactionAction::Disable));
        let index = topo.controller_index(id).expect("controller");
        assert_eq!(topo.controllers()[index].mode, None);
        assert_eq!(topo.controllers()[index].rect, Rect::EMPTY);
        assert_eq!(topo.connectors_on(index).count(), 0);
    }
}

#[test]
fn test_applying_twice_produces_identical_snapshots() {
    let mut topo = build_topology(&workstation());
    let layout = vec![
        lit(31, preferred(&topo, "HDMI-1"), 0, &[51]),
        lit(32, preferred(&topo, "DP-1"), 1920, &[52]),
    ];

    let first_size = topo.apply_with(&layout, &[], accept).expect("first");
    let first: Vec<Rect> = topo.controllers().iter().map(|c| c.rect).collect();
    let second_size = topo.apply_with(&layout, &[], accept).expect("second");
    let second: Vec<Rect> = topo.controllers().iter().map(|c| c.rect).collect();

    assert_eq!(first_size, second_size);
    assert_eq!(first, second);
}

#[test]
fn test_transaction_serialises_for_recording() {
    let mut topo = build_topology(&workstation());
    let layout = vec![lit(31, preferred(&topo, "HDMI-1"), 0, &[51])];

    let transaction = topo.stage(&layout, &[]).expect("stage");
    let json = serde_json::to_value(&transaction).expect("serialise");

    assert_eq!(json["entries"][0]["action"], "enable");
    assert_eq!(json["entries"][1]["action"], "disable");
    let back: Transaction = serde_json::from_value(json).expect("deserialise");
    assert_eq!(back, transaction);
}
