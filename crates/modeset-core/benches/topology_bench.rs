//! Criterion benchmarks for topology construction and apply staging.
//!
//! Both run on every hot-plug, so they should stay well under a frame even
//! for unusually large machines.
//!
//! Run with:
//! ```bash
//! cargo bench --package modeset-core --bench topology_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modeset_core::{
    build_topology, ConnectionState, ConnectorDescriptor, ConnectorKind, ControllerAssignment,
    CrtcDescriptor, DriverResources, EncoderDescriptor, MonitorTransform, RawMode,
};

// ── Fixture builders ──────────────────────────────────────────────────────────

/// `n` controllers, `n` encoders and `n` DisplayPort connectors.
///
/// Encoder i can reach every controller and may clone with its neighbour, so
/// the clone scan has real work to do.
fn build_resources(n: usize) -> DriverResources {
    let all_crtcs = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
    DriverResources {
        crtcs: (0..n as u32)
            .map(|i| CrtcDescriptor {
                id: 100 + i,
                x: 0,
                y: 0,
                mode: None,
                transform: MonitorTransform::Normal,
                gamma_size: 256,
            })
            .collect(),
        encoders: (0..n as u32)
            .map(|i| EncoderDescriptor {
                id: 200 + i,
                crtc_id: None,
                possible_crtcs: all_crtcs,
                possible_clones: 1 << (i ^ 1).min(31),
            })
            .collect(),
        connectors: (0..n as u32)
            .map(|i| ConnectorDescriptor {
                id: 300 + i,
                kind: ConnectorKind::DisplayPort,
                kind_id: i + 1,
                connection: ConnectionState::Connected,
                width_mm: 600,
                height_mm: 340,
                modes: (0..8u8)
                    .map(|m| RawMode {
                        name: format!("mode-{m}"),
                        width: 1920,
                        height: 1080,
                        refresh_rate: 60.0,
                        preferred: m == 0,
                        timing: vec![m, 1, 2, 3],
                    })
                    .collect(),
                encoder_ids: vec![200 + i],
                current_encoder_id: None,
                edid: None,
            })
            .collect(),
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_build_topology(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_topology");
    for n in [2usize, 8, 32] {
        let res = build_resources(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &res, |b, res| {
            b.iter(|| build_topology(black_box(res)))
        });
    }
    group.finish();
}

fn bench_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage");
    for n in [2usize, 8, 32] {
        let topo = build_topology(&build_resources(n));
        let layout: Vec<ControllerAssignment> = topo
            .connectors()
            .iter()
            .zip(topo.controllers())
            .enumerate()
            .map(|(i, (connector, controller))| ControllerAssignment {
                controller_id: controller.id,
                mode: connector.preferred_mode,
                x: 1920 * i as i32,
                y: 0,
                transform: MonitorTransform::Normal,
                connector_ids: vec![connector.id],
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &layout, |b, layout| {
            b.iter(|| {
                let mut snapshot = topo.clone();
                snapshot.stage(black_box(layout), &[])
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_topology, bench_stage);
criterion_main!(benches);
