//! Topology domain: the snapshot arena and the passes that build and mutate it.
//!
//! Read path, leaves first: [`mode`] pools timings, [`inventory`] materialises
//! the arena, [`compat`] folds encoder masks per connector, and
//! [`clone_groups`] decides who may share a controller.  Write path:
//! [`apply`] stages a desired layout and produces the transaction.

/// Apply pass: validate, stage, and finalise a desired layout.
pub mod apply;
/// Clone lists and clone groups.
pub mod clone_groups;
/// Per-connector capability masks.
pub mod compat;
/// Driver descriptors → [`topology::TopologySnapshot`].
pub mod inventory;
pub mod mask;
pub mod mode;
pub mod topology;
/// The 8-element rotation/flip group.
pub mod transform;
