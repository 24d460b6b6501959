//! Application layer use cases for the display manager.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (the pure topology rules in `modeset_core`) and the infrastructure (the
//! kernel driver, the config file).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "light up
//!   the desk monitors the way they were last time").
//! - **Depend on abstractions** (the [`DisplayBackend`] trait) rather than
//!   concrete drivers, so tests can run without a GPU.
//! - **Contain no ioctls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`manage_topology`** – Owns the current [`TopologySnapshot`], re-reads
//!   it from the driver and applies desired configurations atomically.
//!
//! - **`output_controls`** – Gamma tables and monitor power state.
//!
//! - **`resolve_layout`** – Turns a named profile from the config file into
//!   concrete controller and output assignments.
//!
//! [`DisplayBackend`]: crate::infrastructure::backend::DisplayBackend
//! [`TopologySnapshot`]: modeset_core::TopologySnapshot

pub mod manage_topology;
pub mod output_controls;
pub mod resolve_layout;
