//! Infrastructure layer for the display manager.
//!
//! Contains OS-facing adapters: the kernel mode-setting backend (plus an
//! in-memory one for tests and dry runs) and config file storage.
//!
//! **Dependency rule**: this layer may depend on `application` types and
//! `modeset_core`, but the domain crate never imports it.

pub mod backend;
pub mod storage;
