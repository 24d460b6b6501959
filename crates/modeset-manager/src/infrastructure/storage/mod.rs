//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML file holding the manager settings
//! and the saved layout profiles, and falls back to defaults on first run.

pub mod config;
