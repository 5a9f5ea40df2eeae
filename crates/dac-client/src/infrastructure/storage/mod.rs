//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file from the platform-appropriate directory.
//! - Writing it back, creating the directory on first save.
//! - Providing defaults for every field when the file or a section is absent.

pub mod config;
