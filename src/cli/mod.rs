#![forbid(unsafe_code)]

//! Support code shared by the `qdb` binary.

/// TOML configuration file for the command line.
pub mod config;

/// Indented text rendering of result trees.
pub mod render;

pub use config::{CliConfig, ConfigError, OutputFormat, Theme};
pub use render::{render_keys, render_text};
