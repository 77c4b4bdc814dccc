//! Configuration system for the Aether atmosphere renderer.
//!
//! Settings persist to disk as RON files. CLI overrides come from clap, and
//! unknown or missing fields fall back to defaults so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{AtmosphereConfig, Config, DebugConfig, RenderConfig, default_config_dir};
pub use error::ConfigError;
