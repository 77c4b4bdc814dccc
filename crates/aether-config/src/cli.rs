//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Aether command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "aether", about = "Atmosphere effect renderer")]
pub struct CliArgs {
    /// Render target width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Render target height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Directory containing `.wgsl` shader overrides.
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.render.target_width = w;
        }
        if let Some(h) = args.height {
            self.render.target_height = h;
        }
        if let Some(ref dir) = args.shader_dir {
            self.render.shader_dir = Some(dir.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            width: Some(1920),
            shader_dir: Some(PathBuf::from("shaders")),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.render.target_width, 1920);
        assert_eq!(config.render.shader_dir, Some(PathBuf::from("shaders")));
        // Non-overridden fields retain defaults
        assert_eq!(config.render.target_height, 720);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args =
            CliArgs::try_parse_from(["aether", "--width", "800", "--log-level", "debug"]).unwrap();
        assert_eq!(args.width, Some(800));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.config.is_none());
    }
}
