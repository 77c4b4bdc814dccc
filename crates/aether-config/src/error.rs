//! Configuration error types.

/// Errors raised while locating, loading, saving, or parsing `config.ron`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The platform exposes no per-user configuration directory.
    #[error("no per-user config directory available on this platform")]
    NoConfigDir,

    /// Reading `config.ron` from disk failed.
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    /// Writing `config.ron` (or creating its directory) failed.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Serializing the in-memory config to RON failed.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),
}
