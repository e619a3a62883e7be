//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
