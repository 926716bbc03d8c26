//! Error types shared across the harness

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::cluster::config::ConfigError;
use crate::store::StoreError;

/// Top-level error for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Member name not present in the registry
    #[error("unknown cluster member '{0}'")]
    UnknownMember(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}
