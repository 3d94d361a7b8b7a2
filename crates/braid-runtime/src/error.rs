//! Runtime error types.

use braid_core::{ConfigurationError, RegistryError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Component bootstrap failed; the runtime did not start.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An extension or component registration was rejected.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("runtime is already running")]
    AlreadyRunning,

    #[error("runtime is not running")]
    NotRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
