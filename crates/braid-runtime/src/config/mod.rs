//! Configuration for the Braid runtime.
//!
//! Settings are layered with figment (defaults, files, `BRAID_*` environment
//! variables, programmatic merges) and checked by [`validate_config`] before
//! the runtime is assembled.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BraidConfig, DedupConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
