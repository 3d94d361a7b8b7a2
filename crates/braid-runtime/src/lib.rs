//! Braid Runtime - Orchestration layer for the Braid bot core.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `BraidConfig`)
//! - Logging setup (`LoggingBuilder`, `logging::init_from_config`)
//! - The runtime that wires backends, the event path and the hook pipeline
//!   together (`BraidRuntime`)
//!
//! ```ignore
//! use braid_runtime::BraidRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = BraidRuntime::builder().profile("production").build()?;
//!
//!     runtime.register_backend(Arc::new(MyBackend::connect_to("ws://..."))).await;
//!     runtime.register_extension(&greeter())?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{BraidConfig, ConfigError, ConfigLoader, ConfigResult};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BraidRuntime, RuntimeBuilder, RuntimeStats};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the common logging macros plus `Level` for span creation.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
