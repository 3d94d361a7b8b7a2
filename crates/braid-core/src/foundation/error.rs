//! Unified error types for the Braid core.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures they can react to:
//!
//! - [`ConfigurationError`] / [`CycleError`] / [`RegistryError`]: fatal at startup.
//! - [`DispatchError`]: returned to the caller of an outbound call.
//! - [`HandlerError`]: contained inside the hook pipeline, observable only
//!   through the `error` stage and logs.
//! - [`BackendError`]: reported by backend implementations.

use std::time::Duration;

use thiserror::Error;

/// Boxed error type used for user-supplied hooks, listeners and initializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid configuration discovered before the core starts processing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The configured backend selection strategy is not known.
    #[error("unknown selection strategy '{0}'")]
    UnknownStrategy(String),

    /// A stage name failed validation at registration time.
    #[error("invalid stage name '{0}'")]
    InvalidStageName(String),

    /// Two components were registered under the same name.
    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    /// A component descriptor is structurally invalid.
    #[error("malformed descriptor for component '{name}': {reason}")]
    MalformedDescriptor {
        /// Name of the offending component.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A component requires a dependency that was never registered.
    #[error("component '{component}' requires '{dependency}', which is not registered")]
    MissingDependency {
        /// The component declaring the dependency.
        component: String,
        /// The absent dependency.
        dependency: String,
    },
}

// =============================================================================
// Registry Errors
// =============================================================================

/// A dependency cycle among registered components.
///
/// `members` lists the cycle path in visit order, without repeating the
/// first member at the end.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency cycle detected: {}", render_cycle(.members))]
pub struct CycleError {
    /// Components participating in the cycle.
    pub members: Vec<String>,
}

fn render_cycle(members: &[String]) -> String {
    let mut path = members.join(" -> ");
    if let Some(first) = members.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

/// Errors raised by the component registry while bootstrapping.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid descriptors or dependencies.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The dependency graph is not acyclic.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A component's factory or initializer failed; the sequence was aborted.
    #[error("component '{component}' failed to initialize: {source}")]
    InitializationFailed {
        /// Component that failed.
        component: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// An earlier run left this component `Failed`; the registry will not
    /// initialize again.
    #[error("component '{component}' failed in an earlier initialization run")]
    PreviouslyFailed {
        /// Component that failed.
        component: String,
    },
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors surfaced to the caller of an outbound call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No backend has been registered at all.
    #[error("no backend registered")]
    NoBackendRegistered,

    /// Backends are registered, but none reports a live connection.
    #[error("none of the {registered} registered backend(s) is connected")]
    NoBackendConnected {
        /// Number of registered backends.
        registered: usize,
    },

    /// An explicit target names a backend that is not registered.
    #[error("backend '{backend}' is not registered")]
    UnknownBackend {
        /// Requested backend.
        backend: String,
    },

    /// An explicit target is registered but currently disconnected.
    #[error("backend '{backend}' is not connected")]
    BackendDisconnected {
        /// Requested backend.
        backend: String,
    },

    /// The backend answered with a non-success response.
    #[error("'{action}' rejected by backend '{backend}' ({code}): {message}")]
    BackendRejected {
        /// Action that was called.
        action: String,
        /// Backend that rejected it.
        backend: String,
        /// Provider-reported code.
        code: i64,
        /// Provider-reported message.
        message: String,
    },

    /// No response arrived before the deadline, or the caller cancelled.
    #[error("'{action}' on backend '{backend}' timed out after {timeout:?}")]
    Timeout {
        /// Action that was called.
        action: String,
        /// Backend the call was sent to.
        backend: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The backend disconnected while the call was outstanding.
    #[error("connection to backend '{backend}' lost while '{action}' was pending")]
    ConnectionLost {
        /// Action that was called.
        action: String,
        /// Backend that went away.
        backend: String,
    },

    /// Handing the request to the backend failed.
    #[error("failed to send '{action}' to backend '{backend}': {reason}")]
    SendFailed {
        /// Action that was called.
        action: String,
        /// Target backend.
        backend: String,
        /// Reason reported by the backend.
        reason: String,
    },

    /// A `beforeSend` hook vetoed the call.
    #[error("outbound call interrupted by stage '{stage}'")]
    Interrupted {
        /// Stage that returned `false`.
        stage: String,
    },
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// A failure inside a single hook, isolated from its siblings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("hook owned by '{owner}' failed in stage '{stage}': {message}")]
pub struct HandlerError {
    /// Stage that was executing.
    pub stage: String,
    /// Owner of the failing registration.
    pub owner: String,
    /// Rendered error message (or panic payload).
    pub message: String,
}

// =============================================================================
// Backend Errors
// =============================================================================

/// Errors reported by [`Backend`](crate::integration::Backend) implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend has no live connection.
    #[error("backend is not connected")]
    NotConnected,

    /// The payload could not be written to the connection.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Any other backend-specific failure.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for outbound calls.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_render_as_text() {
        let literal = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "boom");

        let formatted = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "code 7");

        let opaque = std::panic::catch_unwind(|| std::panic::panic_any(3_u8)).unwrap_err();
        assert_eq!(panic_message(opaque.as_ref()), "unknown panic");
    }

    #[test]
    fn cycle_error_renders_closed_path() {
        let err = CycleError {
            members: vec!["A".into(), "B".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: A -> B -> A");
    }

    #[test]
    fn rejected_error_mentions_action_and_backend() {
        let err = DispatchError::BackendRejected {
            action: "send_msg".into(),
            backend: "p1".into(),
            code: 100,
            message: "bad request".into(),
        };
        let text = err.to_string();
        assert!(text.contains("send_msg"));
        assert!(text.contains("p1"));
        assert!(text.contains("100"));
    }
}
