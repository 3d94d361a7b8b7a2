//! The hook pipeline: ordered, named middleware stages.
//!
//! A stage is a named extension point holding an ordered list of
//! [`HookRegistration`]s. [`HookPipeline::execute`] runs them one after
//! another over a shared [`ProcessingContext`]:
//!
//! - a hook returning `Ok(false)` interrupts the stage, and `execute`
//!   returns `false`;
//! - a hook returning `Err` (or panicking) is isolated: the failure is
//!   logged, attached to the context, delivered to the [`stages::ERROR`]
//!   stage, and the original stage continues with the next hook;
//! - a stage without registrations returns `true`.
//!
//! Higher priority runs first; equal priorities keep registration order.
//!
//! # Example
//!
//! ```rust,ignore
//! let pipeline = HookPipeline::new();
//! pipeline.register(
//!     stages::PREPROCESS,
//!     hook_fn(|ctx| Box::pin(async move {
//!         ctx.insert("seen", true);
//!         Ok(true)
//!     })),
//!     10,
//!     "audit",
//! )?;
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, error, span, trace, warn};

use super::extension::Extension;
use crate::foundation::context::ProcessingContext;
use crate::foundation::error::{BoxError, ConfigurationError, HandlerError, panic_message};

/// Outcome of a hook: `Ok(true)` continues, `Ok(false)` interrupts.
pub type HookResult = Result<bool, BoxError>;

/// Predeclared stage names.
pub mod stages {
    /// Runs for every inbound event before its category stage.
    pub const PREPROCESS: &str = "preprocess";
    /// Category stage for message events.
    pub const MESSAGE: &str = "message";
    /// Category stage for notice events.
    pub const NOTICE: &str = "notice";
    /// Category stage for request events.
    pub const REQUEST: &str = "request";
    /// Category stage for meta events.
    pub const META: &str = "meta";
    /// Runs for every inbound event after its category stage.
    pub const POSTPROCESS: &str = "postprocess";
    /// Runs before an outbound call; `false` vetoes the call.
    pub const BEFORE_SEND: &str = "beforeSend";
    /// Runs after an outbound call settles.
    pub const AFTER_SEND: &str = "afterSend";
    /// Receives contexts carrying an isolated hook failure.
    pub const ERROR: &str = "error";

    /// Stages every pipeline knows about from construction.
    pub const CORE: [&str; 9] = [
        PREPROCESS,
        MESSAGE,
        NOTICE,
        REQUEST,
        META,
        POSTPROCESS,
        BEFORE_SEND,
        AFTER_SEND,
        ERROR,
    ];
}

// =============================================================================
// Hook Trait
// =============================================================================

/// A middleware step bound to a stage.
pub trait Hook: Send + Sync + 'static {
    fn run<'a>(&'a self, ctx: &'a mut ProcessingContext) -> BoxFuture<'a, HookResult>;
}

/// A shared hook. Identity (for de-duplication and unregistration) is the
/// allocation the `Arc` points to.
pub type BoxedHook = Arc<dyn Hook>;

/// Adapts a closure into a [`Hook`].
pub struct FnHook<F>(F);

impl<F> Hook for FnHook<F>
where
    F: for<'a> Fn(&'a mut ProcessingContext) -> BoxFuture<'a, HookResult> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, ctx: &'a mut ProcessingContext) -> BoxFuture<'a, HookResult> {
        (self.0)(ctx)
    }
}

/// Wraps a closure returning a boxed future as a [`BoxedHook`].
///
/// ```rust,ignore
/// let hook = hook_fn(|ctx| Box::pin(async move {
///     ctx.insert("lang", "en");
///     Ok(true)
/// }));
/// ```
pub fn hook_fn<F>(f: F) -> BoxedHook
where
    F: for<'a> Fn(&'a mut ProcessingContext) -> BoxFuture<'a, HookResult> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

fn same_hook(a: &BoxedHook, b: &BoxedHook) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// =============================================================================
// Registration
// =============================================================================

/// One hook bound to one stage.
#[derive(Clone)]
pub struct HookRegistration {
    pub hook: BoxedHook,
    pub priority: i32,
    /// Identity of the extension (or other party) that registered the hook.
    pub owner: String,
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("priority", &self.priority)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Checks that a stage name is usable.
pub fn validate_stage_name(stage: &str) -> Result<(), ConfigurationError> {
    if stage.is_empty() || stage.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigurationError::InvalidStageName(stage.to_string()));
    }
    Ok(())
}

// =============================================================================
// Pipeline
// =============================================================================

/// Registry and executor of stage hooks.
///
/// Stages are an open set: the core stages in [`stages::CORE`] exist from
/// construction, any other stage is created on its first registration.
pub struct HookPipeline {
    stages: RwLock<HashMap<String, Vec<HookRegistration>>>,
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl HookPipeline {
    pub fn new() -> Self {
        let stages = stages::CORE
            .iter()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();
        Self {
            stages: RwLock::new(stages),
        }
    }

    /// Registers `hook` on `stage`.
    ///
    /// Returns `Ok(false)` if the same hook is already registered on that
    /// stage; the existing registration is left untouched.
    pub fn register(
        &self,
        stage: &str,
        hook: BoxedHook,
        priority: i32,
        owner: impl Into<String>,
    ) -> Result<bool, ConfigurationError> {
        validate_stage_name(stage)?;
        let owner = owner.into();

        let mut stages = self.stages.write();
        let list = stages.entry(stage.to_string()).or_default();
        if list.iter().any(|reg| same_hook(&reg.hook, &hook)) {
            trace!(stage = %stage, owner = %owner, "Hook already registered, ignoring");
            return Ok(false);
        }

        list.push(HookRegistration {
            hook,
            priority,
            owner: owner.clone(),
        });
        // Stable: equal priorities keep registration order.
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(stage = %stage, owner = %owner, priority, "Hook registered");
        Ok(true)
    }

    /// Removes `hook` from `stage`. Returns `false` if it was not there.
    pub fn unregister(&self, stage: &str, hook: &BoxedHook) -> bool {
        let mut stages = self.stages.write();
        let Some(list) = stages.get_mut(stage) else {
            return false;
        };
        let before = list.len();
        list.retain(|reg| !same_hook(&reg.hook, hook));
        before != list.len()
    }

    /// Removes every registration made by `owner`, across all stages.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        for list in self.stages.write().values_mut() {
            let before = list.len();
            list.retain(|reg| reg.owner != owner);
            removed += before - list.len();
        }
        if removed > 0 {
            debug!(owner = %owner, removed, "Hooks unregistered");
        }
        removed
    }

    /// Registers every binding of an extension, owned by its name.
    ///
    /// All stage names are validated before anything is registered.
    /// Returns the number of new registrations.
    pub fn install(&self, extension: &dyn Extension) -> Result<usize, ConfigurationError> {
        let bindings = extension.bindings();
        for binding in &bindings {
            validate_stage_name(&binding.stage)?;
        }

        let mut added = 0;
        for binding in bindings {
            if self.register(&binding.stage, binding.hook, binding.priority, extension.name())? {
                added += 1;
            }
        }
        debug!(extension = %extension.name(), hooks = added, "Extension installed");
        Ok(added)
    }

    /// Names of all known stages, sorted.
    pub fn stages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.read().contains_key(stage)
    }

    pub fn registration_count(&self, stage: &str) -> usize {
        self.stages.read().get(stage).map_or(0, Vec::len)
    }

    /// Total registrations across all stages.
    pub fn total_registrations(&self) -> usize {
        self.stages.read().values().map(Vec::len).sum()
    }

    fn snapshot(&self, stage: &str) -> Vec<HookRegistration> {
        self.stages.read().get(stage).cloned().unwrap_or_default()
    }

    // ─── Execution ───────────────────────────────────────────────────────────

    /// Runs every hook of `stage`, in order, over `ctx`.
    ///
    /// Returns `false` if a hook interrupted the stage.
    pub async fn execute(&self, stage: &str, ctx: &mut ProcessingContext) -> bool {
        let registrations = self.snapshot(stage);
        if registrations.is_empty() {
            return true;
        }

        let span = span!(Level::DEBUG, "stage", stage = %stage, hooks = registrations.len());
        async {
            for reg in &registrations {
                match run_isolated(reg, ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(owner = %reg.owner, "Stage interrupted");
                        return false;
                    }
                    Err(message) => {
                        warn!(owner = %reg.owner, error = %message, "Hook failed");
                        ctx.set_error(HandlerError {
                            stage: stage.to_string(),
                            owner: reg.owner.clone(),
                            message,
                        });
                        if stage != stages::ERROR {
                            self.deliver_error(ctx).await;
                        }
                    }
                }
            }
            true
        }
        .instrument(span)
        .await
    }

    /// Runs the error stage. Failures in here are only logged.
    async fn deliver_error(&self, ctx: &mut ProcessingContext) {
        for reg in self.snapshot(stages::ERROR) {
            match run_isolated(&reg, ctx).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(message) => {
                    error!(owner = %reg.owner, error = %message, "Error-stage hook failed");
                }
            }
        }
    }
}

/// Runs one hook, converting errors and panics into a message.
async fn run_isolated(reg: &HookRegistration, ctx: &mut ProcessingContext) -> Result<bool, String> {
    match AssertUnwindSafe(reg.hook.run(ctx)).catch_unwind().await {
        Ok(Ok(proceed)) => Ok(proceed),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .stages
            .read()
            .iter()
            .map(|(stage, list)| (stage.clone(), list.len()))
            .collect();
        f.debug_struct("HookPipeline").field("stages", &counts).finish()
    }
}
