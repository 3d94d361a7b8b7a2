//! Extensions: named bundles of hook bindings.
//!
//! An extension is registered explicitly at startup. Its name becomes the
//! owner of every hook it contributes, so the whole extension can later be
//! removed with [`HookPipeline::unregister_owner`](super::HookPipeline::unregister_owner).
//!
//! ```rust,ignore
//! let audit = ExtensionBuilder::new("audit")
//!     .on(stages::PREPROCESS, 100, |ctx| Box::pin(async move {
//!         ctx.insert("received_at", now());
//!         Ok(true)
//!     }))
//!     .on(stages::AFTER_SEND, 0, |ctx| Box::pin(async move {
//!         tracing::info!(result = ?ctx.result(), "call finished");
//!         Ok(true)
//!     }))
//!     .build();
//!
//! pipeline.install(&audit)?;
//! ```

use futures::future::BoxFuture;

use super::hook::{BoxedHook, HookResult, hook_fn};
use crate::foundation::context::ProcessingContext;

/// A `(stage, priority, hook)` triple contributed by an extension.
#[derive(Clone)]
pub struct HookBinding {
    pub stage: String,
    pub priority: i32,
    pub hook: BoxedHook,
}

impl HookBinding {
    pub fn new(stage: impl Into<String>, priority: i32, hook: BoxedHook) -> Self {
        Self {
            stage: stage.into(),
            priority,
            hook,
        }
    }
}

impl std::fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBinding")
            .field("stage", &self.stage)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A named set of hook bindings.
pub trait Extension: Send + Sync {
    /// Unique extension name; used as the owner of its hooks.
    fn name(&self) -> &str;

    /// The bindings to register.
    ///
    /// Returning the same hook handles on every call keeps repeated installs
    /// idempotent.
    fn bindings(&self) -> Vec<HookBinding>;
}

/// Builds an [`Extension`] from closures and hook handles.
#[derive(Debug)]
pub struct ExtensionBuilder {
    name: String,
    bindings: Vec<HookBinding>,
}

impl ExtensionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    /// Binds an existing hook.
    pub fn hook(mut self, stage: impl Into<String>, priority: i32, hook: BoxedHook) -> Self {
        self.bindings.push(HookBinding::new(stage, priority, hook));
        self
    }

    /// Binds a closure.
    pub fn on<F>(self, stage: impl Into<String>, priority: i32, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut ProcessingContext) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.hook(stage, priority, hook_fn(f))
    }

    pub fn build(self) -> StaticExtension {
        StaticExtension {
            name: self.name,
            bindings: self.bindings,
        }
    }
}

/// An extension with a fixed binding list, produced by [`ExtensionBuilder`].
#[derive(Debug, Clone)]
pub struct StaticExtension {
    name: String,
    bindings: Vec<HookBinding>,
}

impl Extension for StaticExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> Vec<HookBinding> {
        self.bindings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::hook::{HookPipeline, stages};
    use crate::foundation::error::ConfigurationError;

    fn tag(name: &'static str) -> ExtensionBuilder {
        ExtensionBuilder::new(name)
            .on(stages::PREPROCESS, 10, move |ctx| {
                Box::pin(async move {
                    ctx.insert(name, true);
                    HookResult::Ok(true)
                })
            })
            .on("moderation", 0, |_ctx| Box::pin(async { HookResult::Ok(true) }))
    }

    #[tokio::test]
    async fn installed_hooks_run_and_are_owned_by_extension() {
        let pipeline = HookPipeline::new();
        let ext = tag("audit").build();

        assert_eq!(pipeline.install(&ext), Ok(2));
        // Same handles, so a second install is a no-op.
        assert_eq!(pipeline.install(&ext), Ok(0));
        assert!(pipeline.has_stage("moderation"));

        let mut ctx = ProcessingContext::detached();
        assert!(pipeline.execute(stages::PREPROCESS, &mut ctx).await);
        assert_eq!(ctx.get_as::<bool>("audit"), Some(true));

        assert_eq!(pipeline.unregister_owner("audit"), 2);
        assert_eq!(pipeline.total_registrations(), 0);
    }

    #[test]
    fn invalid_stage_rejects_whole_extension() {
        let pipeline = HookPipeline::new();
        let ext = tag("bad")
            .on("two words", 0, |_ctx| Box::pin(async { HookResult::Ok(true) }))
            .build();

        assert_eq!(
            pipeline.install(&ext),
            Err(ConfigurationError::InvalidStageName("two words".into()))
        );
        assert_eq!(pipeline.total_registrations(), 0);
    }
}
