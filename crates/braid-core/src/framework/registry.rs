//! Component lifecycle management.
//!
//! [`ComponentRegistry`] owns every component registered at startup. It:
//!
//! - Accepts a [`ComponentDescriptor`] plus a factory per component, with an
//!   initial state of [`ComponentState::Registered`].
//! - Resolves a total initialization order with a depth-first topological
//!   sort over declared dependencies. Missing *required* dependencies and
//!   cycles are reported before any factory or initializer runs.
//! - Builds and initializes components one at a time in that order, failing
//!   fast on the first error.
//! - Gives initialized components to each other through
//!   [`lookup`](ComponentRegistry::lookup) and
//!   [`lookup_as`](ComponentRegistry::lookup_as).
//! - Shuts components down in reverse initialization order.
//!
//! ```text
//! register() ──► Registered
//!   initialize_all() ──► Ordered ──► Initializing ──► Initialized
//!                                          └──────► Failed (sequence aborted)
//!   shutdown_all()   ──► Stopped
//! ```

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{Instrument, Level, debug, error, info, span, warn};

use super::hook::HookPipeline;
use crate::foundation::error::{
    BoxError, ConfigurationError, CycleError, RegistryError, RegistryResult,
};
use crate::integration::dispatch::DispatchRouter;
use crate::integration::ingest::EventRouter;

// =============================================================================
// Component Trait
// =============================================================================

/// Type-erasure helpers implemented for every `'static` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A long-lived unit of functionality started by the registry.
#[async_trait]
pub trait Component: AsAny {
    /// Called once, after every dependency has been initialized.
    async fn initialize(&self, _ctx: &InitContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once on shutdown, in reverse initialization order.
    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

pub type BoxedComponent = Arc<dyn Component>;

/// Builds a component instance; runs right before its `initialize`.
pub type ComponentFactory =
    Box<dyn FnOnce(&InitContext<'_>) -> Result<BoxedComponent, BoxError> + Send>;

// =============================================================================
// Descriptors
// =============================================================================

/// A declared dependency on another component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// Required dependencies must be registered; optional ones only order
    /// initialization when present.
    pub required: bool,
}

impl Dependency {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// A component's name and declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub name: String,
    pub dependencies: Vec<Dependency>,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::required(name));
        self
    }

    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::optional(name));
        self
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let malformed = |reason: &str| ConfigurationError::MalformedDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(malformed("component name is empty"));
        }
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(malformed("dependency name is empty"));
            }
            if dep.name == self.name {
                return Err(malformed("component depends on itself"));
            }
            if !seen.insert(dep.name.as_str()) {
                return Err(malformed(&format!("dependency '{}' declared twice", dep.name)));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Registered,
    /// Placed in the resolved initialization order.
    Ordered,
    Initializing,
    Initialized,
    /// Factory or initializer failed. Terminal.
    Failed,
    /// Shut down after having been initialized.
    Stopped,
}

// =============================================================================
// Boot / Init Context
// =============================================================================

/// Shared services handed to components while they initialize.
#[derive(Clone, Default)]
pub struct BootContext {
    pipeline: Arc<HookPipeline>,
    router: Arc<DispatchRouter>,
    events: Arc<EventRouter>,
    config: HashMap<String, Value>,
}

impl BootContext {
    pub fn new(
        pipeline: Arc<HookPipeline>,
        router: Arc<DispatchRouter>,
        events: Arc<EventRouter>,
    ) -> Self {
        Self {
            pipeline,
            router,
            events,
            config: HashMap::new(),
        }
    }

    /// Sets the per-component configuration sections.
    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        &self.pipeline
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        &self.router
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        &self.events
    }

    /// Configuration section for `component`, or an empty object.
    pub fn config_for(&self, component: &str) -> Value {
        self.config
            .get(component)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

impl fmt::Debug for BootContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootContext")
            .field("config_sections", &self.config.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// View of the [`BootContext`] scoped to the component being initialized.
pub struct InitContext<'a> {
    boot: &'a BootContext,
    registry: &'a ComponentRegistry,
    component: &'a str,
}

impl<'a> InitContext<'a> {
    /// Name of the component being initialized.
    pub fn component(&self) -> &str {
        self.component
    }

    pub fn boot(&self) -> &BootContext {
        self.boot
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        self.boot.pipeline()
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        self.boot.router()
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        self.boot.events()
    }

    /// This component's configuration section.
    pub fn config(&self) -> Value {
        self.boot.config_for(self.component)
    }

    /// Deserializes this component's configuration section.
    ///
    /// Use `#[serde(default)]` on `T` to make every field optional.
    pub fn config_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.config())
    }

    /// An already initialized component (normally a dependency).
    pub fn lookup(&self, name: &str) -> Option<BoxedComponent> {
        self.registry.lookup(name)
    }

    pub fn lookup_as<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        self.registry.lookup_as(name)
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Entry {
    descriptor: ComponentDescriptor,
    factory: Option<ComponentFactory>,
    instance: Option<BoxedComponent>,
    state: ComponentState,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Registry of components and driver of their initialization.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: Mutex<Vec<Entry>>,
    /// Resolved order, recorded by `initialize_all`.
    order: Mutex<Vec<String>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a component with the factory that builds it.
    pub fn register<F>(
        &self,
        descriptor: ComponentDescriptor,
        factory: F,
    ) -> Result<(), ConfigurationError>
    where
        F: FnOnce(&InitContext<'_>) -> Result<BoxedComponent, BoxError> + Send + 'static,
    {
        descriptor.validate()?;
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.descriptor.name == descriptor.name) {
            return Err(ConfigurationError::DuplicateComponent(descriptor.name));
        }
        info!(
            component = %descriptor.name,
            dependencies = descriptor.dependencies.len(),
            "Component registered"
        );
        entries.push(Entry {
            descriptor,
            factory: Some(Box::new(factory)),
            instance: None,
            state: ComponentState::Registered,
        });
        Ok(())
    }

    /// Registers an already built component.
    pub fn register_instance<C: Component>(
        &self,
        descriptor: ComponentDescriptor,
        component: C,
    ) -> Result<(), ConfigurationError> {
        let component: BoxedComponent = Arc::new(component);
        self.register(descriptor, move |_| Ok(component))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.descriptor.name == name)
    }

    /// Names of registered components, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.state)
    }

    /// The order resolved by the last [`initialize_all`](Self::initialize_all).
    pub fn initialization_order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Returns an initialized component.
    pub fn lookup(&self, name: &str) -> Option<BoxedComponent> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.descriptor.name == name && e.state == ComponentState::Initialized)
            .and_then(|e| e.instance.clone())
    }

    /// Returns an initialized component downcast to its concrete type.
    pub fn lookup_as<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        AsAny::into_any_arc(self.lookup(name)?).downcast::<T>().ok()
    }

    // ─── Ordering ────────────────────────────────────────────────────────────

    /// Resolves the initialization order without running anything.
    ///
    /// Fails on a missing required dependency or a cycle.
    pub fn resolve_order(&self) -> RegistryResult<Vec<String>> {
        let entries = self.entries.lock();
        let index: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.descriptor.name.as_str(), i))
            .collect();

        for entry in entries.iter() {
            for dep in &entry.descriptor.dependencies {
                if dep.required && !index.contains_key(dep.name.as_str()) {
                    return Err(ConfigurationError::MissingDependency {
                        component: entry.descriptor.name.clone(),
                        dependency: dep.name.clone(),
                    }
                    .into());
                }
            }
        }

        let mut marks = vec![Mark::Unvisited; entries.len()];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(entries.len());
        for idx in 0..entries.len() {
            visit(idx, &entries, &index, &mut marks, &mut path, &mut order)?;
        }

        Ok(order
            .into_iter()
            .map(|i| entries[i].descriptor.name.clone())
            .collect())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Builds and initializes every registered component in dependency order.
    ///
    /// Stops at the first failure: the failing component becomes
    /// [`ComponentState::Failed`] and later components are left untouched.
    /// Components already initialized by an earlier call are skipped. Once
    /// any component has failed, later calls return
    /// [`RegistryError::PreviouslyFailed`] without running anything.
    pub async fn initialize_all(&self, boot: &BootContext) -> RegistryResult<()> {
        if let Some(component) = self.first_failed() {
            warn!(component = %component, "Refusing to initialize after an earlier failure");
            return Err(RegistryError::PreviouslyFailed { component });
        }

        let order = match self.resolve_order() {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Component dependency resolution failed");
                return Err(e);
            }
        };
        {
            let mut entries = self.entries.lock();
            for entry in entries.iter_mut() {
                if entry.state == ComponentState::Registered {
                    entry.state = ComponentState::Ordered;
                }
            }
        }
        *self.order.lock() = order.clone();
        debug!(order = ?order, "Component initialization order resolved");

        for name in &order {
            let Some(factory) = self.begin(name) else {
                continue;
            };

            let ctx = InitContext {
                boot,
                registry: self,
                component: name,
            };
            let span = span!(Level::DEBUG, "initialize", component = %name);
            let outcome = async move {
                let instance = factory(&ctx)?;
                instance.initialize(&ctx).await?;
                Ok::<_, BoxError>(instance)
            }
            .instrument(span)
            .await;

            match outcome {
                Ok(instance) => {
                    self.finish(name, ComponentState::Initialized, Some(instance));
                    info!(component = %name, "Component initialized");
                }
                Err(source) => {
                    self.finish(name, ComponentState::Failed, None);
                    error!(component = %name, error = %source, "Component failed to initialize");
                    return Err(RegistryError::InitializationFailed {
                        component: name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Shuts initialized components down in reverse initialization order.
    ///
    /// Failures are logged; every component gets its turn.
    pub async fn shutdown_all(&self) {
        let order = self.initialization_order();
        for name in order.iter().rev() {
            let instance = {
                let mut entries = self.entries.lock();
                let Some(entry) = entries
                    .iter_mut()
                    .find(|e| &e.descriptor.name == name && e.state == ComponentState::Initialized)
                else {
                    continue;
                };
                entry.state = ComponentState::Stopped;
                entry.instance.take()
            };
            let Some(instance) = instance else {
                continue;
            };
            match instance.shutdown().await {
                Ok(()) => info!(component = %name, "Component stopped"),
                Err(e) => warn!(component = %name, error = %e, "Component shutdown failed"),
            }
        }
    }

    fn first_failed(&self) -> Option<String> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.state == ComponentState::Failed)
            .map(|e| e.descriptor.name.clone())
    }

    /// Moves a component to `Initializing`, handing out its factory.
    fn begin(&self, name: &str) -> Option<ComponentFactory> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|e| e.descriptor.name == name)?;
        if entry.state != ComponentState::Ordered {
            return None;
        }
        let factory = entry.factory.take()?;
        entry.state = ComponentState::Initializing;
        Some(factory)
    }

    fn finish(&self, name: &str, state: ComponentState, instance: Option<BoxedComponent>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.descriptor.name == name) {
            entry.state = state;
            entry.instance = instance;
        }
    }
}

/// Depth-first visit. Reaching a node that is still `Visiting` closes a
/// cycle; its members are the path from that node onwards.
fn visit(
    idx: usize,
    entries: &[Entry],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), CycleError> {
    match marks[idx] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            let start = path.iter().position(|&i| i == idx).unwrap_or(0);
            return Err(CycleError {
                members: path[start..]
                    .iter()
                    .map(|&i| entries[i].descriptor.name.clone())
                    .collect(),
            });
        }
        Mark::Unvisited => {}
    }

    marks[idx] = Mark::Visiting;
    path.push(idx);
    for dep in &entries[idx].descriptor.dependencies {
        // Missing optional dependencies are not edges.
        if let Some(&dep_idx) = index.get(dep.name.as_str()) {
            visit(dep_idx, entries, index, marks, path, order)?;
        }
    }
    path.pop();
    marks[idx] = Mark::Done;
    order.push(idx);
    Ok(())
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: Vec<(String, ComponentState)> = self
            .entries
            .lock()
            .iter()
            .map(|e| (e.descriptor.name.clone(), e.state))
            .collect();
        f.debug_struct("ComponentRegistry")
            .field("components", &states)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: String,
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl Component for Recorder {
        async fn initialize(&self, ctx: &InitContext<'_>) -> Result<(), BoxError> {
            assert_eq!(ctx.component(), self.name);
            self.log.lock().push(format!("init:{}", self.name));
            if self.fail {
                return Err("refused to start".into());
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), BoxError> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn add(registry: &ComponentRegistry, descriptor: ComponentDescriptor, log: &Log, fail: bool) {
        let name = descriptor.name.clone();
        let log = log.clone();
        registry
            .register(descriptor, move |_| {
                let component: BoxedComponent = Arc::new(Recorder { name, log, fail });
                Ok(component)
            })
            .unwrap();
    }

    #[tokio::test]
    async fn dependencies_initialize_first() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("C1").requires("C2"), &log, false);
        add(&registry, ComponentDescriptor::new("C2"), &log, false);

        registry.initialize_all(&BootContext::default()).await.unwrap();

        assert_eq!(*log.lock(), vec!["init:C2", "init:C1"]);
        assert_eq!(registry.initialization_order(), vec!["C2", "C1"]);
        assert_eq!(registry.state("C1"), Some(ComponentState::Initialized));
        assert!(registry.lookup("C2").is_some());
        assert!(registry.lookup_as::<Recorder>("C2").is_some());
    }

    #[tokio::test]
    async fn cycle_is_fatal_and_nothing_initializes() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("A").requires("B"), &log, false);
        add(&registry, ComponentDescriptor::new("B").requires("A"), &log, false);

        let err = registry
            .initialize_all(&BootContext::default())
            .await
            .unwrap_err();

        match err {
            RegistryError::Cycle(cycle) => {
                assert!(cycle.members.contains(&"A".to_string()));
                assert!(cycle.members.contains(&"B".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
        assert!(log.lock().is_empty());
        assert_eq!(registry.state("A"), Some(ComponentState::Registered));
    }

    #[tokio::test]
    async fn missing_required_dependency_is_reported_before_any_init() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("ok"), &log, false);
        add(&registry, ComponentDescriptor::new("needy").requires("ghost"), &log, false);

        let err = registry
            .initialize_all(&BootContext::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Configuration(ConfigurationError::MissingDependency { ref dependency, .. })
                if dependency == "ghost"
        ));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_optional_dependency_is_skipped() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(
            &registry,
            ComponentDescriptor::new("cache").optional("metrics"),
            &log,
            false,
        );

        registry.initialize_all(&BootContext::default()).await.unwrap();
        assert_eq!(*log.lock(), vec!["init:cache"]);
    }

    #[tokio::test]
    async fn optional_dependency_still_orders_when_present() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("app").optional("db"), &log, false);
        add(&registry, ComponentDescriptor::new("db"), &log, false);

        registry.initialize_all(&BootContext::default()).await.unwrap();
        assert_eq!(*log.lock(), vec!["init:db", "init:app"]);
    }

    #[tokio::test]
    async fn failure_aborts_remaining_sequence() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("first"), &log, true);
        add(&registry, ComponentDescriptor::new("second").requires("first"), &log, false);

        let err = registry
            .initialize_all(&BootContext::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::InitializationFailed { ref component, .. } if component == "first"
        ));
        assert_eq!(*log.lock(), vec!["init:first"]);
        assert_eq!(registry.state("first"), Some(ComponentState::Failed));
        assert_eq!(registry.state("second"), Some(ComponentState::Ordered));
        assert!(registry.lookup("first").is_none());
    }

    #[tokio::test]
    async fn failed_component_blocks_later_runs() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("db"), &log, true);
        add(&registry, ComponentDescriptor::new("app").requires("db"), &log, false);

        assert!(registry.initialize_all(&BootContext::default()).await.is_err());
        let err = registry
            .initialize_all(&BootContext::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::PreviouslyFailed { ref component } if component == "db"
        ));
        assert_eq!(*log.lock(), vec!["init:db"]);
        assert_eq!(registry.state("db"), Some(ComponentState::Failed));
        assert_eq!(registry.state("app"), Some(ComponentState::Ordered));
        assert!(registry.lookup("app").is_none());
    }

    #[tokio::test]
    async fn shutdown_runs_in_reverse_order() {
        let registry = ComponentRegistry::new();
        let log = Log::default();
        add(&registry, ComponentDescriptor::new("web").requires("db"), &log, false);
        add(&registry, ComponentDescriptor::new("db"), &log, false);

        registry.initialize_all(&BootContext::default()).await.unwrap();
        registry.shutdown_all().await;

        assert_eq!(
            *log.lock(),
            vec!["init:db", "init:web", "stop:web", "stop:db"]
        );
        assert_eq!(registry.state("db"), Some(ComponentState::Stopped));
        assert!(registry.lookup("db").is_none());
    }

    #[tokio::test]
    async fn components_read_config_and_dependencies() {
        #[derive(serde::Deserialize)]
        struct Settings {
            size: u32,
        }

        struct Cache;
        impl Component for Cache {}

        struct App {
            seen_size: Mutex<Option<u32>>,
        }

        #[async_trait]
        impl Component for App {
            async fn initialize(&self, ctx: &InitContext<'_>) -> Result<(), BoxError> {
                let settings: Settings = ctx.config_as()?;
                *self.seen_size.lock() = Some(settings.size);
                if ctx.lookup_as::<Cache>("cache").is_none() {
                    return Err("cache missing".into());
                }
                Ok(())
            }
        }

        let registry = ComponentRegistry::new();
        registry
            .register_instance(ComponentDescriptor::new("cache"), Cache)
            .unwrap();
        registry
            .register_instance(
                ComponentDescriptor::new("app").requires("cache"),
                App {
                    seen_size: Mutex::new(None),
                },
            )
            .unwrap();

        let boot = BootContext::default().with_config(HashMap::from([(
            "app".to_string(),
            serde_json::json!({"size": 8}),
        )]));
        registry.initialize_all(&boot).await.unwrap();

        let app = registry.lookup_as::<App>("app").unwrap();
        assert_eq!(*app.seen_size.lock(), Some(8));
    }

    #[test]
    fn malformed_and_duplicate_descriptors_are_rejected() {
        let registry = ComponentRegistry::new();
        let noop = |_: &InitContext<'_>| -> Result<BoxedComponent, BoxError> {
            Err("unused".into())
        };

        assert!(matches!(
            registry.register(ComponentDescriptor::new(""), noop),
            Err(ConfigurationError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            registry.register(ComponentDescriptor::new("a").requires("a"), noop),
            Err(ConfigurationError::MalformedDescriptor { .. })
        ));
        registry.register(ComponentDescriptor::new("a"), noop).unwrap();
        assert_eq!(
            registry.register(ComponentDescriptor::new("a"), noop),
            Err(ConfigurationError::DuplicateComponent("a".into()))
        );
    }
}
