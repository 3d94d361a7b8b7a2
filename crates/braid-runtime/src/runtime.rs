//! Runtime orchestration.
//!
//! [`BraidRuntime`] owns one instance of each core mechanism and wires them
//! together:
//!
//! ```text
//! Backend ──BackendSink──► signal loop ─┬─ response ──► DispatchRouter::handle_response
//!                                       └─ event ─────► EventRouter::ingest
//!                                                        ─► EventDeduplicator::should_process
//!                                                        ─► EventRouter::publish
//!                                                        ─► preprocess → <category> → postprocess
//! ```
//!
//! Outbound calls made through [`BraidRuntime::call`] are wrapped in the
//! `beforeSend` and `afterSend` stages.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use braid_runtime::BraidRuntime;
//!
//! let runtime = BraidRuntime::builder()
//!     .config_file("config/braid.toml")
//!     .build()?;
//!
//! runtime.register_backend(Arc::new(MyBackend::new())).await;
//! runtime.register_extension(&my_extension)?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use braid_core::{
    ApiResponse, BackendSignal, BackendSink, BootContext, BoxError, BoxedBackend, BoxedComponent,
    CallOptions, ComponentDescriptor, ComponentRegistry, ConfigurationError, DispatchError,
    DispatchResult, DispatchRouter, EventDeduplicator, EventRouter, Extension, HookPipeline,
    InitContext, NormalizedEvent, ProcessingContext, RouterOptions, stages,
};
use futures::future::join_all;
use serde_json::Value;
use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Level, debug, error, info, span, trace, warn};

use crate::config::{BraidConfig, ConfigLoader, ConfigResult, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A point-in-time summary of the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Registered backends.
    pub backends: usize,
    /// Backends reporting a live connection.
    pub connected: usize,
    /// Outbound calls awaiting a response.
    pub pending_calls: usize,
    /// Fingerprints held by the deduplicator.
    pub fingerprints: usize,
    /// Registered components.
    pub components: usize,
    /// Known pipeline stages.
    pub stages: usize,
}

// =============================================================================
// Services
// =============================================================================

/// Handles shared by the signal loop and the pipeline tasks it spawns.
#[derive(Clone)]
struct Services {
    pipeline: Arc<HookPipeline>,
    router: Arc<DispatchRouter>,
    events: Arc<EventRouter>,
    dedup: Arc<EventDeduplicator>,
    tasks: TaskTracker,
}

impl Services {
    fn handle_signal(&self, signal: BackendSignal) {
        match signal {
            BackendSignal::Inbound { backend, payload } => self.handle_inbound(&backend, payload),
            BackendSignal::Connected(name) => self.router.on_backend_connected(&name),
            BackendSignal::Disconnected(name) => {
                self.router.on_backend_disconnected(&name);
            }
        }
    }

    fn handle_inbound(&self, backend: &str, payload: Value) {
        if let Some(response) = ApiResponse::from_value(&payload) {
            self.router.handle_response(response);
            return;
        }

        let Some(event) = self.events.ingest(&payload, backend) else {
            trace!(backend = %backend, "Payload is neither a response nor an event");
            return;
        };
        if !self.dedup.should_process(&event) {
            return;
        }

        self.events.publish(&event);
        self.tasks.spawn(self.clone().process(Arc::new(event)));
    }

    /// Runs `preprocess`, the category stage and `postprocess`, stopping at
    /// the first stage that is interrupted.
    async fn process(self, event: Arc<NormalizedEvent>) {
        let category = event.category().as_str();
        let span = span!(
            Level::DEBUG,
            "process",
            backend = %event.backend,
            category = category
        );
        let mut ctx = ProcessingContext::new(event).with_router(Arc::clone(&self.router));

        async {
            for stage in [stages::PREPROCESS, category, stages::POSTPROCESS] {
                if !self.pipeline.execute(stage, &mut ctx).await {
                    debug!(stage = %stage, "Processing interrupted");
                    break;
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn signal_loop(
    services: Services,
    signals: Arc<Mutex<mpsc::UnboundedReceiver<BackendSignal>>>,
    cancel: CancellationToken,
) {
    let mut rx = signals.lock().await;
    debug!("Signal loop started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => services.handle_signal(signal),
                None => break,
            },
        }
    }
    debug!("Signal loop stopped");
}

async fn connect_backend(backend: &BoxedBackend) {
    match backend.connect().await {
        Ok(()) => debug!(backend = %backend.name(), "Backend connect requested"),
        Err(e) => error!(backend = %backend.name(), error = %e, "Failed to connect backend"),
    }
}

// =============================================================================
// BraidRuntime
// =============================================================================

#[derive(Default)]
struct RunState {
    running: bool,
    cancel: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
}

/// The Braid runtime: configuration, core mechanisms and their lifecycle.
pub struct BraidRuntime {
    config: BraidConfig,
    services: Services,
    components: Arc<ComponentRegistry>,
    signal_tx: mpsc::UnboundedSender<BackendSignal>,
    signal_rx: Arc<Mutex<mpsc::UnboundedReceiver<BackendSignal>>>,
    state: Mutex<RunState>,
}

impl BraidRuntime {
    /// Creates a runtime from `braid.*` in the current directory and the
    /// environment, falling back to defaults when loading fails.
    pub fn new() -> Self {
        ConfigLoader::new()
            .with_current_dir()
            .load()
            .map_err(RuntimeError::from)
            .and_then(|config| Self::from_config(&config))
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                let config = BraidConfig::default();
                logging::init_from_config(&config.logging);
                Self::with_options(config, RouterOptions::default())
            })
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config`, initializes logging from it and assembles the
    /// runtime.
    pub fn from_config(config: &BraidConfig) -> RuntimeResult<Self> {
        let runtime = Self::assemble(config.clone())?;
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            strategy = %config.dispatch.strategy,
            dedup_window_ms = config.dedup.window_ms,
            "Runtime initialized from configuration"
        );
        Ok(runtime)
    }

    /// Builds the runtime without touching the global subscriber.
    fn assemble(config: BraidConfig) -> ConfigResult<Self> {
        validate_config(&config)?;
        let options = config.dispatch.router_options()?;
        Ok(Self::with_options(config, options))
    }

    fn with_options(config: BraidConfig, options: RouterOptions) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let services = Services {
            pipeline: Arc::new(HookPipeline::new()),
            router: Arc::new(DispatchRouter::new(options)),
            events: Arc::new(EventRouter::new()),
            dedup: Arc::new(config.dedup.deduplicator()),
            tasks: TaskTracker::new(),
        };
        Self {
            config,
            services,
            components: Arc::new(ComponentRegistry::new()),
            signal_tx,
            signal_rx: Arc::new(Mutex::new(signal_rx)),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn config(&self) -> &BraidConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        &self.services.pipeline
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        &self.services.router
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        &self.services.events
    }

    pub fn dedup(&self) -> &Arc<EventDeduplicator> {
        &self.services.dedup
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a backend and subscribes the runtime to its signals.
    ///
    /// A backend registered while the runtime is running is connected
    /// immediately. Registering a name twice replaces the earlier backend.
    pub async fn register_backend(&self, backend: BoxedBackend) {
        let name = backend.name().to_string();
        backend.subscribe(BackendSink::new(name.clone(), self.signal_tx.clone()));

        if self
            .services
            .router
            .register_backend(Arc::clone(&backend))
            .is_some()
        {
            warn!(backend = %name, "Replaced previously registered backend");
        }
        info!(backend = %name, "Registered backend");

        if self.is_running().await {
            connect_backend(&backend).await;
        }
    }

    /// Removes a backend; its pending calls fail with `ConnectionLost`.
    pub async fn unregister_backend(&self, name: &str) -> Option<BoxedBackend> {
        let backend = self.services.router.unregister_backend(name)?;
        if self.is_running().await
            && let Err(e) = backend.disconnect().await
        {
            warn!(backend = %name, error = %e, "Error disconnecting removed backend");
        }
        Some(backend)
    }

    /// Installs an extension's hooks. Returns the number of new registrations.
    pub fn register_extension(&self, extension: &dyn Extension) -> Result<usize, ConfigurationError> {
        let added = self.services.pipeline.install(extension)?;
        info!(extension = %extension.name(), hooks = added, "Registered extension");
        Ok(added)
    }

    /// Removes every hook owned by the named extension.
    pub fn remove_extension(&self, name: &str) -> usize {
        let removed = self.services.pipeline.unregister_owner(name);
        info!(extension = %name, hooks = removed, "Removed extension");
        removed
    }

    /// Registers a component, initialized on [`start`](Self::start).
    pub fn register_component<F>(
        &self,
        descriptor: ComponentDescriptor,
        factory: F,
    ) -> Result<(), ConfigurationError>
    where
        F: FnOnce(&InitContext<'_>) -> Result<BoxedComponent, BoxError> + Send + 'static,
    {
        self.components.register(descriptor, factory)
    }

    // ─── Outbound ────────────────────────────────────────────────────────────

    /// Performs an outbound call wrapped in `beforeSend` / `afterSend`.
    ///
    /// `beforeSend` hooks see `action` and `params` in the context metadata
    /// and may rewrite `params`; if one interrupts the stage the call fails
    /// with [`DispatchError::Interrupted`]. `afterSend` hooks see the result
    /// (or an `error` metadata entry).
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> DispatchResult<Value> {
        let mut ctx = ProcessingContext::detached().with_router(Arc::clone(&self.services.router));
        ctx.insert("action", action);
        ctx.insert("params", params);

        if !self
            .services
            .pipeline
            .execute(stages::BEFORE_SEND, &mut ctx)
            .await
        {
            debug!(action = %action, "Outbound call interrupted");
            return Err(DispatchError::Interrupted {
                stage: stages::BEFORE_SEND.to_string(),
            });
        }

        let params = ctx.get("params").cloned().unwrap_or(Value::Null);
        let result = self.services.router.call(action, params, options).await;

        match &result {
            Ok(data) => ctx.set_result(data.clone()),
            Err(e) => {
                ctx.insert("error", e.to_string());
            }
        }
        self.services
            .pipeline
            .execute(stages::AFTER_SEND, &mut ctx)
            .await;

        result
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Initializes components, starts the background tasks and connects
    /// every backend.
    ///
    /// A component failure aborts the start; the runtime stays stopped.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        if state.running {
            warn!("Runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        }

        info!("Starting Braid runtime");

        let boot = BootContext::new(
            Arc::clone(&self.services.pipeline),
            Arc::clone(&self.services.router),
            Arc::clone(&self.services.events),
        )
        .with_config(self.config.components.clone());
        self.components.initialize_all(&boot).await?;

        let cancel = CancellationToken::new();
        self.services.tasks.reopen();
        if self.config.dedup.sweep {
            state
                .workers
                .push(self.services.dedup.spawn_sweeper(cancel.child_token()));
        }
        state.workers.push(tokio::spawn(signal_loop(
            self.services.clone(),
            Arc::clone(&self.signal_rx),
            cancel.child_token(),
        )));

        for backend in self.services.router.backends() {
            connect_backend(&backend).await;
        }

        state.cancel = Some(cancel);
        state.running = true;

        info!(
            backends = self.services.router.backend_count(),
            components = self.components.len(),
            "Runtime started"
        );
        Ok(())
    }

    /// Stops background tasks, disconnects backends, rejects outstanding
    /// calls and shuts components down in reverse initialization order.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        if !state.running {
            warn!("Runtime is not running");
            return Err(RuntimeError::NotRunning);
        }

        info!("Stopping Braid runtime");

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        for joined in join_all(state.workers.drain(..)).await {
            if let Err(e) = joined {
                error!(error = %e, "Runtime worker ended abnormally");
            }
        }

        let backends = self.services.router.backends();
        let results = join_all(backends.iter().map(|backend| backend.disconnect())).await;
        for (backend, result) in backends.iter().zip(results) {
            if let Err(e) = result {
                error!(backend = %backend.name(), error = %e, "Error during backend disconnect");
            }
        }
        self.services.router.shutdown();

        self.services.tasks.close();
        self.services.tasks.wait().await;

        self.components.shutdown_all().await;
        state.running = false;

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Braid runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    pub fn stats(&self) -> RuntimeStats {
        let router = &self.services.router;
        RuntimeStats {
            backends: router.backend_count(),
            connected: router.connected_count(),
            pending_calls: router.pending_count(),
            fingerprints: self.services.dedup.len(),
            components: self.components.len(),
            stages: self.services.pipeline.stages().len(),
        }
    }
}

impl Default for BraidRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BraidRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BraidRuntime")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`BraidRuntime`] with custom configuration sources.
///
/// ```rust,ignore
/// let runtime = BraidRuntime::builder()
///     .config_file("config/braid.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration over every file and environment source.
    pub fn merge(mut self, config: BraidConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> RuntimeResult<BraidRuntime> {
        let config = self.config_loader.load()?;
        BraidRuntime::from_config(&config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
