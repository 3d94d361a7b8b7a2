//! Echo Bot Demo
//!
//! Runs the Braid runtime against in-process loopback backends. Each
//! backend replays the same scripted group messages when it connects; the
//! deduplicator collapses the copies and the `commands` extension answers
//! them through the dispatch router.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --backends 3 --say "/echo hi" --say /ping --exit-after 2
//! ```

mod loopback;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use braid::core::{BoxedComponent, StaticExtension};
use braid::prelude::*;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use loopback::LoopbackBackend;

const HELP: &str = "/echo <text> - Echo text\n/ping - Pong!\n/help - This help";

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "Echo bot running on loopback backends")]
struct Args {
    /// Configuration file; `braid.toml` in the current directory otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of loopback backends.
    #[arg(short, long, default_value_t = 2)]
    backends: usize,

    /// Message each backend injects on connect (repeatable).
    #[arg(long = "say", default_values = ["/ping", "/echo hello braid", "/help"])]
    messages: Vec<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long)]
    exit_after: Option<u64>,
}

// ============================================================================
// Extension
// ============================================================================

fn reply_for(text: &str) -> Option<String> {
    match text.trim() {
        "/ping" => Some("Pong!".to_string()),
        "/help" => Some(HELP.to_string()),
        other => other.strip_prefix("/echo ").map(str::to_string),
    }
}

fn commands() -> StaticExtension {
    ExtensionBuilder::new("commands")
        .on(stages::PREPROCESS, 100, |ctx| {
            Box::pin(async move {
                if let Some(event) = ctx.event() {
                    info!(
                        backend = %event.backend,
                        sender = event.sender_id().unwrap_or("?"),
                        text = event.content().unwrap_or(""),
                        "Inbound message"
                    );
                }
                HookResult::Ok(true)
            })
        })
        .on(stages::MESSAGE, 0, |ctx| {
            Box::pin(async move {
                let Some(event) = ctx.event_arc() else {
                    return HookResult::Ok(true);
                };
                let Some(reply) = event.content().and_then(reply_for) else {
                    return HookResult::Ok(true);
                };

                let params = json!({"group_id": event.group_id(), "message": reply});
                match ctx.call("send_msg", params).await {
                    Ok(data) => info!(data = %data, "Reply delivered"),
                    Err(e) => warn!(error = %e, "Reply failed"),
                }
                HookResult::Ok(true)
            })
        })
        .on(stages::ERROR, 0, |ctx| {
            Box::pin(async move {
                if let Some(err) = ctx.error() {
                    error!(stage = %err.stage, owner = %err.owner, "{}", err.message);
                }
                HookResult::Ok(true)
            })
        })
        .build()
}

// ============================================================================
// Component
// ============================================================================

/// Counts delivered message events.
#[derive(Default)]
struct MessageCounter {
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl Component for MessageCounter {
    async fn initialize(&self, ctx: &InitContext<'_>) -> Result<(), BoxError> {
        let seen = Arc::clone(&self.seen);
        ctx.events().subscribe(EventCategory::Message, move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        info!(messages = self.seen.load(Ordering::Relaxed), "Message counter stopped");
        Ok(())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = BraidRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build()?;

    let script = loopback::script(&args.messages);
    for i in 0..args.backends {
        let backend = LoopbackBackend::new(format!("loop-{i}"), script.clone());
        runtime.register_backend(Arc::new(backend)).await;
    }

    runtime.register_extension(&commands())?;
    runtime.register_component(ComponentDescriptor::new("counter"), |_ctx| {
        Ok(Arc::new(MessageCounter::default()) as BoxedComponent)
    })?;

    match args.exit_after {
        Some(secs) => {
            runtime
                .run_until(tokio::time::sleep(Duration::from_secs(secs)))
                .await?
        }
        None => runtime.run().await?,
    }

    info!(stats = ?runtime.stats(), "Echo bot finished");
    Ok(())
}
