//! # Telemetry
//!
//! Structured logging setup plus the per-request trace ID that ties a
//! webhook delivery or poll run to every log line and error payload it
//! produces. The trace ID lives in task-local storage so repositories and
//! the orchestrator never have to thread it through their signatures.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Correlation data attached to one inbound request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Fresh context with a random trace ID.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber once. Later calls are no-ops so tests that
/// boot several servers in one process do not race over the global logger.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if SUBSCRIBER_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    install_log_bridge();

    // RUST_LOG wins over the configured default level.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(output_layer(&config.log_format))
        .try_init()
    {
        SUBSCRIBER_INSTALLED.store(false, Ordering::SeqCst);
        return Err(err.into());
    }

    Ok(())
}

/// Route `log::` macros emitted by dependencies (sea-orm, reqwest) into the
/// tracing pipeline.
fn install_log_bridge() {
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // An already-registered LogTracer is fine; anything else loses the
        // dependency logs, which is worth a warning but not a refusal to boot.
        if !type_name_of_val(log::logger()).contains("LogTracer") {
            eprintln!("Warning: log bridge not installed ({err}), dependency logs will be dropped");
        }
    }
}

/// Machine-readable JSON everywhere except local development, where
/// `log_format = "pretty"` gives human-readable output.
fn output_layer<S>(log_format: &str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match log_format {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    }
}

/// Run `future` with `context` as the task's active trace context.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Trace ID of the request the current task is serving, if any. Background
/// loops run outside any request scope and get `None`.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|context| context.trace_id.clone())
        .ok()
}
