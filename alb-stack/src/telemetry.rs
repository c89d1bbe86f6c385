use anyhow::Result;
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize tracing.
///
/// - stderr: human logs.
/// - file: JSONL logs under `log_dir` (only when given), hourly rolling.
/// - env: RUST_LOG controls level (e.g. `info,alb_stack::auth=debug`).
pub fn init_tracing(service: &str, log_dir: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let human = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let json = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            // Active file is <log_dir>/<service>.jsonl
            let appender = tracing_appender::rolling::hourly(dir, format!("{service}.jsonl"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Guard must live for process lifetime.
            let _ = TRACING_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(human)
        .with(json)
        .try_init()?;

    Ok(())
}
