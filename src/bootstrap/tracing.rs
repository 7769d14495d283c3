//! Tracing configuration
//!
//! ## Architecture / 架构
//!
//! - `cs-core` / `cs-app` log through `tracing`
//! - `cs-platform` and libp2p log through `log`, bridged by `tracing-log`'s `LogTracer`
//! - stdout always; a daily rolling file when `[logging] directory` is set

use std::path::Path;
use std::{fs, io, sync::OnceLock};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, registry, EnvFilter};

use cs_core::config::LoggingSettings;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Check if running in development environment
fn is_development() -> bool {
    cfg!(debug_assertions)
}

/// Build the default filter directives
///
/// ## Behavior / 行为
/// - **Development**: debug level for the stage crates
/// - **Production**: info level
/// - **mDNS**: iface errors are always off (No route to host on idle interfaces)
/// - `level` from the config file replaces the base level
fn build_filter_directives(is_dev: bool, level: Option<&str>) -> Vec<String> {
    let base = level.unwrap_or(if is_dev { "debug" } else { "info" });
    let crate_level = if is_dev { "debug" } else { "info" };
    vec![
        base.to_string(),
        "libp2p_mdns::behaviour::iface=off".to_string(),
        "libp2p_mdns=info".to_string(),
        "libp2p_gossipsub=warn".to_string(),
        format!("cs_app={crate_level}"),
        format!("cs_platform={crate_level}"),
    ]
}

/// Initialize the tracing subscriber and the `log` bridge
///
/// Call once from `run_app`, after the configuration is loaded.
///
/// ## Errors / 错误
///
/// Returns `Err` if:
/// - A global subscriber or logger is already registered
/// - The log directory cannot be created
pub fn init_tracing_subscriber(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter_directives = build_filter_directives(is_development(), settings.level.as_deref());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives.join(",")));

    // "2025-01-15 10:30:45.123 INFO [file.rs:42] [target] message"
    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::new(TIME_FORMAT.to_string()))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_ansi(cfg!(not(test)))
        .with_writer(BoxMakeWriter::new(io::stdout));

    let file_layer = match settings.directory.as_deref().map(build_file_writer) {
        Some(Ok(writer)) => Some(
            fmt::layer()
                .with_timer(fmt::time::ChronoUtc::new(TIME_FORMAT.to_string()))
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer),
        ),
        Some(Err(err)) => {
            eprintln!("Failed to initialize file logging, falling back to stdout: {err}");
            None
        }
        None => None,
    };

    let subscriber = registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);
    ::tracing::subscriber::set_global_default(subscriber)
        .context("Tracing subscriber already initialized")?;
    tracing_log::LogTracer::init().context("Log bridge already initialized")?;

    Ok(())
}

fn build_file_writer(directory: &Path) -> anyhow::Result<NonBlocking> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let file_appender = tracing_appender::rolling::daily(directory, "critique-stage.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow::anyhow!("Tracing log guard already initialized"))?;

    Ok(non_blocking)
}
