//! Logging configuration with journald support on Linux.
//!
//! Sets up tracing-based logging that integrates with systemd's journal on
//! Linux systems, with file-based fallback for other platforms or when
//! journald is unavailable.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// On Linux, this will attempt to connect to systemd-journald.
/// If unavailable or on other platforms, logs go to a daily-rolling file.
///
/// Log level can be controlled via the `EASEL_LOG` environment variable:
/// - `EASEL_LOG=debug` for verbose output
/// - `EASEL_LOG=info` for standard output (default)
/// - `EASEL_LOG=warn` for warnings and errors only
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("EASEL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .init();

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("easel")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "easel.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Keep the guard alive for the lifetime of the process; init() runs once.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(_guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
