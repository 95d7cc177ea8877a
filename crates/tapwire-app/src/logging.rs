//! Logging setup for the `tapwire` binary.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Number of rotated log files kept.
const MAX_LOG_FILES: usize = 5;

/// Get the logs directory path.
pub fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "tapwire", "Tapwire").map(|dirs| dirs.data_dir().join("logs"))
}

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(log_level: &str, debug: bool) -> String {
    let level = if debug { "debug" } else { log_level };
    format!("tapwire={level},tapwire_core={level},tapwire_proxy={level},tapwire_server={level},tapwire_app={level},warn")
}

/// Initialize logging to the console plus a daily rotated file.
///
/// The returned guard must be held for the lifetime of the program so
/// buffered file output is flushed.
pub fn init_logging(log_level: &str, debug: bool) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level, debug)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(MAX_LOG_FILES)
                .filename_prefix("tapwire")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_level() {
        assert!(default_directive("info", true).starts_with("tapwire=debug,"));
        assert!(default_directive("trace", false).contains("tapwire_proxy=trace"));
        assert!(default_directive("info", false).ends_with(",warn"));
    }

    #[test]
    fn directive_parses() {
        let _ = EnvFilter::new(default_directive("info", false));
    }
}
