//! Tracing setup.
//!
//! `COMPANION_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` applies,
//! defaulting to info. With a log directory configured, output goes to a
//! daily-rotated file through a non-blocking writer whose guard must be held
//! until exit so buffered lines are flushed.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "COMPANION_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "companion-daemon.log";

pub fn init(directory: Option<&Path>) -> Option<WorkerGuard> {
    let filter = build_filter();

    if let Some(directory) = directory {
        match fs_err::create_dir_all(directory) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
                return Some(guard);
            }
            Err(err) => {
                eprintln!(
                    "companion-daemon: cannot create log directory {}: {}; logging to stderr",
                    directory.display(),
                    err
                );
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

fn build_filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
