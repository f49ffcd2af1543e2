//! Logging and tracing initialization.

use std::sync::Arc;

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber with the given configuration.
///
/// `RUST_LOG` wins over the configured level when set. When a log file is
/// configured, output goes there instead of stderr; falling back to stderr
/// (with a warning) if the file cannot be opened.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let log_file = config.file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Arc::new(file)),
            Err(e) => {
                eprintln!("versemotion: cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = match (config.json, log_file) {
        (true, Some(file)) => {
            tracing::subscriber::set_global_default(builder.json().with_writer(file).finish())
        }
        (true, None) => tracing::subscriber::set_global_default(builder.json().finish()),
        (false, Some(file)) => {
            tracing::subscriber::set_global_default(builder.with_writer(file).finish())
        }
        (false, None) => tracing::subscriber::set_global_default(builder.finish()),
    };
    // A second init (tests, embedding hosts) keeps the first subscriber.
    result.ok();
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}
