//! Logging configuration for dbexec.
//!
//! Logs go to stderr so that stdout carries only the report.

use tracing_subscriber::EnvFilter;

/// Returns the filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Initializes logging to stderr.
///
/// `RUST_LOG` takes precedence; otherwise only warnings and errors are shown,
/// or everything down to debug with `verbose`.
pub fn init_stderr_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
