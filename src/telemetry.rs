//! Tracing subscriber setup for the `leasehold` binary.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Filter applied when `--verbose` is passed.
pub const VERBOSE_FILTER: &str = "debug";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Raised when the configured filter directive cannot be parsed.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Chooses the filter directive: `--verbose` wins, then `RUST_LOG`, then the
/// configured fallback.
#[must_use]
pub fn select_directive(verbose: bool, env_directive: Option<&str>, configured: &str) -> String {
    if verbose {
        return VERBOSE_FILTER.to_owned();
    }
    env_directive
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .unwrap_or(configured)
        .to_owned()
}

/// Builds an [`EnvFilter`] from a directive string.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when the directive is malformed.
pub fn build_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidFilter {
        directive: directive.to_owned(),
        message: err.to_string(),
    })
}

/// Installs a stderr `fmt` subscriber filtered by `directive`.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the directive is malformed or a global
/// subscriber already exists.
pub fn init(directive: &str) -> Result<(), TelemetryError> {
    let filter = build_filter(directive)?;
    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|err| TelemetryError::Install(err.to_string()))
}
