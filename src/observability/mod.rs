//! Observability (AU-2, AU-3, AU-12)
//!
//! The pipeline emits plain `tracing` records plus [`security_event!`] records
//! for audit-relevant events. [`init`] installs a `tracing-subscriber` stack
//! for hosts that do not bring their own.
//!
//! # Usage
//!
//! ```ignore
//! use merchant_portal_security::observability::{init, ObservabilityConfig};
//!
//! init(&ObservabilityConfig::from_env()?)?;
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};
pub use events::{security_event, SecurityEvent, Severity};

use thiserror::Error;

/// Observability initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("observability config error: {0}")]
    Config(String),

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Provider(String),
}

/// Install the global tracing subscriber.
///
/// Call once at startup, before any logging occurs.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_stdout_tracing(config)?;

    tracing::info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = ObservabilityConfig::builder().log_filter("merchant_portal_security=loud").build();
        let err = providers::env_filter(&config).unwrap_err();
        assert!(matches!(err, ObservabilityError::Config(_)));
    }
}
