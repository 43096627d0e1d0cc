//! Observability Configuration

use std::env;

use super::ObservabilityError;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// JSON format for production/log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    /// Parse "pretty", "json" or "compact"
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Log level filter (e.g., "info", "merchant_portal_security=debug")
    pub log_filter: String,
    /// Include source file and line in each record
    pub with_source_location: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            with_source_location: true,
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOG_FORMAT`: "pretty", "json", or "compact" (default: "pretty")
    /// - `RUST_LOG`: Log filter directive (default: "info")
    /// - `LOG_SOURCE_LOCATION`: "true"/"false" (default: "true")
    pub fn from_env() -> Result<Self, ObservabilityError> {
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => LogFormat::parse(&value)
                .ok_or_else(|| ObservabilityError::Config(format!("unknown LOG_FORMAT `{value}`")))?,
            Err(_) => defaults.log_format,
        };

        let log_filter = env::var("RUST_LOG").unwrap_or(defaults.log_filter);

        let with_source_location = match env::var("LOG_SOURCE_LOCATION") {
            Ok(value) => crate::parse::parse_bool(&value).ok_or_else(|| {
                ObservabilityError::Config(format!("invalid LOG_SOURCE_LOCATION `{value}`"))
            })?,
            Err(_) => defaults.with_source_location,
        };

        Ok(Self {
            log_format,
            log_filter,
            with_source_location,
        })
    }

    /// Create a new configuration builder
    pub fn builder() -> ObservabilityConfigBuilder {
        ObservabilityConfigBuilder::default()
    }
}

/// Builder for ObservabilityConfig
#[derive(Debug, Default)]
pub struct ObservabilityConfigBuilder {
    config: ObservabilityConfig,
}

impl ObservabilityConfigBuilder {
    /// Set the log format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the log filter
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Include or omit source locations
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.config.with_source_location = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ObservabilityConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, "info");
        assert!(config.with_source_location);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_builder() {
        let config = ObservabilityConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("merchant_portal_security=debug")
            .with_source_location(false)
            .build();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_filter, "merchant_portal_security=debug");
        assert!(!config.with_source_location);
    }
}
