use std::net::SocketAddr;

use eyre::Result;
use http::Method;

use crate::{
    config::models::{AppConfig, CorsConfig},
    core::media::MediaHandler,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ConfigError>;

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Application configuration validator
pub struct AppConfigValidator;

impl AppConfigValidator {
    /// Validate the entire application configuration, reporting every error found
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = MediaHandler::for_media_type(&config.media_type) {
            errors.push(ConfigError::InvalidField {
                field: "media_type".to_string(),
                message: e.to_string(),
            });
        }

        if config.allowed_hosts.is_empty() {
            errors.push(ConfigError::InvalidField {
                field: "allowed_hosts".to_string(),
                message: "At least one host must be allowed (use '*' to allow any)".to_string(),
            });
        }
        for host in &config.allowed_hosts {
            if let Err(e) = Self::validate_host_pattern(host) {
                errors.push(e);
            }
        }

        if let Some(cors) = &config.cors {
            errors.extend(Self::validate_cors(cors));
        }

        if config.gzip && config.gzip_min_size == 0 {
            errors.push(ConfigError::InvalidField {
                field: "gzip_min_size".to_string(),
                message: "Must be greater than zero when gzip is enabled".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate an allowed host: `*`, `*.domain` or a plain host name
    fn validate_host_pattern(host: &str) -> ValidationResult<()> {
        let invalid = |message: &str| ConfigError::InvalidField {
            field: format!("allowed_hosts '{host}'"),
            message: message.to_string(),
        };

        if host == "*" {
            return Ok(());
        }
        if host.is_empty() {
            return Err(invalid("Host cannot be empty"));
        }
        if host.contains("://") {
            return Err(invalid(
                "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')",
            ));
        }
        let name = host.strip_prefix("*.").unwrap_or(host);
        if name.contains('*') || name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(invalid("Wildcards are only allowed as a leading '*.'"));
        }
        Ok(())
    }

    fn validate_cors(cors: &CorsConfig) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for method in &cors.allow_methods {
            if method != "*" && method.parse::<Method>().is_err() {
                errors.push(ConfigError::InvalidField {
                    field: "cors.allow_methods".to_string(),
                    message: format!("Invalid HTTP method '{method}'"),
                });
            }
        }
        for origin in &cors.allow_origins {
            if origin != "*" && !(origin.starts_with("http://") || origin.starts_with("https://")) {
                errors.push(ConfigError::InvalidField {
                    field: "cors.allow_origins".to_string(),
                    message: format!("Origin '{origin}' must start with http:// or https://"),
                });
            }
        }
        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ConfigError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
