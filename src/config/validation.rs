//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, ports valid)
//! - Check addresses parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `listener.bind_address`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }

    if config.backend.is_configured() && config.backend.port == 0 {
        errors.push(ValidationError::new(
            "backend.port",
            "must be non-zero when backend.host is set",
        ));
    }

    if config.backend.max_response_line_bytes == 0 {
        errors.push(ValidationError::new(
            "backend.max_response_line_bytes",
            "must be greater than 0",
        ));
    }

    if config.framing.max_frame_bytes == 0 {
        errors.push(ValidationError::new("framing.max_frame_bytes", "must be greater than 0"));
    }
    if config.framing.read_chunk_bytes == 0 {
        errors.push(ValidationError::new("framing.read_chunk_bytes", "must be greater than 0"));
    } else if config.framing.max_frame_bytes > 0
        && config.framing.read_chunk_bytes > config.framing.max_frame_bytes
    {
        errors.push(ValidationError::new(
            "framing.read_chunk_bytes",
            "must not exceed framing.max_frame_bytes",
        ));
    }

    if config.session.relay_buffer_bytes == 0 {
        errors.push(ValidationError::new(
            "session.relay_buffer_bytes",
            "must be greater than 0",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = RelayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.backend.host = "pool.local".into();
        config.backend.port = 0;
        config.session.relay_buffer_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "backend.port", "session.relay_buffer_bytes"]
        );
    }

    #[test]
    fn chunk_larger_than_frame_cap_is_rejected() {
        let mut config = RelayConfig::default();
        config.framing.max_frame_bytes = 1024;
        config.framing.read_chunk_bytes = 4096;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "framing.read_chunk_bytes");
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = RelayConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
