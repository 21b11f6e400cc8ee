//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, frame limit > 0)
//! - Reject empty downstream targets; repeats are allowed and dial one
//!   connection each
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
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

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    } else if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    for target in &config.downstream.targets {
        if target.trim().is_empty() {
            errors.push(ValidationError::new("downstream.targets", "target must not be empty"));
        }
    }

    if config.downstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("downstream.connect_timeout_secs", "must be greater than 0"));
    }
    if config.downstream.max_message_bytes == 0 {
        errors.push(ValidationError::new("downstream.max_message_bytes", "must be greater than 0"));
    }
    if config.session.watchdog_secs == 0 {
        errors.push(ValidationError::new("session.watchdog_secs", "must be greater than 0"));
    }
    if config.stream.max_frame_bytes == 0 {
        errors.push(ValidationError::new("stream.max_frame_bytes", "must be greater than 0"));
    }

    if config.observability.log_level.trim().is_empty() {
        errors.push(ValidationError::new("observability.log_level", "must not be empty"));
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
    fn defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn all_problems_are_reported() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = String::new();
        config.downstream.targets = vec!["a:1".into(), " ".into(), String::new()];
        config.downstream.connect_timeout_secs = 0;
        config.session.watchdog_secs = 0;
        config.stream.max_frame_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "downstream.targets",
                "downstream.targets",
                "downstream.connect_timeout_secs",
                "session.watchdog_secs",
                "stream.max_frame_bytes",
            ]
        );
    }

    #[test]
    fn repeated_targets_are_valid() {
        let mut config = GatewayConfig::default();
        config.downstream.targets = vec!["127.0.0.1:8686".to_string(); 5];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn gateway_without_downstream_targets_is_valid() {
        let mut config = GatewayConfig::default();
        config.downstream.targets.clear();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
