//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (address resolves, timeouts > 0)
//! - Check that TLS material is fully specified when enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BrokerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BrokerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} does not resolve to a socket address")]
    InvalidBindAddress(String),
    #[error("listener.tls.{0} must not be empty")]
    MissingTlsPath(&'static str),
    #[error("listener.sniff_timeout_secs must be greater than zero")]
    ZeroSniffTimeout,
    #[error("shutdown.drain_timeout_secs must be greater than zero")]
    ZeroDrainTimeout,
    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Same resolution the service uses at bind time.
    if config.listen_address().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("key_path"));
        }
    }
    if config.listener.sniff_timeout_secs == 0 {
        errors.push(ValidationError::ZeroSniffTimeout);
    }
    if config.shutdown.drain_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDrainTimeout);
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
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
    use crate::config::schema::TlsConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&BrokerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = BrokerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.listener.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });
        config.shutdown.drain_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidBindAddress("not-an-address".into()),
                ValidationError::MissingTlsPath("cert_path"),
                ValidationError::ZeroDrainTimeout,
            ]
        );
    }

    #[test]
    fn oversized_message_size_is_left_to_the_clamp() {
        let mut config = BrokerConfig::default();
        config.limit.message_size = 70000;
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn host_name_bind_address_is_accepted() {
        let mut config = BrokerConfig::default();
        config.listener.bind_address = "localhost:1883".into();
        assert_eq!(validate_config(&config), Ok(()));

        config.listener.bind_address = "localhost".into();
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidBindAddress("localhost".into())])
        );
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = BrokerConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress("nope".into())])
        );
    }
}
