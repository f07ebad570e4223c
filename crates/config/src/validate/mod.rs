//! Configuration validation
//!
//! Hard errors ([`check_config`]) block startup; warnings ([`lint_config`])
//! are reported by `snicert --test` and at startup but never block it.

mod lint;

use std::fmt;

use crate::{
    Config, MAX_CHECK_INTERVAL_HOURS, MAX_INITIAL_DELAY_SECS, MAX_ISSUANCE_TIMEOUT_SECS,
    MAX_SHUTDOWN_GRACE_SECS, MAX_THRESHOLD_DAYS, MAX_VALIDITY_DAYS,
};

pub use lint::lint_config;

/// Area of the configuration an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Renewal,
    Certificate,
    Server,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Renewal => "renewal",
            Self::Certificate => "certificate",
            Self::Server => "server",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collected errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check constraints that make the configuration unusable
pub fn check_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(e) = config.server.listen_addr() {
        result.add_error(ValidationError::new(ErrorCategory::Network, e.to_string()));
    }
    if let Err(e) = config.acme.challenge_addr() {
        result.add_error(ValidationError::new(ErrorCategory::Network, e.to_string()));
    }
    if config.server.max_request_body_bytes == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Server,
            "server.max-request-body-bytes must be greater than zero",
        ));
    }

    if config.server.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
        result.add_error(ValidationError::new(
            ErrorCategory::Server,
            format!("server.shutdown-grace-secs must be at most {MAX_SHUTDOWN_GRACE_SECS}"),
        ));
    }

    let renewal = &config.renewal;
    if renewal.threshold_days == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            "renewal.threshold-days must be greater than zero",
        ));
    }
    if renewal.check_interval_hours == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            "renewal.check-interval-hours must be greater than zero",
        ));
    }
    if renewal.issuance_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            "renewal.issuance-timeout-secs must be greater than zero",
        ));
    }
    if renewal.threshold_days > MAX_THRESHOLD_DAYS {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            format!("renewal.threshold-days must be at most {MAX_THRESHOLD_DAYS}"),
        ));
    }
    if renewal.check_interval_hours > MAX_CHECK_INTERVAL_HOURS {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            format!("renewal.check-interval-hours must be at most {MAX_CHECK_INTERVAL_HOURS}"),
        ));
    }
    if renewal.initial_delay_secs > MAX_INITIAL_DELAY_SECS {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            format!("renewal.initial-delay-secs must be at most {MAX_INITIAL_DELAY_SECS}"),
        ));
    }
    if renewal.issuance_timeout_secs > MAX_ISSUANCE_TIMEOUT_SECS {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            format!("renewal.issuance-timeout-secs must be at most {MAX_ISSUANCE_TIMEOUT_SECS}"),
        ));
    }
    if renewal.max_concurrent == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Renewal,
            "renewal.max-concurrent must be greater than zero",
        ));
    }

    let default_cert = &config.default_certificate;
    if default_cert.validity_days == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            "default-certificate.validity-days must be greater than zero",
        ));
    }
    if default_cert.validity_days > MAX_VALIDITY_DAYS {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("default-certificate.validity-days must be at most {MAX_VALIDITY_DAYS}"),
        ));
    }
    if default_cert.name.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            "default-certificate.name must not be empty",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = check_config(&Config::default());
        assert!(result.is_ok(), "{:?}", result.errors);
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.server.listen = "not-an-address".to_string();
        config.renewal.threshold_days = 0;
        config.renewal.check_interval_hours = 0;
        config.default_certificate.validity_days = 0;

        let result = check_config(&config);
        assert_eq!(result.errors.len(), 4);
        assert!(result
            .errors
            .iter()
            .any(|e| e.category == ErrorCategory::Network && e.message.contains("server.listen")));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threshold-days"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.default_certificate.validity_days = u32::MAX;
        config.renewal.check_interval_hours = u64::MAX / 2;
        config.renewal.issuance_timeout_secs = u64::MAX;
        config.renewal.threshold_days = MAX_THRESHOLD_DAYS + 1;
        config.renewal.initial_delay_secs = MAX_INITIAL_DELAY_SECS + 1;
        config.server.shutdown_grace_secs = u64::MAX;

        let result = check_config(&config);
        assert_eq!(result.errors.len(), 6, "{:?}", result.errors);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("validity-days"));
        assert!(err.contains("check-interval-hours"));
        assert!(err.contains("issuance-timeout-secs"));
    }

    #[test]
    fn test_upper_bounds_are_inclusive() {
        let mut config = Config::default();
        config.default_certificate.validity_days = MAX_VALIDITY_DAYS;
        config.renewal.check_interval_hours = MAX_CHECK_INTERVAL_HOURS;
        config.renewal.issuance_timeout_secs = MAX_ISSUANCE_TIMEOUT_SECS;
        config.renewal.threshold_days = MAX_THRESHOLD_DAYS;

        let result = check_config(&config);
        assert!(result.is_ok(), "{:?}", result.errors);
    }
}
