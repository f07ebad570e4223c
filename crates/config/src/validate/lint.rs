//! Configuration linting for best practices
//!
//! Checks configuration for settings that work but are probably mistakes.

use super::{check_config, ValidationResult, ValidationWarning};
use crate::Config;

/// Typical lifetime of a publicly trusted ACME certificate
const TYPICAL_CA_LIFETIME_DAYS: u32 = 90;

/// Lint configuration for best practices
///
/// Hard errors from [`check_config`] are included so one call reports
/// everything.
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = check_config(config);
    let renewal = &config.renewal;

    if renewal.threshold_days >= TYPICAL_CA_LIFETIME_DAYS {
        result.add_warning(ValidationWarning::new(format!(
            "renewal.threshold-days is {} but CA certificates usually live {} days; every scan would renew everything",
            renewal.threshold_days, TYPICAL_CA_LIFETIME_DAYS
        )));
    }

    if renewal.check_interval_hours > u64::from(renewal.threshold_days) * 24 {
        result.add_warning(ValidationWarning::new(format!(
            "renewal.check-interval-hours ({}) is longer than the renewal threshold ({} days); certificates may expire between scans",
            renewal.check_interval_hours, renewal.threshold_days
        )));
    }

    if renewal.max_concurrent > 16 {
        result.add_warning(ValidationWarning::new(format!(
            "renewal.max-concurrent is {}; CAs rate-limit aggressive clients",
            renewal.max_concurrent
        )));
    }

    if config.acme.staging || config.acme.directory_url().contains("staging") {
        result.add_warning(ValidationWarning::new(
            "ACME staging directory in use; issued certificates are not publicly trusted",
        ));
    }

    if !config.acme.directory_url().starts_with("https://") {
        result.add_warning(ValidationWarning::new(format!(
            "ACME directory '{}' is not served over HTTPS",
            config.acme.directory_url()
        )));
    }

    if config.default_certificate.validity_days < 30 {
        result.add_warning(ValidationWarning::new(format!(
            "default-certificate.validity-days is {}; the fallback certificate is never renewed during the process lifetime",
            config.default_certificate.validity_days
        )));
    }

    result
}
