//! ACME, renewal and default-certificate KDL parsing.

use anyhow::Result;
use tracing::trace;

use crate::{
    default_cert_name, default_cert_organization, default_cert_validity_days,
    default_challenge_listen, default_check_interval_hours, default_directory,
    default_initial_delay_secs, default_issuance_timeout_secs, default_max_concurrent,
    default_order_poll_secs, default_threshold_days, AcmeConfig, DefaultCertificateConfig,
    RenewalConfig,
};

use super::helpers::{ensure_known_children, get_bool_entry, get_string_entry, get_unsigned_entry};

/// Parse acme configuration block
pub fn parse_acme_config(node: &kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");
    ensure_known_children(
        node,
        &["directory", "staging", "challenge-listen", "order-poll-secs"],
    )?;

    let config = AcmeConfig {
        directory: get_string_entry(node, "directory")?.unwrap_or_else(default_directory),
        staging: get_bool_entry(node, "staging")?.unwrap_or(false),
        challenge_listen: get_string_entry(node, "challenge-listen")?
            .unwrap_or_else(default_challenge_listen),
        order_poll_secs: get_unsigned_entry(node, "order-poll-secs")?
            .unwrap_or_else(default_order_poll_secs),
    };

    trace!(
        directory = %config.directory_url(),
        challenge_listen = %config.challenge_listen,
        "Parsed acme configuration"
    );
    Ok(config)
}

/// Parse renewal configuration block
pub fn parse_renewal_config(node: &kdl::KdlNode) -> Result<RenewalConfig> {
    trace!("Parsing renewal configuration block");
    ensure_known_children(
        node,
        &[
            "threshold-days",
            "check-interval-hours",
            "initial-delay-secs",
            "issuance-timeout-secs",
            "max-concurrent",
        ],
    )?;

    let config = RenewalConfig {
        threshold_days: get_unsigned_entry(node, "threshold-days")?
            .unwrap_or_else(default_threshold_days),
        check_interval_hours: get_unsigned_entry(node, "check-interval-hours")?
            .unwrap_or_else(default_check_interval_hours),
        initial_delay_secs: get_unsigned_entry(node, "initial-delay-secs")?
            .unwrap_or_else(default_initial_delay_secs),
        issuance_timeout_secs: get_unsigned_entry(node, "issuance-timeout-secs")?
            .unwrap_or_else(default_issuance_timeout_secs),
        max_concurrent: get_unsigned_entry(node, "max-concurrent")?
            .unwrap_or_else(default_max_concurrent),
    };

    trace!(
        threshold_days = config.threshold_days,
        check_interval_hours = config.check_interval_hours,
        "Parsed renewal configuration"
    );
    Ok(config)
}

/// Parse default-certificate configuration block
pub fn parse_default_certificate_config(node: &kdl::KdlNode) -> Result<DefaultCertificateConfig> {
    trace!("Parsing default-certificate configuration block");
    ensure_known_children(node, &["name", "organization", "validity-days"])?;

    Ok(DefaultCertificateConfig {
        name: get_string_entry(node, "name")?.unwrap_or_else(default_cert_name),
        organization: get_string_entry(node, "organization")?
            .unwrap_or_else(default_cert_organization),
        validity_days: get_unsigned_entry(node, "validity-days")?
            .unwrap_or_else(default_cert_validity_days),
    })
}
