//! snicert configuration
//!
//! Configuration is a KDL document. Every block and every field is optional;
//! the defaults reproduce a single-listener deployment on :443 that renews
//! certificates 15 days before expiry with a daily scan.
//!
//! # Example
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:443"
//!     min-tls-version "1.2"
//! }
//! storage {
//!     path "/var/lib/snicert"
//! }
//! renewal {
//!     threshold-days 15
//!     check-interval-hours 24
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

mod kdl;
pub mod validate;

pub use validate::{lint_config, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

const EMBEDDED_DEFAULT: &str = include_str!("../default.kdl");

const SECS_PER_DAY: u64 = 24 * 3600;

/// Largest accepted `renewal.threshold-days`
pub const MAX_THRESHOLD_DAYS: u32 = 3650;

/// Largest accepted `renewal.check-interval-hours` (one year)
pub const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 366;

/// Largest accepted `renewal.initial-delay-secs` (one day)
pub const MAX_INITIAL_DELAY_SECS: u64 = SECS_PER_DAY;

/// Largest accepted `renewal.issuance-timeout-secs` (one day)
pub const MAX_ISSUANCE_TIMEOUT_SECS: u64 = SECS_PER_DAY;

/// Largest accepted `server.shutdown-grace-secs`
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 3600;

/// Largest accepted `default-certificate.validity-days` (100 years)
pub const MAX_VALIDITY_DAYS: u32 = 36_500;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration document: {0}")]
    Parse(String),

    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub default_certificate: DefaultCertificateConfig,
}

impl Config {
    /// Parse configuration from KDL text
    pub fn from_kdl(text: &str) -> Result<Self, ConfigError> {
        let config = kdl::parse_document(text).map_err(|e| ConfigError::Parse(format!("{e:#}")))?;
        debug!(
            listen = %config.server.listen,
            storage = %config.storage.path.display(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loading configuration file");
        Self::from_kdl(&text)
    }

    /// The configuration compiled into the binary
    pub fn default_embedded() -> Result<Self, ConfigError> {
        Self::from_kdl(EMBEDDED_DEFAULT)
    }

    /// Check hard constraints
    ///
    /// Returns every violation at once rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = validate::check_config(self);
        if result.errors.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        Err(ConfigError::Invalid(messages.join("; ")))
    }
}

// ============================================================================
// Server
// ============================================================================

/// Minimum TLS protocol version accepted by the listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

impl TlsVersion {
    /// Parse "1.2" / "1.3" (also accepts a "TLS" / "TLSv" prefix)
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let version = lower
            .strip_prefix("tlsv")
            .or_else(|| lower.strip_prefix("tls"))
            .unwrap_or(&lower);
        match version {
            "1.2" => Some(Self::Tls12),
            "1.3" => Some(Self::Tls13),
            _ => None,
        }
    }
}

/// HTTPS listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the HTTPS listener (certificates + admin API)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Lowest TLS version negotiated
    #[serde(default)]
    pub min_tls_version: TlsVersion,

    /// How long shutdown waits for connections and in-flight issuances
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Upper bound on admin request bodies
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

pub(crate) fn default_listen() -> String { "0.0.0.0:443".to_string() }
pub(crate) fn default_shutdown_grace_secs() -> u64 { 10 }
pub(crate) fn default_max_request_body_bytes() -> usize { 64 * 1024 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            min_tls_version: TlsVersion::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.listen", &self.listen)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Certificate record storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one record per domain
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

pub(crate) fn default_storage_path() -> PathBuf { PathBuf::from("certs") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

// ============================================================================
// ACME
// ============================================================================

/// Certificate authority settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// ACME directory URL
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Use the Let's Encrypt staging environment
    ///
    /// Only takes effect while `directory` is left at the production default.
    #[serde(default)]
    pub staging: bool,

    /// Address answering HTTP-01 challenges
    #[serde(default = "default_challenge_listen")]
    pub challenge_listen: String,

    /// Delay between order status polls
    #[serde(default = "default_order_poll_secs")]
    pub order_poll_secs: u64,
}

pub(crate) fn default_directory() -> String { LETSENCRYPT_PRODUCTION.to_string() }
pub(crate) fn default_challenge_listen() -> String { "0.0.0.0:80".to_string() }
pub(crate) fn default_order_poll_secs() -> u64 { 2 }

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            staging: false,
            challenge_listen: default_challenge_listen(),
            order_poll_secs: default_order_poll_secs(),
        }
    }
}

impl AcmeConfig {
    /// Directory URL after applying the staging switch
    pub fn directory_url(&self) -> &str {
        if self.staging && self.directory == LETSENCRYPT_PRODUCTION {
            LETSENCRYPT_STAGING
        } else {
            &self.directory
        }
    }

    pub fn challenge_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("acme.challenge-listen", &self.challenge_listen)
    }

    pub fn order_poll_interval(&self) -> Duration {
        Duration::from_secs(self.order_poll_secs)
    }
}

// ============================================================================
// Renewal
// ============================================================================

/// Renewal scheduling and issuance bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Renew when fewer than this many days remain
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,

    /// Time between scans of the record store
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,

    /// Delay before the first scan after startup
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Overall bound on one issuance attempt
    #[serde(default = "default_issuance_timeout_secs")]
    pub issuance_timeout_secs: u64,

    /// Renewals started concurrently by one scan
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

pub(crate) fn default_threshold_days() -> u32 { 15 }
pub(crate) fn default_check_interval_hours() -> u64 { 24 }
pub(crate) fn default_initial_delay_secs() -> u64 { 10 }
pub(crate) fn default_issuance_timeout_secs() -> u64 { 300 }
pub(crate) fn default_max_concurrent() -> usize { 4 }

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            threshold_days: default_threshold_days(),
            check_interval_hours: default_check_interval_hours(),
            initial_delay_secs: default_initial_delay_secs(),
            issuance_timeout_secs: default_issuance_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RenewalConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(u64::from(self.threshold_days).saturating_mul(SECS_PER_DAY))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours.saturating_mul(3600))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn issuance_timeout(&self) -> Duration {
        Duration::from_secs(self.issuance_timeout_secs)
    }
}

// ============================================================================
// Default certificate
// ============================================================================

/// Self-signed fallback certificate presented when no domain matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultCertificateConfig {
    /// DNS name placed in the subject alternative names
    #[serde(default = "default_cert_name")]
    pub name: String,

    /// Subject organization
    #[serde(default = "default_cert_organization")]
    pub organization: String,

    /// Lifetime from process start
    #[serde(default = "default_cert_validity_days")]
    pub validity_days: u32,
}

pub(crate) fn default_cert_name() -> String { "localhost".to_string() }
pub(crate) fn default_cert_organization() -> String { "Default Org".to_string() }
pub(crate) fn default_cert_validity_days() -> u32 { 365 }

impl Default for DefaultCertificateConfig {
    fn default() -> Self {
        Self {
            name: default_cert_name(),
            organization: default_cert_organization(),
            validity_days: default_cert_validity_days(),
        }
    }
}

impl DefaultCertificateConfig {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(u64::from(self.validity_days).saturating_mul(SECS_PER_DAY))
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{field} '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_matches_defaults() {
        let embedded = Config::default_embedded().unwrap();
        assert_eq!(embedded, Config::default());
        embedded.validate().unwrap();
    }

    #[test]
    fn test_default_durations() {
        let renewal = RenewalConfig::default();
        assert_eq!(renewal.threshold(), Duration::from_secs(15 * 86400));
        assert_eq!(renewal.check_interval(), Duration::from_secs(24 * 3600));

        let cert = DefaultCertificateConfig::default();
        assert_eq!(cert.validity(), Duration::from_secs(365 * 86400));
    }

    #[test]
    fn test_durations_saturate_instead_of_overflowing() {
        let renewal = RenewalConfig {
            check_interval_hours: u64::MAX,
            threshold_days: u32::MAX,
            ..Default::default()
        };
        assert_eq!(renewal.check_interval(), Duration::from_secs(u64::MAX));
        assert!(renewal.threshold() > Duration::from_secs(u64::from(u32::MAX)));

        let cert = DefaultCertificateConfig {
            validity_days: u32::MAX,
            ..Default::default()
        };
        assert!(cert.validity() > Duration::ZERO);
    }

    #[test]
    fn test_staging_switch() {
        let mut acme = AcmeConfig::default();
        assert_eq!(acme.directory_url(), LETSENCRYPT_PRODUCTION);

        acme.staging = true;
        assert_eq!(acme.directory_url(), LETSENCRYPT_STAGING);

        acme.directory = "https://ca.internal/directory".to_string();
        assert_eq!(acme.directory_url(), "https://ca.internal/directory");
    }

    #[test]
    fn test_tls_version_loose_parse() {
        assert_eq!(TlsVersion::from_str_loose("1.2"), Some(TlsVersion::Tls12));
        assert_eq!(TlsVersion::from_str_loose("TLSv1.3"), Some(TlsVersion::Tls13));
        assert_eq!(TlsVersion::from_str_loose("tls1.3"), Some(TlsVersion::Tls13));
        assert_eq!(TlsVersion::from_str_loose("1.1"), None);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/snicert.kdl").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snicert.kdl");
        std::fs::write(&path, "storage {\n    path \"/srv/certs\"\n}\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.path, PathBuf::from("/srv/certs"));
        assert_eq!(config.server, ServerConfig::default());
    }
}
