//! Server and storage KDL parsing.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::trace;

use crate::{
    default_listen, default_max_request_body_bytes, default_shutdown_grace_secs,
    default_storage_path, ServerConfig, StorageConfig, TlsVersion,
};

use super::helpers::{ensure_known_children, get_string_entry, get_unsigned_entry};

/// Parse server configuration block
pub fn parse_server_config(node: &kdl::KdlNode) -> Result<ServerConfig> {
    trace!("Parsing server configuration block");
    ensure_known_children(
        node,
        &["listen", "min-tls-version", "shutdown-grace-secs", "max-request-body-bytes"],
    )?;

    let min_tls_version = match get_string_entry(node, "min-tls-version")? {
        Some(raw) => TlsVersion::from_str_loose(&raw).ok_or_else(|| {
            anyhow!(
                "Invalid min-tls-version '{}'. Valid versions: 1.2, 1.3",
                raw
            )
        })?,
        None => TlsVersion::default(),
    };

    let config = ServerConfig {
        listen: get_string_entry(node, "listen")?.unwrap_or_else(default_listen),
        min_tls_version,
        shutdown_grace_secs: get_unsigned_entry(node, "shutdown-grace-secs")?
            .unwrap_or_else(default_shutdown_grace_secs),
        max_request_body_bytes: get_unsigned_entry(node, "max-request-body-bytes")?
            .unwrap_or_else(default_max_request_body_bytes),
    };

    trace!(
        listen = %config.listen,
        min_tls_version = ?config.min_tls_version,
        "Parsed server configuration"
    );

    Ok(config)
}

/// Parse storage configuration block
pub fn parse_storage_config(node: &kdl::KdlNode) -> Result<StorageConfig> {
    trace!("Parsing storage configuration block");
    ensure_known_children(node, &["path"])?;

    let path = get_string_entry(node, "path")?
        .map(PathBuf::from)
        .unwrap_or_else(default_storage_path);

    trace!(path = %path.display(), "Parsed storage configuration");
    Ok(StorageConfig { path })
}
