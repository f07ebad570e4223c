//! KDL document parsing.

mod helpers;
mod lifecycle;
mod server;

use anyhow::{anyhow, Context, Result};
use tracing::trace;

use crate::Config;

const TOP_LEVEL_BLOCKS: &[&str] = &["server", "storage", "acme", "renewal", "default-certificate"];

/// Parse a complete configuration document
pub fn parse_document(text: &str) -> Result<Config> {
    let doc: kdl::KdlDocument = text
        .parse()
        .map_err(|e: kdl::KdlError| anyhow!("KDL syntax error: {}", e))?;

    let mut config = Config::default();
    let mut seen: Vec<&str> = Vec::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if seen.contains(&name) {
            return Err(anyhow!("Duplicate '{}' block", name));
        }

        match name {
            "server" => {
                config.server = server::parse_server_config(node).context("In 'server' block")?;
            }
            "storage" => {
                config.storage =
                    server::parse_storage_config(node).context("In 'storage' block")?;
            }
            "acme" => {
                config.acme = lifecycle::parse_acme_config(node).context("In 'acme' block")?;
            }
            "renewal" => {
                config.renewal =
                    lifecycle::parse_renewal_config(node).context("In 'renewal' block")?;
            }
            "default-certificate" => {
                config.default_certificate = lifecycle::parse_default_certificate_config(node)
                    .context("In 'default-certificate' block")?;
            }
            other => {
                return Err(anyhow!(
                    "Unknown top-level block '{}'. Valid blocks: {}",
                    other,
                    TOP_LEVEL_BLOCKS.join(", ")
                ));
            }
        }
        seen.push(name);
    }

    trace!(blocks = ?seen, "Finished parsing configuration document");
    Ok(config)
}
