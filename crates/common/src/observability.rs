//! Tracing subscriber bootstrap.
//!
//! Binaries call [`init_tracing`] once at startup. `RUST_LOG` always wins
//! over the level chosen on the command line.

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// `default_level` is used when `RUST_LOG` is unset or invalid. Returns
/// `false` if a subscriber was already installed (tests, embedding).
pub fn init_tracing(default_level: &str, json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %default_level, json, "Tracing initialized");
    }
    installed
}
