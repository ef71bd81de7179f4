//! Process-wide `tracing` setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ArcmeshError;

/// Installs a formatting subscriber filtered by `RUST_LOG`, or by
/// `default_directive` when `RUST_LOG` is unset or invalid.
///
/// # Errors
/// [`ArcmeshError::Logging`] if a global subscriber is already set.
pub fn try_init(default_directive: &str) -> Result<(), ArcmeshError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| ArcmeshError::Logging(e.to_string()))
}

/// Like [`try_init`], but a second call is a no-op.
pub fn init(default_directive: &str) {
    if try_init(default_directive).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
