//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

use crate::error::{TokenVaultError, TokenVaultResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "tokenvault_core=info,tokenvault=info";

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter`; `default_filter` falls back to
/// [`DEFAULT_LOG_FILTER`].
///
/// # Errors
///
/// Returns [`TokenVaultError::Config`] if the filter does not parse or a
/// global subscriber is already installed.
pub fn init_tracing(default_filter: Option<&str>) -> TokenVaultResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_LOG_FILTER))
            .map_err(|err| TokenVaultError::Config(format!("invalid log filter: {err}")))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| TokenVaultError::Config(format!("tracing already initialized: {err}")))
}
