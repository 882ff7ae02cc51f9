//! Tracing subscriber setup for embedding applications.

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, defaulting to
/// `rs_flux_fill=info`. Returns an error if a global subscriber is already set.
pub fn init_tracing() -> crate::Result<()> {
    let directive = "rs_flux_fill=info"
        .parse::<Directive>()
        .map_err(|e| crate::FluxFillError::Config(format!("Invalid log directive: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| crate::FluxFillError::Config(format!("Logging already initialized: {}", e)))
}
