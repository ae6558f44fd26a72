//! Shared helpers for the CLI: logging setup, configuration and engine
//! construction.

use std::path::Path;

use anyhow::{Context, Result};
use eko_core::{Eko, EkoConfig, ProviderSpec};
use tracing_subscriber::EnvFilter;

/// Configuration file picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG_FILE: &str = "eko.toml";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialise the global tracing subscriber.  `RUST_LOG` wins over
/// `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the configuration from `path`, or from `eko.toml` when it exists,
/// then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<EkoConfig> {
    let default = Path::new(DEFAULT_CONFIG_FILE);
    let path = match path {
        Some(p) => Some(p),
        None if default.exists() => Some(default),
        None => None,
    };
    EkoConfig::load(path).context("failed to load configuration")
}

/// Build the engine from a loaded configuration.
pub fn build_eko(config: EkoConfig) -> Result<Eko> {
    let client = config
        .llm
        .to_client_config()
        .context("incomplete [llm] configuration (is an API key set?)")?;
    Eko::new(ProviderSpec::Config(client), config).context("failed to initialise the engine")
}
