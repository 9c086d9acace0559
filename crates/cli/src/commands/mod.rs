pub mod config_cmd;
pub mod graph;
pub mod profile;
pub mod replay;

use anyhow::Context;
use concierge_config::AppConfig;
use std::path::Path;

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
        None => AppConfig::load().context("Failed to load config"),
    }
}
