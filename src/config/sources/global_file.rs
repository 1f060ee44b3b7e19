//! Global config file source: $XDG_CONFIG_HOME/nexa/config.toml or ~/.config/nexa/config.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path to global config file.
pub fn global_config_path() -> Option<PathBuf> {
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_home.join("nexa").join("config.toml"))
}

/// Add the global config file to the builder if it exists.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>, path: &Path) -> ConfigBuilder<DefaultState> {
    if !path.exists() {
        debug!(config_path = %path.display(), "No global configuration file");
        return builder;
    }
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    builder.add_source(File::from(canonical).required(false))
}
