//! Merge rules: defaults, override order, conflict handling.
//!
//! Built-in defaults are the serialized `NexaConfig::default()`, so every key exists
//! before any file or environment layer is applied. Later layers override earlier
//! ones key by key; tables merge, scalars and arrays replace.

use crate::config::NexaConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the built-in defaults as its lowest layer.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&NexaConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
