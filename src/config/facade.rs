//! Configuration loading entry points.

use crate::config::merge::builder_with_defaults;
use crate::config::sources::{self, global_file, workspace_file};
use crate::config::NexaConfig;
use crate::error::RuntimeError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Loads `NexaConfig` from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence, lowest to highest: defaults, global file, workspace files,
    /// environment.
    pub fn load(workspace_root: &Path) -> Result<NexaConfig, RuntimeError> {
        let global = global_file::global_config_path();
        Self::load_layers(workspace_root, global.as_deref())
    }

    /// Same as `load`, with an explicit global file (or none).
    pub fn load_layers(
        workspace_root: &Path,
        global: Option<&Path>,
    ) -> Result<NexaConfig, RuntimeError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = global {
            builder = global_file::add_to_builder(builder, path);
        }
        builder = workspace_file::add_to_builder(builder, workspace_root);
        builder = builder.add_source(sources::environment());

        let config: NexaConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load from a single file on top of the defaults; environment still applies.
    pub fn load_from_file(path: &Path) -> Result<NexaConfig, RuntimeError> {
        if !path.exists() {
            return Err(RuntimeError::ConfigError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config: NexaConfig = builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .add_source(sources::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
