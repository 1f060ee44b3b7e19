//! Configuration System
//!
//! Layered configuration for the agent runtime: built-in defaults, a global user
//! file, workspace files and `NEXA__SECTION__KEY` environment overrides. Every
//! throttle, spacing and timeout constant of the runtime is a field here.

use crate::logging::LoggingConfig;
use crate::settings::{
    CandidateSettings, ModelParameters, ModelPreferences, ServerType, ValidatorOptions,
    DEFAULT_MODEL,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexaConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub provider: ProviderSection,

    #[serde(default)]
    pub agent: AgentProfile,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission, queue, emitter and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Events admitted per throttle window
    pub throttle_limit: u32,
    pub throttle_window_ms: u64,
    pub throttle_cooldown_ms: u64,
    /// Work queue tick period
    pub queue_tick_ms: u64,
    /// Minimum time between a completion and the next dequeue
    pub min_message_interval_ms: u64,
    /// How long finished queue entries are kept for duplicate lookups
    pub entry_ttl_secs: u64,
    pub emit_min_spacing_ms: u64,
    pub recent_id_capacity: usize,
    pub recent_id_retain: usize,
    pub request_timeout_secs: u64,
    pub validation_timeout_secs: u64,
    /// Prior turns sent with each request
    pub context_turns: usize,
    /// Turns kept in persisted history
    pub history_cap: usize,
    /// Capacity of the outbound broadcast channel
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            throttle_limit: 10,
            throttle_window_ms: 1000,
            throttle_cooldown_ms: 5000,
            queue_tick_ms: 100,
            min_message_interval_ms: 100,
            entry_ttl_secs: 300,
            emit_min_spacing_ms: 100,
            recent_id_capacity: 100,
            recent_id_retain: 50,
            request_timeout_secs: 60,
            validation_timeout_secs: 15,
            context_turns: 5,
            history_cap: 50,
            event_buffer: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }

    pub fn queue_tick(&self) -> Duration {
        Duration::from_millis(self.queue_tick_ms)
    }

    pub fn min_message_interval(&self) -> Duration {
        Duration::from_millis(self.min_message_interval_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    pub fn emit_min_spacing(&self) -> Duration {
        Duration::from_millis(self.emit_min_spacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let positive = [
            ("throttle_limit", u64::from(self.throttle_limit)),
            ("throttle_window_ms", self.throttle_window_ms),
            ("queue_tick_ms", self.queue_tick_ms),
            ("request_timeout_secs", self.request_timeout_secs),
            ("validation_timeout_secs", self.validation_timeout_secs),
            ("recent_id_capacity", self.recent_id_capacity as u64),
            ("history_cap", self.history_cap as u64),
            ("event_buffer", self.event_buffer as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                problems.push(format!("{} must be greater than 0", name));
            }
        }
        if self.recent_id_retain > self.recent_id_capacity {
            problems.push(format!(
                "recent_id_retain ({}) must not exceed recent_id_capacity ({})",
                self.recent_id_retain, self.recent_id_capacity
            ));
        }
        problems
    }
}

/// Default provider settings and validation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub server_type: ServerType,
    pub api_url: String,
    pub model: String,
    pub parameters: ModelParameters,
    /// Ranked keywords used to pick a replacement model
    pub model_preferences: Vec<String>,
    /// Rewrite URLs whose port differs from the server type's conventional port
    pub canonical_ports: bool,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            server_type: ServerType::LmStudio,
            api_url: ServerType::LmStudio.default_base_url(),
            model: DEFAULT_MODEL.to_string(),
            parameters: ModelParameters::default(),
            model_preferences: ModelPreferences::default().keywords().to_vec(),
            canonical_ports: true,
        }
    }
}

impl ProviderSection {
    pub fn default_candidate(&self) -> CandidateSettings {
        CandidateSettings {
            server_type: Some(self.server_type),
            api_url: Some(self.api_url.clone()),
            model: Some(self.model.clone()),
            parameters: self.parameters.clone(),
        }
    }

    pub fn validator_options(&self, timeout: Duration) -> ValidatorOptions {
        ValidatorOptions {
            preferences: ModelPreferences::new(self.model_preferences.iter().cloned()),
            timeout,
            canonical_ports: self.canonical_ports,
        }
    }
}

/// Identity of the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    /// Author name on emitted messages
    pub name: String,
    pub system_prompt: String,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "Project Manager".to_string(),
            system_prompt: "You are the Project Manager for this workspace. Answer questions \
                about project status, tasks, blockers and priorities concisely, and say so \
                when you do not have the information."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Sled => f.write_str("sled"),
            StorageBackend::Memory => f.write_str("memory"),
        }
    }
}

/// Where persisted agent state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sled,
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "nexa", "nexa-agent")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".nexa/store"))
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    Runtime(String),
    Provider(String),
    Agent(String),
    Storage(String),
    Logging(String),
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValidationError::Runtime(msg) => write!(f, "Runtime: {}", msg),
            ConfigValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ConfigValidationError::Agent(msg) => write!(f, "Agent: {}", msg),
            ConfigValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ConfigValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

impl NexaConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors: Vec<ConfigValidationError> = self
            .runtime
            .validate()
            .into_iter()
            .map(ConfigValidationError::Runtime)
            .collect();

        if self.provider.model.trim().is_empty() {
            errors.push(ConfigValidationError::Provider(
                "model cannot be empty".to_string(),
            ));
        }
        if let Err(e) = crate::settings::normalize_api_url(
            &self.provider.api_url,
            self.provider.server_type,
            false,
        ) {
            errors.push(ConfigValidationError::Provider(e.to_string()));
        }

        if self.agent.name.trim().is_empty() {
            errors.push(ConfigValidationError::Agent(
                "name cannot be empty".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Sled
            && self.storage.path.as_os_str().is_empty()
        {
            errors.push(ConfigValidationError::Storage(
                "path cannot be empty for the sled backend".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ConfigValidationError::Logging(format!(
                "invalid format '{}' (must be 'text' or 'json')",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
