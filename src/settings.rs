//! Provider Settings
//!
//! Candidate settings arrive from the UI or the settings store and are unchecked.
//! Validated settings are schema-complete, carry a normalized URL and a model the
//! server actually reported. Only validated settings reach the request orchestrator.

use crate::error::AgentError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod validator;

pub use validator::{SettingsResolution, SettingsValidator, ValidatorOptions};

/// Model requested when nothing else is configured.
pub const DEFAULT_MODEL: &str = "qwen2.5-7b-instruct-1m";

/// Kind of local LLM server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerType {
    #[serde(alias = "lmstudio", alias = "lm_studio")]
    LmStudio,
    Ollama,
}

impl ServerType {
    /// Port the server listens on out of the box.
    pub fn conventional_port(self) -> u16 {
        match self {
            ServerType::LmStudio => 1234,
            ServerType::Ollama => 11434,
        }
    }

    pub fn default_base_url(self) -> String {
        format!("http://localhost:{}", self.conventional_port())
    }

    /// Path of the model-listing endpoint, relative to the base URL.
    pub fn models_path(self) -> &'static str {
        match self {
            ServerType::LmStudio => "/v1/models",
            ServerType::Ollama => "/api/tags",
        }
    }

    /// Path of the completion endpoint, relative to the base URL.
    pub fn completion_path(self) -> &'static str {
        match self {
            ServerType::LmStudio => "/v1/chat/completions",
            ServerType::Ollama => "/api/generate",
        }
    }

    /// The other known provider type, used by the fallback chain.
    pub fn other(self) -> ServerType {
        match self {
            ServerType::LmStudio => ServerType::Ollama,
            ServerType::Ollama => ServerType::LmStudio,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerType::LmStudio => f.write_str("lmStudio"),
            ServerType::Ollama => f.write_str("ollama"),
        }
    }
}

/// Sampling and context parameters forwarded to the provider.
///
/// Serialized in snake_case (config files, persisted cache); the camelCase names
/// used by the UI are accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    pub temperature: f32,
    #[serde(alias = "topP")]
    pub top_p: f32,
    #[serde(alias = "topK")]
    pub top_k: u32,
    #[serde(alias = "repeatPenalty")]
    pub repeat_penalty: f32,
    #[serde(alias = "maxTokens")]
    pub max_tokens: u32,
    #[serde(alias = "contextLength")]
    pub context_length: u32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_tokens: 2048,
            context_length: 4096,
        }
    }
}

/// Unchecked provider configuration, as supplied by the UI or a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSettings {
    #[serde(default)]
    pub server_type: Option<ServerType>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub parameters: ModelParameters,
}

impl CandidateSettings {
    pub fn new(server_type: ServerType, api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            server_type: Some(server_type),
            api_url: Some(api_url.into()),
            model: Some(model.into()),
            parameters: ModelParameters::default(),
        }
    }

    /// Required fields, failing fast on the first missing one.
    pub(crate) fn required_fields(&self) -> Result<(ServerType, &str, &str), AgentError> {
        let server_type = self
            .server_type
            .ok_or_else(|| AgentError::Validation("serverType is required".to_string()))?;
        let model = non_empty(self.model.as_deref())
            .ok_or_else(|| AgentError::Validation("model is required".to_string()))?;
        let api_url = non_empty(self.api_url.as_deref())
            .ok_or_else(|| AgentError::Validation("apiUrl is required".to_string()))?;
        Ok((server_type, api_url, model))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Provider configuration that has been resolved against a server.
///
/// `verified == false` marks best-effort settings built from a cache or defaults
/// after every validation attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSettings {
    server_type: ServerType,
    api_url: String,
    model: String,
    parameters: ModelParameters,
    verified: bool,
    requested_model: Option<String>,
}

impl ValidatedSettings {
    pub(crate) fn confirmed(
        server_type: ServerType,
        api_url: String,
        model: String,
        parameters: ModelParameters,
        requested_model: Option<String>,
    ) -> Self {
        Self {
            server_type,
            api_url,
            model,
            parameters,
            verified: true,
            requested_model,
        }
    }

    /// Best-effort settings from an unchecked candidate.
    ///
    /// Missing fields fall back to the server type's defaults; the URL is normalized
    /// when possible and replaced by the canonical default otherwise.
    pub fn unverified(candidate: &CandidateSettings, canonical_ports: bool) -> Self {
        let server_type = candidate.server_type.unwrap_or(ServerType::LmStudio);
        let api_url = non_empty(candidate.api_url.as_deref())
            .and_then(|url| normalize_api_url(url, server_type, canonical_ports).ok())
            .unwrap_or_else(|| server_type.default_base_url());
        let model = non_empty(candidate.model.as_deref())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        Self {
            server_type,
            api_url,
            model,
            parameters: candidate.parameters.clone(),
            verified: false,
            requested_model: None,
        }
    }

    pub fn into_unverified(mut self) -> Self {
        self.verified = false;
        self
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Model originally asked for, when validation substituted another one.
    pub fn requested_model(&self) -> Option<&str> {
        self.requested_model.as_deref()
    }

    /// Candidate form, for re-validation against the server.
    pub fn to_candidate(&self) -> CandidateSettings {
        CandidateSettings {
            server_type: Some(self.server_type),
            api_url: Some(self.api_url.clone()),
            model: Some(self.model.clone()),
            parameters: self.parameters.clone(),
        }
    }

    /// True when `candidate` names the same server and model as these settings.
    ///
    /// The model the candidate asked for counts as a match too, so a UI that keeps
    /// sending a replaced model does not force re-validation.
    pub fn matches(&self, candidate: &CandidateSettings) -> bool {
        let model = candidate.model.as_deref().map(str::trim);
        candidate.server_type == Some(self.server_type)
            && (model == Some(self.model.as_str())
                || (model.is_some() && model == self.requested_model()))
            && candidate.parameters == self.parameters
            && candidate
                .api_url
                .as_deref()
                .and_then(|url| normalize_api_url(url, self.server_type, false).ok())
                .as_deref()
                == Some(self.api_url.as_str())
    }
}

/// Normalize a user-entered base URL.
///
/// Adds `http://` when no scheme is present, strips trailing slashes and API path
/// suffixes (`/v1`, `/api`). With `canonical_ports`, a URL whose port differs from the
/// server type's conventional port is replaced by that type's canonical default.
pub fn normalize_api_url(
    raw: &str,
    server_type: ServerType,
    canonical_ports: bool,
) -> Result<String, AgentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Validation("apiUrl is required".to_string()));
    }

    let mut url = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    loop {
        let before = url.len();
        while url.ends_with('/') {
            url.pop();
        }
        for suffix in ["/v1", "/api"] {
            if url.ends_with(suffix) {
                url.truncate(url.len() - suffix.len());
            }
        }
        if url.len() == before {
            break;
        }
    }

    let parsed = Url::parse(&url)
        .map_err(|e| AgentError::Validation(format!("Invalid apiUrl '{}': {}", raw, e)))?;
    if parsed.host_str().is_none() {
        return Err(AgentError::Validation(format!(
            "Invalid apiUrl '{}': missing host",
            raw
        )));
    }

    if canonical_ports && parsed.port_or_known_default() != Some(server_type.conventional_port()) {
        return Ok(server_type.default_base_url());
    }

    Ok(url)
}

/// Ranked keyword list used to pick a replacement model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPreferences {
    keywords: Vec<String>,
}

impl Default for ModelPreferences {
    fn default() -> Self {
        Self::new(["qwen", "deepseek", "mistral", "llama"])
    }
}

impl ModelPreferences {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Pick a model from `available`.
    ///
    /// Keywords are tried in priority order; the first model containing the keyword
    /// (case-insensitive) wins. Without any keyword match the first listed model is
    /// returned. `None` only for an empty list.
    pub fn select<'a>(&self, available: &'a [String]) -> Option<&'a String> {
        self.keywords
            .iter()
            .find_map(|keyword| {
                available
                    .iter()
                    .find(|model| model.to_lowercase().contains(keyword.as_str()))
            })
            .or_else(|| available.first())
    }
}

/// Resolve the model to use against the server's model list.
///
/// Returns the chosen model and whether it replaced the requested one.
pub fn resolve_model(
    requested: &str,
    available: &[String],
    preferences: &ModelPreferences,
    server_type: ServerType,
) -> Result<(String, bool), AgentError> {
    if available.iter().any(|m| m == requested) {
        return Ok((requested.to_string(), false));
    }
    preferences
        .select(available)
        .map(|model| (model.clone(), true))
        .ok_or(AgentError::NoModelsAvailable { server_type })
}
