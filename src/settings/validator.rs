//! Settings validation against a live provider.
//!
//! `validate` checks one candidate. `resolve` adds the fallback chain used at
//! initialization: primary type, then the other known type at its canonical URL,
//! then best-effort unverified settings from the cache or defaults.

use crate::error::AgentError;
use crate::provider::ProviderClient;
use crate::settings::{
    normalize_api_url, resolve_model, CandidateSettings, ModelPreferences, ServerType,
    ValidatedSettings, DEFAULT_MODEL,
};
use crate::store::ConversationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Validator knobs, taken from the `provider` and `runtime` config sections.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub preferences: ModelPreferences,
    pub timeout: Duration,
    pub canonical_ports: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            preferences: ModelPreferences::default(),
            timeout: Duration::from_secs(15),
            canonical_ports: true,
        }
    }
}

/// Outcome of the initialization fallback chain.
#[derive(Debug, Clone)]
pub struct SettingsResolution {
    pub settings: ValidatedSettings,
    /// The primary server type failed and the other type was used or tried.
    pub fallback_used: bool,
    /// Errors from each failed attempt, in order.
    pub failures: Vec<String>,
}

#[derive(Clone)]
pub struct SettingsValidator {
    client: Arc<dyn ProviderClient>,
    store: Arc<dyn ConversationStore>,
    options: ValidatorOptions,
}

impl SettingsValidator {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        store: Arc<dyn ConversationStore>,
        options: ValidatorOptions,
    ) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    /// Validate one candidate against its server.
    ///
    /// On success the result is written to the settings cache.
    pub async fn validate(
        &self,
        candidate: &CandidateSettings,
        cancel: &CancellationToken,
    ) -> Result<ValidatedSettings, AgentError> {
        let (server_type, raw_url, requested) = candidate.required_fields()?;
        let api_url = normalize_api_url(raw_url, server_type, self.options.canonical_ports)?;

        debug!(
            server_type = %server_type,
            api_url = %api_url,
            model = %requested,
            "Validating provider settings"
        );

        let available = self.list_models(server_type, &api_url, cancel).await?;
        let (model, replaced) =
            resolve_model(requested, &available, &self.options.preferences, server_type)?;

        if replaced {
            warn!(
                server_type = %server_type,
                requested = %requested,
                selected = %model,
                available = available.len(),
                "Requested model not available, selected replacement"
            );
        }

        let settings = ValidatedSettings::confirmed(
            server_type,
            api_url,
            model,
            candidate.parameters.clone(),
            replaced.then(|| requested.to_string()),
        );

        if let Err(e) = self.store.save_settings(&settings) {
            warn!(error = %e, "Failed to cache validated settings");
        }

        info!(
            server_type = %settings.server_type(),
            api_url = %settings.api_url(),
            model = %settings.model(),
            "Provider settings validated"
        );
        Ok(settings)
    }

    /// Resolve settings for initialization without ever failing hard.
    pub async fn resolve(
        &self,
        candidate: &CandidateSettings,
        defaults: &CandidateSettings,
        cancel: &CancellationToken,
    ) -> Result<SettingsResolution, AgentError> {
        let mut failures = Vec::new();

        match self.validate(candidate, cancel).await {
            Ok(settings) => {
                return Ok(SettingsResolution {
                    settings,
                    fallback_used: false,
                    failures,
                })
            }
            Err(AgentError::Shutdown) => return Err(AgentError::Shutdown),
            Err(e) => {
                warn!(error = %e, "Primary provider validation failed");
                failures.push(e.to_string());
            }
        }

        let primary = candidate
            .server_type
            .or(defaults.server_type)
            .unwrap_or(ServerType::LmStudio);
        let alternate_type = primary.other();
        let alternate = CandidateSettings {
            server_type: Some(alternate_type),
            api_url: Some(alternate_type.default_base_url()),
            model: candidate
                .model
                .clone()
                .or_else(|| defaults.model.clone())
                .or_else(|| Some(DEFAULT_MODEL.to_string())),
            parameters: candidate.parameters.clone(),
        };

        info!(
            primary = %primary,
            fallback = %alternate_type,
            "Retrying validation against fallback provider"
        );
        match self.validate(&alternate, cancel).await {
            Ok(settings) => {
                return Ok(SettingsResolution {
                    settings,
                    fallback_used: true,
                    failures,
                })
            }
            Err(AgentError::Shutdown) => return Err(AgentError::Shutdown),
            Err(e) => {
                warn!(error = %e, "Fallback provider validation failed");
                failures.push(e.to_string());
            }
        }

        let settings = match self.cached() {
            Some(cached) => {
                info!(model = %cached.model(), "Using cached settings in unverified mode");
                cached.into_unverified()
            }
            None => {
                info!("Using default settings in unverified mode");
                ValidatedSettings::unverified(defaults, self.options.canonical_ports)
            }
        };

        Ok(SettingsResolution {
            settings,
            fallback_used: true,
            failures,
        })
    }

    /// Last validated settings from the cache, if readable.
    pub fn cached(&self) -> Option<ValidatedSettings> {
        match self.store.load_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to read cached settings");
                None
            }
        }
    }

    async fn list_models(
        &self,
        server_type: ServerType,
        api_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        let call = self.client.list_models(server_type, api_url);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Shutdown),
            result = tokio::time::timeout(self.options.timeout, call) => match result {
                Ok(Ok(models)) => Ok(models),
                Ok(Err(AgentError::Timeout(_))) | Err(_) => Err(AgentError::Connectivity(format!(
                    "{} did not list models within {}s",
                    api_url,
                    self.options.timeout.as_secs()
                ))),
                Ok(Err(AgentError::MalformedResponse(message))) => Err(AgentError::Connectivity(
                    format!("{} returned an unreadable model list: {}", api_url, message),
                )),
                Ok(Err(AgentError::Http { status, body })) => Err(AgentError::Connectivity(
                    format!("{} answered model listing with HTTP {}: {}", api_url, status, body),
                )),
                Ok(Err(AgentError::Shutdown)) => Err(AgentError::Shutdown),
                // A 404 here means the listing endpoint is missing, not the model.
                Ok(Err(e)) => Err(AgentError::Connectivity(format!(
                    "{} could not list models: {}",
                    api_url, e
                ))),
            },
        }
    }
}
