//! Request Orchestrator
//!
//! Turns one dequeued message into one provider call: builds the bounded request
//! context, runs the call under a timeout and the runtime's cancellation token,
//! and records the exchange in the conversation history on success.
//!
//! The orchestrator owns the history. The runtime hands it to exactly one job at a
//! time, which is what keeps a single LLM call in flight.

use crate::error::{AgentError, StorageError};
use crate::history::{ConversationHistory, ConversationTurn};
use crate::provider::ProviderClient;
use crate::settings::{SettingsValidator, ValidatedSettings};
use crate::store::{rotate_conversation_id, ConversationStore};
use crate::types::InboundEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Orchestrator parameters, from the `agent` and `runtime` config sections.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_prompt: String,
    /// Prior turns included in each request.
    pub context_turns: usize,
    pub request_timeout: Duration,
    pub history_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            context_turns: 5,
            request_timeout: Duration::from_secs(60),
            history_cap: 50,
        }
    }
}

/// Result of handling one queue entry.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub result: Result<String, AgentError>,
    /// Settings the runtime should adopt from now on.
    pub settings_update: Option<ValidatedSettings>,
}

pub struct RequestOrchestrator {
    client: Arc<dyn ProviderClient>,
    store: Arc<dyn ConversationStore>,
    validator: SettingsValidator,
    history: ConversationHistory,
    config: OrchestratorConfig,
}

impl RequestOrchestrator {
    /// Create an orchestrator, restoring persisted history from `store`.
    pub fn new(
        client: Arc<dyn ProviderClient>,
        store: Arc<dyn ConversationStore>,
        validator: SettingsValidator,
        config: OrchestratorConfig,
    ) -> Self {
        let history = match store.load_history() {
            Ok(turns) => ConversationHistory::from_turns(turns, config.history_cap),
            Err(e) => {
                warn!(error = %e, "Failed to load conversation history, starting empty");
                ConversationHistory::new(config.history_cap)
            }
        };
        debug!(turns = history.len(), "Restored conversation history");

        Self {
            client,
            store,
            validator,
            history,
            config,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// System prompt, the last K turns, then the new user message.
    pub fn build_context(&self, message: &str) -> Vec<ConversationTurn> {
        let recent = self.history.recent(self.config.context_turns);
        let mut context = Vec::with_capacity(recent.len() + 2);
        if !self.config.system_prompt.trim().is_empty() {
            context.push(ConversationTurn::system(self.config.system_prompt.clone()));
        }
        context.extend_from_slice(recent);
        context.push(ConversationTurn::user(message));
        context
    }

    /// Send `message` to the provider and record the exchange.
    pub async fn process(
        &mut self,
        message: &str,
        settings: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        if message.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let context = self.build_context(message);
        debug!(
            model = %settings.model(),
            server_type = %settings.server_type(),
            turns = context.len(),
            "Issuing provider request"
        );

        let reply = self.call_with_timeout(settings, &context, cancel).await?;
        self.record_exchange(message, &reply);
        Ok(reply)
    }

    /// Handle one inbound event against the current settings.
    ///
    /// A blank message is answered without touching the provider. Otherwise
    /// per-event settings are validated first and unverified settings get one
    /// validation attempt. A call that fails because the model is gone triggers
    /// a re-validation whose result is returned alongside the error.
    pub async fn handle(
        &mut self,
        event: &InboundEvent,
        current: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        if event.message.trim().is_empty() {
            debug!(message_id = %event.message_id, "Rejecting empty message");
            return ProcessOutcome {
                result: Err(AgentError::EmptyMessage),
                settings_update: None,
            };
        }

        let mut settings_update = None;

        if let Some(candidate) = event.settings.as_ref().filter(|c| !current.matches(c)) {
            match self.validator.validate(candidate, cancel).await {
                Ok(validated) => settings_update = Some(validated),
                Err(e) => {
                    warn!(message_id = %event.message_id, error = %e, "Event settings rejected");
                    return ProcessOutcome {
                        result: Err(e),
                        settings_update: None,
                    };
                }
            }
        } else if !current.is_verified() {
            match self.validator.validate(&current.to_candidate(), cancel).await {
                Ok(validated) => {
                    info!(model = %validated.model(), "Unverified settings confirmed by provider");
                    settings_update = Some(validated);
                }
                Err(AgentError::Shutdown) => {
                    return ProcessOutcome {
                        result: Err(AgentError::Shutdown),
                        settings_update: None,
                    }
                }
                Err(e) => debug!(error = %e, "Settings still unverified, calling provider anyway"),
            }
        }

        let active = settings_update.clone().unwrap_or_else(|| current.clone());
        let result = self.process(&event.message, &active, cancel).await;

        if let Err(e) = &result {
            if e.needs_revalidation() {
                warn!(error = %e, model = %active.model(), "Provider rejected settings, re-validating");
                match self.validator.validate(&active.to_candidate(), cancel).await {
                    Ok(revalidated) => settings_update = Some(revalidated),
                    Err(err) => warn!(error = %err, "Re-validation failed"),
                }
            }
        }

        ProcessOutcome {
            result,
            settings_update,
        }
    }

    /// Drop all turns, persist the empty history and start a new conversation id.
    pub fn clear_history(&mut self) -> Result<(), StorageError> {
        self.history.clear();
        self.store.save_history(self.history.turns())?;
        let id = rotate_conversation_id(self.store.as_ref())?;
        info!(conversation_id = %id, "Conversation history cleared");
        Ok(())
    }

    async fn call_with_timeout(
        &self,
        settings: &ValidatedSettings,
        context: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let token = cancel.child_token();
        let timeout = self.config.request_timeout;
        let call = self.client.complete(settings, context);

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Shutdown),
            result = call => result,
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                warn!(timeout_secs = timeout.as_secs(), model = %settings.model(), "Provider request timed out");
                Err(AgentError::Timeout(timeout))
            }
        }
    }

    // Trim happens only here, right before persisting.
    fn record_exchange(&mut self, message: &str, reply: &str) {
        self.history.push_exchange(message, reply);
        let trimmed = self.history.trim_to_cap();
        if trimmed > 0 {
            debug!(trimmed, cap = self.history.cap(), "Trimmed conversation history");
        }
        if let Err(e) = self.store.save_history(self.history.turns()) {
            warn!(error = %e, "Failed to persist conversation history");
        }
    }
}
