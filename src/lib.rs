//! Nexa Agent: Project Manager Agent Runtime
//!
//! Turns chat messages from a UI into answers from a local LLM server
//! (LM Studio or Ollama). Inbound events pass a flood gate, wait in a
//! single-consumer work queue and are answered one at a time with recent
//! conversation history as context. Replies are emitted exactly once per
//! inbound message.
//!
//! The entry point is [`AgentRuntime::spawn`], which returns an [`AgentHandle`].

pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod gate;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod types;

pub use config::{ConfigLoader, NexaConfig};
pub use error::{AgentError, RuntimeError, StorageError};
pub use gate::{Admission, DropReason};
pub use runtime::{AgentHandle, AgentRuntime, InitReport, RuntimeDeps, RuntimeOptions, RuntimeStats};
pub use settings::{CandidateSettings, ServerType, ValidatedSettings};
pub use types::{InboundEvent, Message, OutboundEvent, RuntimeState};
