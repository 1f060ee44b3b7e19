//! Agent Runtime
//!
//! One tokio task owns the whole pipeline: flood gate, work queue, emitter,
//! lifecycle state and the current validated settings. Callers talk to it through
//! an [`AgentHandle`]; nothing here is shared behind a lock.
//!
//! Long-running work (initialization validation, provider calls) runs in spawned
//! jobs that report back over a channel. The request orchestrator is moved into
//! the job that processes a message and returned with its result, so at most one
//! provider call is ever in flight.

use crate::clock::{Clock, SystemClock};
use crate::config::NexaConfig;
use crate::emitter::{EmitOptions, EmitterConfig, ResponseEmitter};
use crate::error::AgentError;
use crate::gate::{Admission, DropReason, FloodGate, GateConfig};
use crate::orchestrator::{OrchestratorConfig, ProcessOutcome, RequestOrchestrator};
use crate::provider::ProviderClient;
use crate::queue::{EntryStatus, QueueEntry, QueueStats, WorkQueue};
use crate::settings::{
    CandidateSettings, SettingsResolution, SettingsValidator, ValidatedSettings, ValidatorOptions,
};
use crate::store::{ensure_conversation_id, ConversationStore};
use crate::types::{response_id_for, InboundEvent, OutboundEvent, RuntimeState};
use futures::future::join_all;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod handle;
pub mod lifecycle;

pub use handle::AgentHandle;
pub use lifecycle::Lifecycle;

use lifecycle::InitReply;

/// Sent once per throttling episode.
pub const THROTTLE_WARNING: &str =
    "I'm receiving too many messages at once. Please wait a few seconds before sending more.";

/// Sent exactly once when the runtime shuts down.
pub const SHUTDOWN_NOTICE: &str =
    "The agent is shutting down. Messages sent from now on will not be processed.";

const COMMAND_BUFFER: usize = 64;

/// Runtime parameters, usually derived from [`NexaConfig`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub gate: GateConfig,
    pub tick: Duration,
    pub min_interval: Duration,
    pub entry_ttl: Duration,
    pub emitter: EmitterConfig,
    pub orchestrator: OrchestratorConfig,
    pub validator: ValidatorOptions,
    /// Candidate used when `initialize` gets none, and for best-effort mode.
    pub defaults: CandidateSettings,
    pub agent_name: String,
    pub event_buffer: usize,
}

impl RuntimeOptions {
    pub fn from_config(config: &NexaConfig) -> Self {
        let runtime = &config.runtime;
        Self {
            gate: GateConfig {
                limit: runtime.throttle_limit,
                window: runtime.throttle_window(),
                cooldown: runtime.throttle_cooldown(),
            },
            tick: runtime.queue_tick(),
            min_interval: runtime.min_message_interval(),
            entry_ttl: runtime.entry_ttl(),
            emitter: EmitterConfig {
                min_spacing: runtime.emit_min_spacing(),
                recent_capacity: runtime.recent_id_capacity,
                recent_retain: runtime.recent_id_retain,
            },
            orchestrator: OrchestratorConfig {
                system_prompt: config.agent.system_prompt.clone(),
                context_turns: runtime.context_turns,
                request_timeout: runtime.request_timeout(),
                history_cap: runtime.history_cap,
            },
            validator: config
                .provider
                .validator_options(runtime.validation_timeout()),
            defaults: config.provider.default_candidate(),
            agent_name: config.agent.name.clone(),
            event_buffer: runtime.event_buffer.max(1),
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_config(&NexaConfig::default())
    }
}

/// Injected collaborators.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub provider: Arc<dyn ProviderClient>,
    pub store: Arc<dyn ConversationStore>,
    pub clock: Arc<dyn Clock>,
}

impl RuntimeDeps {
    pub fn new(provider: Arc<dyn ProviderClient>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            provider,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// What `initialize` settled on.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub settings: ValidatedSettings,
    pub verified: bool,
    /// The primary provider failed validation.
    pub fallback_used: bool,
    pub failures: Vec<String>,
}

/// Point-in-time runtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub state: RuntimeState,
    pub queue: QueueStats,
    pub dropped_duplicate: u64,
    pub dropped_throttled: u64,
    pub dropped_shutdown: u64,
    pub throttle_episodes: u64,
    pub throttled: bool,
    pub emitted: u64,
    pub emissions_dropped: u64,
    pub settings_verified: Option<bool>,
    pub model: Option<String>,
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
struct DropCounters {
    duplicate: u64,
    throttled: u64,
    shutdown: u64,
}

impl DropCounters {
    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::Duplicate => self.duplicate += 1,
            DropReason::Throttled => self.throttled += 1,
            DropReason::Shutdown => self.shutdown += 1,
        }
    }
}

pub(crate) enum Command {
    Initialize {
        candidate: Option<CandidateSettings>,
        reply: InitReply,
    },
    Submit {
        event: InboundEvent,
        reply: oneshot::Sender<Admission>,
    },
    Subscribe {
        source: mpsc::Receiver<InboundEvent>,
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
    Stats {
        reply: oneshot::Sender<RuntimeStats>,
    },
    ClearHistory {
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Job {
    Initialized(Result<SettingsResolution, AgentError>),
    Processed {
        message_id: String,
        orchestrator: RequestOrchestrator,
        outcome: ProcessOutcome,
    },
}

enum Step {
    Command(Option<Command>),
    Inbound(InboundEvent),
    Job(Job),
    Tick,
}

pub struct AgentRuntime {
    options: RuntimeOptions,
    clock: Arc<dyn Clock>,
    lifecycle: Lifecycle,
    gate: FloodGate,
    queue: WorkQueue,
    emitter: ResponseEmitter,
    validator: SettingsValidator,
    orchestrator: Option<RequestOrchestrator>,
    settings: Option<ValidatedSettings>,
    init_report: Option<InitReport>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    job_tx: mpsc::UnboundedSender<Job>,
    job_rx: mpsc::UnboundedReceiver<Job>,
    subscriptions: Vec<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    pending_clears: Vec<oneshot::Sender<Result<(), AgentError>>>,
    drops: DropCounters,
}

impl AgentRuntime {
    /// Start a runtime for `config` on the current tokio runtime.
    pub fn spawn(config: &NexaConfig, deps: RuntimeDeps) -> AgentHandle {
        Self::spawn_with(RuntimeOptions::from_config(config), deps)
    }

    pub fn spawn_with(options: RuntimeOptions, deps: RuntimeDeps) -> AgentHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel::<OutboundEvent>(options.event_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(options.event_buffer);
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (lifecycle, state_rx) = Lifecycle::new();

        match ensure_conversation_id(deps.store.as_ref()) {
            Ok(id) => debug!(conversation_id = %id, "Conversation id ready"),
            Err(e) => warn!(error = %e, "Failed to read or create conversation id"),
        }

        let validator = SettingsValidator::new(
            Arc::clone(&deps.provider),
            Arc::clone(&deps.store),
            options.validator.clone(),
        );
        let orchestrator = RequestOrchestrator::new(
            Arc::clone(&deps.provider),
            Arc::clone(&deps.store),
            validator.clone(),
            options.orchestrator.clone(),
        );
        let now = deps.clock.now();

        let runtime = Self {
            gate: FloodGate::new(options.gate, now),
            queue: WorkQueue::new(options.min_interval, options.entry_ttl),
            emitter: ResponseEmitter::new(options.agent_name.clone(), events.clone(), options.emitter),
            clock: deps.clock,
            lifecycle,
            validator,
            orchestrator: Some(orchestrator),
            settings: None,
            init_report: None,
            cancel: CancellationToken::new(),
            commands,
            inbound_tx,
            inbound_rx,
            job_tx,
            job_rx,
            subscriptions: Vec::new(),
            tasks: Vec::new(),
            pending_clears: Vec::new(),
            drops: DropCounters::default(),
            options,
        };
        let tick = runtime.options.tick;
        tokio::spawn(runtime.run());

        AgentHandle::new(command_tx, state_rx, events, tick)
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(tick_ms = self.options.tick.as_millis() as u64, "Agent runtime loop started");

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                Some(event) = self.inbound_rx.recv() => Step::Inbound(event),
                Some(job) = self.job_rx.recv() => Step::Job(job),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Command(Some(command)) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Step::Command(None) => {
                    debug!("All handles dropped");
                    self.shutdown().await;
                    break;
                }
                Step::Inbound(event) => {
                    self.admit(event);
                }
                Step::Job(Job::Initialized(result)) => self.finish_init(result),
                Step::Job(Job::Processed {
                    message_id,
                    orchestrator,
                    outcome,
                }) => self.finish_job(message_id, orchestrator, outcome),
                Step::Tick => self.tick(),
            }
        }

        self.drain_commands();
        debug!("Agent runtime loop stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Initialize { candidate, reply } => self.initialize(candidate, reply),
            Command::Submit { event, reply } => {
                let admission = self.admit(event);
                let _ = reply.send(admission);
            }
            Command::Subscribe { source, reply } => {
                self.attach(source);
                let _ = reply.send(Ok(()));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::ClearHistory { reply } => self.clear_history(reply),
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn initialize(&mut self, candidate: Option<CandidateSettings>, reply: InitReply) {
        match self.lifecycle.state() {
            RuntimeState::Ready => {
                let _ = reply.send(self.init_report.clone().ok_or(AgentError::Shutdown));
            }
            RuntimeState::Initializing => {
                debug!("Initialization already in progress, joining");
                self.lifecycle.add_init_waiter(reply);
            }
            RuntimeState::Uninitialized => {
                self.lifecycle.advance(RuntimeState::Initializing);
                self.lifecycle.add_init_waiter(reply);

                let candidate = candidate.unwrap_or_else(|| self.options.defaults.clone());
                let defaults = self.options.defaults.clone();
                let validator = self.validator.clone();
                let cancel = self.cancel.child_token();
                let jobs = self.job_tx.clone();
                self.track(tokio::spawn(async move {
                    let result = validator.resolve(&candidate, &defaults, &cancel).await;
                    let _ = jobs.send(Job::Initialized(result));
                }));
            }
            RuntimeState::ShuttingDown | RuntimeState::Shutdown => {
                let _ = reply.send(Err(AgentError::Shutdown));
            }
        }
    }

    fn finish_init(&mut self, result: Result<SettingsResolution, AgentError>) {
        if self.lifecycle.state() != RuntimeState::Initializing {
            return;
        }

        let resolution = result.unwrap_or_else(|e| {
            warn!(error = %e, "Settings resolution failed, using defaults");
            SettingsResolution {
                settings: ValidatedSettings::unverified(
                    &self.options.defaults,
                    self.options.validator.canonical_ports,
                ),
                fallback_used: true,
                failures: vec![e.to_string()],
            }
        });

        let report = InitReport {
            verified: resolution.settings.is_verified(),
            settings: resolution.settings.clone(),
            fallback_used: resolution.fallback_used,
            failures: resolution.failures,
        };
        if report.verified {
            info!(
                server_type = %report.settings.server_type(),
                model = %report.settings.model(),
                fallback_used = report.fallback_used,
                "Agent runtime ready"
            );
        } else {
            warn!(
                model = %report.settings.model(),
                failures = report.failures.len(),
                "Agent runtime ready in best-effort mode with unverified settings"
            );
        }

        self.settings = Some(resolution.settings);
        self.lifecycle.advance(RuntimeState::Ready);
        self.lifecycle.complete_init(&report);
        self.init_report = Some(report);
    }

    fn admit(&mut self, event: InboundEvent) -> Admission {
        let now = self.clock.now();
        let decision = self
            .gate
            .admit(event, self.lifecycle.state(), &mut self.queue, now);

        if let Admission::Dropped(reason) = decision.admission {
            self.drops.record(reason);
        }
        if decision.throttle_started {
            self.emitter.emit(
                THROTTLE_WARNING,
                EmitOptions::notice(),
                now,
                self.clock.utc_now(),
            );
        }
        decision.admission
    }

    fn attach(&mut self, mut source: mpsc::Receiver<InboundEvent>) {
        let inbound = self.inbound_tx.clone();
        self.subscriptions.retain(|handle| !handle.is_finished());
        self.subscriptions.push(tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                if inbound.send(event).await.is_err() {
                    break;
                }
            }
        }));
        debug!(subscriptions = self.subscriptions.len(), "Attached inbound event source");
    }

    fn tick(&mut self) {
        let now = self.clock.now();
        self.queue.evict_expired(now);
        self.gate.refresh(now);

        if self.lifecycle.state() != RuntimeState::Ready || self.orchestrator.is_none() {
            return;
        }
        let Some(settings) = self.settings.clone() else {
            return;
        };
        if let Some(entry) = self.queue.next_ready(now) {
            self.start_job(entry, settings);
        }
    }

    fn start_job(&mut self, entry: QueueEntry, settings: ValidatedSettings) {
        let Some(mut orchestrator) = self.orchestrator.take() else {
            return;
        };
        let jobs = self.job_tx.clone();
        let cancel = self.cancel.child_token();
        self.track(tokio::spawn(async move {
            let outcome = orchestrator.handle(&entry.payload, &settings, &cancel).await;
            let _ = jobs.send(Job::Processed {
                message_id: entry.message_id,
                orchestrator,
                outcome,
            });
        }));
    }

    fn finish_job(
        &mut self,
        message_id: String,
        orchestrator: RequestOrchestrator,
        outcome: ProcessOutcome,
    ) {
        self.orchestrator = Some(orchestrator);
        if let Some(update) = outcome.settings_update {
            info!(
                server_type = %update.server_type(),
                model = %update.model(),
                verified = update.is_verified(),
                "Adopting updated provider settings"
            );
            self.settings = Some(update);
        }

        let now = self.clock.now();
        let response_id = response_id_for(&message_id);
        match outcome.result {
            Ok(reply) => {
                self.queue.complete(&message_id, EntryStatus::Done, now);
                debug!(message_id = %message_id, chars = reply.len(), "Message processed");
                self.emitter.emit(
                    reply,
                    EmitOptions::reply(response_id),
                    now,
                    self.clock.utc_now(),
                );
            }
            Err(e) => {
                self.queue.complete(&message_id, EntryStatus::Error, now);
                warn!(message_id = %message_id, kind = e.kind(), error = %e, "Message processing failed");
                self.emitter.emit(
                    user_facing_error(&e),
                    EmitOptions::error(response_id),
                    now,
                    self.clock.utc_now(),
                );
            }
        }

        self.apply_pending_clears();
    }

    fn clear_history(&mut self, reply: oneshot::Sender<Result<(), AgentError>>) {
        match self.orchestrator.as_mut() {
            Some(orchestrator) => {
                let _ = reply.send(orchestrator.clear_history().map_err(AgentError::from));
            }
            // A message is in flight; clear once the orchestrator is back.
            None => self.pending_clears.push(reply),
        }
    }

    fn apply_pending_clears(&mut self) {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return;
        };
        for reply in self.pending_clears.drain(..) {
            let _ = reply.send(orchestrator.clear_history().map_err(AgentError::from));
        }
    }

    async fn shutdown(&mut self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        info!(pending = self.queue.len(), "Shutting down agent runtime");
        self.lifecycle.advance(RuntimeState::ShuttingDown);
        self.gate.close();
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .subscriptions
            .drain(..)
            .chain(self.tasks.drain(..))
            .collect();
        for handle in &handles {
            handle.abort();
        }
        let detached = handles.len();
        join_all(handles).await;

        let dropped = self.queue.clear();
        self.inbound_rx.close();
        self.lifecycle.reject_init();
        for reply in self.pending_clears.drain(..) {
            let _ = reply.send(Err(AgentError::Shutdown));
        }

        let now = self.clock.now();
        self.emitter.emit(
            SHUTDOWN_NOTICE,
            EmitOptions::notice(),
            now,
            self.clock.utc_now(),
        );
        self.lifecycle.advance(RuntimeState::Shutdown);
        info!(dropped, detached, "Agent runtime shut down");
    }

    /// Answer commands that raced with shutdown.
    fn drain_commands(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Initialize { reply, .. } => {
                    let _ = reply.send(Err(AgentError::Shutdown));
                }
                Command::Submit { reply, .. } => {
                    self.drops.record(DropReason::Shutdown);
                    let _ = reply.send(Admission::Dropped(DropReason::Shutdown));
                }
                Command::Subscribe { reply, .. } | Command::ClearHistory { reply } => {
                    let _ = reply.send(Err(AgentError::Shutdown));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(());
                }
            }
        }
    }

    fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            state: self.lifecycle.state(),
            queue: self.queue.stats(),
            dropped_duplicate: self.drops.duplicate,
            dropped_throttled: self.drops.throttled,
            dropped_shutdown: self.drops.shutdown,
            throttle_episodes: self.gate.throttle_episodes(),
            throttled: self.gate.is_throttled(),
            emitted: self.emitter.emitted(),
            emissions_dropped: self.emitter.dropped(),
            settings_verified: self.settings.as_ref().map(ValidatedSettings::is_verified),
            model: self.settings.as_ref().map(|s| s.model().to_string()),
            subscriptions: self
                .subscriptions
                .iter()
                .filter(|handle| !handle.is_finished())
                .count(),
        }
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(handle);
    }
}

fn user_facing_error(error: &AgentError) -> String {
    match error {
        AgentError::Timeout(_) => format!(
            "The model took too long to answer ({}). Please try again.",
            error
        ),
        e if e.is_validation_class() => {
            format!("There is a problem with the model settings: {}", e)
        }
        _ => format!("Sorry, I couldn't process that message. {}", error),
    }
}
