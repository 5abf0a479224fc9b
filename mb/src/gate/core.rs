//! Startup gate actor
//!
//! Starts a resource exactly once: as soon as every declared participant has
//! registered, or when the deadline passes, whichever comes first. Requests are
//! processed one at a time, so registrations never race each other.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::broadcaster::ResourceBroadcaster;
use super::config::GateConfig;
use super::handle::GateHandle;
use super::lifecycle::{Dependent, Lifecycle, TeardownMode};
use super::messages::{
    GateError, GateMetrics, GateRequest, GateState, GateStatus, RegistrationOutcome, StartError, StartMode,
    StartTrigger,
};
use super::registry::{ListenerId, RegistrationMap};
use crate::events::EventEmitter;
use crate::resource::ManagedResource;

/// The gate task; construct with [`StartupGate::new`] and spawn [`StartupGate::run`]
pub struct StartupGate<R: ManagedResource> {
    id: String,
    config: GateConfig,
    resource: R,
    registry: RegistrationMap,
    broadcaster: ResourceBroadcaster<R::Handle>,
    lifecycle: Lifecycle,
    emitter: EventEmitter,
    rx: mpsc::Receiver<GateRequest<R>>,
    state: GateState,
    trigger: Option<StartTrigger>,
    mode: Option<StartMode>,
    metrics: GateMetrics,
    listener: Option<ListenerId>,
}

impl<R: ManagedResource> StartupGate<R> {
    /// Create a gate and its first handle
    pub fn new(
        id: &str,
        config: GateConfig,
        resource: R,
        participants: BTreeSet<String>,
        emitter: EventEmitter,
    ) -> (Self, GateHandle<R>) {
        debug!(%id, participants = participants.len(), timeout_ms = config.timeout_ms, "StartupGate::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let broadcaster = ResourceBroadcaster::new(id);
        let handle = GateHandle::new(id, tx, broadcaster.subscribe());
        let gate = Self {
            id: id.to_string(),
            config,
            resource,
            registry: RegistrationMap::seeded(participants),
            broadcaster,
            lifecycle: Lifecycle::new(id),
            emitter,
            rx,
            state: GateState::Waiting,
            trigger: None,
            mode: None,
            metrics: GateMetrics::default(),
            listener: None,
        };
        (gate, handle)
    }

    /// Spawn the gate on the current runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the gate until it is closed or every handle is dropped
    pub async fn run(mut self) {
        info!(gate_id = %self.id, kind = %self.resource.kind(), participants = self.registry.len(), "Gate running");

        let ready = Arc::new(Notify::new());
        let signal = Arc::clone(&ready);
        self.listener = Some(self.registry.add_listener(move |snapshot| {
            if snapshot.all_ready() {
                signal.notify_one();
            }
        }));

        let mut deadline = None;
        if self.registry.is_empty() {
            debug!(gate_id = %self.id, "StartupGate::run: no participants");
            self.begin_start(StartTrigger::Immediate, StartMode::Full).await;
        } else {
            deadline = Some(Instant::now() + self.config.timeout());
            self.metrics.timers_armed += 1;
        }

        loop {
            tokio::select! {
                biased;

                _ = ready.notified(), if self.state == GateState::Waiting => {
                    deadline = None;
                    self.begin_start(StartTrigger::AllReady, StartMode::Full).await;
                }
                _ = expire(deadline), if self.state == GateState::Waiting => {
                    deadline = None;
                    self.on_timeout().await;
                }
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        debug!(gate_id = %self.id, "StartupGate::run: all handles dropped");
                        break;
                    };
                    if !self.handle_request(request).await {
                        break;
                    }
                }
            }
        }

        info!(gate_id = %self.id, state = %self.state, "Gate stopped");
    }

    /// Returns false once the gate has been closed
    async fn handle_request(&mut self, request: GateRequest<R>) -> bool {
        match request {
            GateRequest::Register {
                participant_id,
                child,
                dependent,
                reply,
            } => {
                let result = self.register(participant_id, child, dependent);
                let _ = reply.send(result);
                true
            }
            GateRequest::Status { reply } => {
                let _ = reply.send(self.status());
                true
            }
            GateRequest::Close { mode, reply } => {
                let result = self.close(mode).await;
                let _ = reply.send(result);
                false
            }
        }
    }

    fn register(
        &mut self,
        participant_id: String,
        child: Option<R::Child>,
        dependent: Option<Box<dyn Dependent>>,
    ) -> Result<RegistrationOutcome, GateError> {
        debug!(gate_id = %self.id, participant = %participant_id, state = %self.state, "StartupGate::register: called");

        let Some(registered) = self.registry.get(&participant_id) else {
            warn!(gate_id = %self.id, participant = %participant_id, "Registration from undeclared participant rejected");
            self.metrics.rejected_registrations += 1;
            return Err(GateError::UnknownParticipant {
                gate_id: self.id.clone(),
                participant: participant_id,
            });
        };

        if registered {
            debug!(gate_id = %self.id, participant = %participant_id, "Duplicate registration ignored");
            self.metrics.duplicate_registrations += 1;
            self.emitter
                .participant_registered(&participant_id, RegistrationOutcome::Duplicate);
            return Ok(RegistrationOutcome::Duplicate);
        }

        if self.state != GateState::Waiting {
            self.mark_registered(&participant_id);
            self.metrics.late_registrations += 1;
            if let Some(dependent) = dependent {
                self.lifecycle.add_dependent(dependent);
            }
            if child.is_some() {
                let reason = format!("{} {} is already {}", self.resource.kind(), self.id, self.state);
                warn!(gate_id = %self.id, participant = %participant_id, %reason, "Late attachment rejected");
                self.emitter
                    .error(format!("Attachment from {} rejected: {}", participant_id, reason));
                return Err(GateError::LateAttachment {
                    participant: participant_id,
                    reason,
                });
            }
            debug!(gate_id = %self.id, participant = %participant_id, "Late registration recorded");
            self.emitter
                .participant_registered(&participant_id, RegistrationOutcome::Late);
            return Ok(RegistrationOutcome::Late);
        }

        if let Some(child) = child
            && let Err(e) = self.resource.attach(&participant_id, child)
        {
            error!(gate_id = %self.id, participant = %participant_id, error = %e, "Failed to attach child");
            self.emitter
                .error(format!("Failed to attach {}: {}", participant_id, e));
        }
        if let Some(dependent) = dependent {
            self.lifecycle.add_dependent(dependent);
        }
        self.metrics.registrations += 1;
        info!(gate_id = %self.id, participant = %participant_id, "Participant registered");
        self.emitter
            .participant_registered(&participant_id, RegistrationOutcome::Accepted);
        self.mark_registered(&participant_id);
        Ok(RegistrationOutcome::Accepted)
    }

    fn mark_registered(&mut self, participant_id: &str) {
        if let Err(e) = self.registry.set(participant_id, true) {
            warn!(gate_id = %self.id, participant = %participant_id, error = %e, "Registration map rejected update");
        }
    }

    async fn on_timeout(&mut self) {
        let snapshot = self.registry.snapshot();
        let missing = snapshot.missing();
        if missing.is_empty() {
            self.begin_start(StartTrigger::Timeout, StartMode::Full).await;
            return;
        }
        warn!(
            gate_id = %self.id,
            ?missing,
            registered = ?snapshot.registered(),
            timeout_ms = self.config.timeout_ms,
            "Participants missed the deadline, starting degraded"
        );
        for participant in &missing {
            warn!(gate_id = %self.id, %participant, "Participant unreachable");
            self.emitter
                .participant_unreachable(participant, self.config.timeout_ms);
            self.metrics.unreachable_warnings += 1;
        }
        self.begin_start(StartTrigger::Timeout, StartMode::Degraded { missing })
            .await;
    }

    async fn begin_start(&mut self, trigger: StartTrigger, mode: StartMode) {
        if self.state != GateState::Waiting {
            debug!(gate_id = %self.id, state = %self.state, "StartupGate::begin_start: already triggered");
            return;
        }
        if let Some(listener) = self.listener.take() {
            self.registry.remove_listener(listener);
        }
        self.state = GateState::Starting;
        self.trigger = Some(trigger);
        self.mode = Some(mode.clone());
        self.metrics.start_attempts += 1;
        self.emitter.gate_state(GateState::Starting);
        info!(gate_id = %self.id, ?trigger, degraded = mode.is_degraded(), "Starting resource");

        match self.resource.start().await {
            Ok(handle) => {
                self.state = GateState::Started;
                self.broadcaster.resolve(Ok(handle));
                info!(gate_id = %self.id, kind = %self.resource.kind(), "Resource started");
                self.emitter.gate_state(GateState::Started);
                self.emitter.resource_started(self.resource.kind(), mode);
            }
            Err(e) => {
                self.state = GateState::Failed;
                error!(gate_id = %self.id, error = %e, "Resource failed to start");
                self.broadcaster.resolve(Err(StartError::Failed {
                    gate_id: self.id.clone(),
                    message: e.to_string(),
                }));
                self.emitter.gate_state(GateState::Failed);
                self.emitter.error(format!("Failed to start {}: {}", self.resource.kind(), e));
            }
        }
    }

    fn status(&self) -> GateStatus {
        GateStatus {
            gate_id: self.id.clone(),
            kind: self.resource.kind(),
            state: self.state,
            registrations: self.registry.snapshot().into_map(),
            trigger: self.trigger,
            mode: self.mode.clone(),
            dependents: self.lifecycle.dependent_count(),
            metrics: self.metrics.clone(),
        }
    }

    async fn close(&mut self, mode: TeardownMode) -> Result<(), GateError> {
        info!(gate_id = %self.id, %mode, state = %self.state, "Closing gate");
        let report = self.lifecycle.teardown(&mut self.resource, mode).await;
        self.state = GateState::Closed;
        self.emitter.gate_state(GateState::Closed);
        self.emitter.torn_down(mode);
        report.into_result(&self.id)
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
