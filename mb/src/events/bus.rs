//! Event bus - pub/sub for bridge events
//!
//! Gates and nodes emit, observers (status nodes, the JSONL logger) subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{BridgeEvent, DeviceState, StatusIndicator};
use crate::flow::DeviceType;
use crate::gate::{GateState, RegistrationOutcome, StartMode, TeardownMode};
use crate::resource::ResourceKind;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: BridgeEvent) {
        debug!(event_type = event.event_type(), node_id = event.node_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Events emitted before subscription are not received
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one node
    pub fn emitter_for(&self, node_id: impl Into<String>) -> EventEmitter {
        let node_id = node_id.into();
        debug!(%node_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            node_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap handle for emitting events on behalf of one node
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<BridgeEvent>,
    node_id: String,
}

impl EventEmitter {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn emit(&self, event: BridgeEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn gate_state(&self, state: GateState) {
        self.emit(BridgeEvent::GateStateChanged {
            node_id: self.node_id.clone(),
            state,
        });
    }

    pub fn participant_registered(&self, participant: &str, outcome: RegistrationOutcome) {
        self.emit(BridgeEvent::ParticipantRegistered {
            node_id: self.node_id.clone(),
            participant: participant.to_string(),
            outcome,
        });
    }

    /// Tell a participant it missed this node's deadline
    pub fn participant_unreachable(&self, participant: &str, timeout_ms: u64) {
        self.emit(BridgeEvent::ParticipantUnreachable {
            node_id: participant.to_string(),
            gate_id: self.node_id.clone(),
            timeout_ms,
        });
    }

    pub fn resource_started(&self, kind: ResourceKind, mode: StartMode) {
        self.emit(BridgeEvent::ResourceStarted {
            node_id: self.node_id.clone(),
            kind,
            mode,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(BridgeEvent::NodeError {
            node_id: self.node_id.clone(),
            message: message.into(),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(BridgeEvent::NodeWarning {
            node_id: self.node_id.clone(),
            message: message.into(),
        });
    }

    pub fn status_changed(&self, name: &str, device_type: DeviceType, state: DeviceState) {
        self.emit(BridgeEvent::StatusChanged {
            node_id: self.node_id.clone(),
            name: name.to_string(),
            device_type,
            state,
        });
    }

    pub fn node_status(&self, status: StatusIndicator) {
        self.emit(BridgeEvent::NodeStatus {
            node_id: self.node_id.clone(),
            status,
        });
    }

    pub fn pairing_updated(&self, commissioned: bool) {
        self.emit(BridgeEvent::PairingUpdated {
            node_id: self.node_id.clone(),
            commissioned,
        });
    }

    pub fn torn_down(&self, mode: TeardownMode) {
        self.emit(BridgeEvent::TornDown {
            node_id: self.node_id.clone(),
            mode,
        });
    }
}
