//! Event types for the bridge event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::DeviceType;
use crate::gate::{GateState, RegistrationOutcome, StartMode, TeardownMode};
use crate::resource::ResourceKind;

/// Attribute state of an on/off or dimmable device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

/// Colour of a node's status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Green,
    Red,
    Grey,
}

/// A node's visible status: fill, shape and text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusIndicator {
    pub fill: StatusFill,
    pub shape: String,
    pub text: String,
}

impl StatusIndicator {
    pub fn dot(fill: StatusFill, text: impl Into<String>) -> Self {
        Self {
            fill,
            shape: "dot".to_string(),
            text: text.into(),
        }
    }

    /// Indicator for an on/off reading: green on, red off, grey unknown
    pub fn for_state(state: &DeviceState) -> Self {
        match state.on {
            Some(true) => match state.level {
                Some(level) => Self::dot(StatusFill::Green, format!("on ({}%)", level)),
                None => Self::dot(StatusFill::Green, "on"),
            },
            Some(false) => Self::dot(StatusFill::Red, "off"),
            None => Self::dot(StatusFill::Grey, "unknown"),
        }
    }
}

/// Everything that happens on the bridge
///
/// Every event names the node it belongs to; per-node log files and observer
/// nodes filter on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    GateStateChanged {
        node_id: String,
        state: GateState,
    },

    ParticipantRegistered {
        node_id: String,
        participant: String,
        outcome: RegistrationOutcome,
    },

    /// Addressed to the participant that missed its gate's deadline
    ParticipantUnreachable {
        node_id: String,
        gate_id: String,
        timeout_ms: u64,
    },

    ResourceStarted {
        node_id: String,
        kind: ResourceKind,
        mode: StartMode,
    },

    NodeError {
        node_id: String,
        message: String,
    },

    NodeWarning {
        node_id: String,
        message: String,
    },

    StatusChanged {
        node_id: String,
        name: String,
        device_type: DeviceType,
        state: DeviceState,
    },

    NodeStatus {
        node_id: String,
        status: StatusIndicator,
    },

    PairingUpdated {
        node_id: String,
        commissioned: bool,
    },

    TornDown {
        node_id: String,
        mode: TeardownMode,
    },
}

impl BridgeEvent {
    pub fn node_id(&self) -> &str {
        match self {
            Self::GateStateChanged { node_id, .. }
            | Self::ParticipantRegistered { node_id, .. }
            | Self::ParticipantUnreachable { node_id, .. }
            | Self::ResourceStarted { node_id, .. }
            | Self::NodeError { node_id, .. }
            | Self::NodeWarning { node_id, .. }
            | Self::StatusChanged { node_id, .. }
            | Self::NodeStatus { node_id, .. }
            | Self::PairingUpdated { node_id, .. }
            | Self::TornDown { node_id, .. } => node_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GateStateChanged { .. } => "GateStateChanged",
            Self::ParticipantRegistered { .. } => "ParticipantRegistered",
            Self::ParticipantUnreachable { .. } => "ParticipantUnreachable",
            Self::ResourceStarted { .. } => "ResourceStarted",
            Self::NodeError { .. } => "NodeError",
            Self::NodeWarning { .. } => "NodeWarning",
            Self::StatusChanged { .. } => "StatusChanged",
            Self::NodeStatus { .. } => "NodeStatus",
            Self::PairingUpdated { .. } => "PairingUpdated",
            Self::TornDown { .. } => "TornDown",
        }
    }
}

/// One line of a node's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: BridgeEvent,
}

impl EventLogEntry {
    pub fn new(event: BridgeEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_for_state() {
        let on = StatusIndicator::for_state(&DeviceState {
            on: Some(true),
            level: None,
        });
        assert_eq!(on.fill, StatusFill::Green);
        assert_eq!(on.text, "on");
        assert_eq!(on.shape, "dot");

        let off = StatusIndicator::for_state(&DeviceState {
            on: Some(false),
            level: Some(40),
        });
        assert_eq!(off.fill, StatusFill::Red);
        assert_eq!(off.text, "off");

        let unknown = StatusIndicator::for_state(&DeviceState::default());
        assert_eq!(unknown.fill, StatusFill::Grey);
        assert_eq!(unknown.text, "unknown");
    }

    #[test]
    fn test_event_serialization() {
        let event = BridgeEvent::ParticipantUnreachable {
            node_id: "lamp".to_string(),
            gate_id: "srv".to_string(),
            timeout_ms: 10_000,
        };
        let entry = EventLogEntry::new(event);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("\"type\":\"ParticipantUnreachable\""));

        let back: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event.node_id(), "lamp");
        assert_eq!(back.event.event_type(), "ParticipantUnreachable");
    }
}
