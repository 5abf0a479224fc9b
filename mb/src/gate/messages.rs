//! Message and status types for the startup gate

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use super::lifecycle::{Dependent, TeardownMode};
use crate::resource::{ManagedResource, ResourceKind};

/// Errors returned to callers of a gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("{participant} is not a declared participant of {gate_id}")]
    UnknownParticipant { gate_id: String, participant: String },

    #[error("Attachment from {participant} rejected: {reason}")]
    LateAttachment { participant: String, reason: String },

    #[error("Gate {0} is closed")]
    Closed(String),

    #[error("Teardown of {gate_id} failed: {message}")]
    Teardown { gate_id: String, message: String },
}

/// Outcome published to subscribers when a start does not produce a handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("{gate_id} failed to start: {message}")]
    Failed { gate_id: String, message: String },

    #[error("{gate_id} was closed before it started")]
    Abandoned { gate_id: String },
}

/// Gate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    Waiting,
    Starting,
    Started,
    Failed,
    Closed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// What caused the start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartTrigger {
    /// No participants were declared
    Immediate,
    /// Every participant registered
    AllReady,
    /// The deadline passed first
    Timeout,
}

/// Whether every participant made it in before the start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum StartMode {
    Full,
    Degraded { missing: Vec<String> },
}

impl StartMode {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Result of a registration the gate accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationOutcome {
    /// Counted toward readiness
    Accepted,
    /// Participant had already registered
    Duplicate,
    /// Arrived after the start was triggered; audit only
    Late,
}

/// Counters exposed for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateMetrics {
    pub registrations: u32,
    pub duplicate_registrations: u32,
    pub late_registrations: u32,
    pub rejected_registrations: u32,
    pub unreachable_warnings: u32,
    pub timers_armed: u32,
    pub start_attempts: u32,
}

/// Snapshot of a gate returned by `GateHandle::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateStatus {
    pub gate_id: String,
    pub kind: ResourceKind,
    pub state: GateState,
    pub registrations: BTreeMap<String, bool>,
    pub trigger: Option<StartTrigger>,
    pub mode: Option<StartMode>,
    pub dependents: usize,
    pub metrics: GateMetrics,
}

/// Requests processed by the gate task
pub enum GateRequest<R: ManagedResource> {
    Register {
        participant_id: String,
        child: Option<R::Child>,
        dependent: Option<Box<dyn Dependent>>,
        reply: oneshot::Sender<Result<RegistrationOutcome, GateError>>,
    },
    Status {
        reply: oneshot::Sender<GateStatus>,
    },
    Close {
        mode: TeardownMode,
        reply: oneshot::Sender<Result<(), GateError>>,
    },
}

impl<R: ManagedResource> fmt::Debug for GateRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register {
                participant_id,
                child,
                dependent,
                ..
            } => f
                .debug_struct("Register")
                .field("participant_id", participant_id)
                .field("child", &child.is_some())
                .field("dependent", &dependent.as_ref().map(|d| d.id().to_string()))
                .finish(),
            Self::Status { .. } => f.write_str("Status"),
            Self::Close { mode, .. } => f.debug_struct("Close").field("mode", mode).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_mode_serialization() {
        let mode = StartMode::Degraded {
            missing: vec!["b".to_string()],
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], "degraded");
        assert_eq!(json["missing"][0], "b");
        assert!(mode.is_degraded());
        assert!(!StartMode::Full.is_degraded());
    }

    #[test]
    fn test_error_messages() {
        let err = GateError::UnknownParticipant {
            gate_id: "srv".to_string(),
            participant: "x".to_string(),
        };
        assert_eq!(err.to_string(), "x is not a declared participant of srv");
        assert_eq!(GateError::Closed("srv".to_string()).to_string(), "Gate srv is closed");
    }
}
