//! Teardown of a gate's resource and everything that depends on it

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::messages::GateError;
use crate::resource::ManagedResource;

/// How far a teardown goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownMode {
    /// Stop the resource, keep its persisted state
    Stop,
    /// Stop the resource and erase its storage namespace
    Destroy,
}

impl TeardownMode {
    /// Map the host's "removed permanently" flag
    pub fn from_removed(removed: bool) -> Self {
        if removed { Self::Destroy } else { Self::Stop }
    }
}

impl fmt::Display for TeardownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Something that must be torn down before the resource it registered with
#[async_trait]
pub trait Dependent: Send + Sync {
    fn id(&self) -> &str;

    async fn teardown(&self, mode: TeardownMode) -> Result<(), GateError>;
}

/// What happened during a teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub dependents_closed: usize,
    pub dependent_failures: Vec<String>,
    pub stop_error: Option<String>,
    pub erased: bool,
    pub erase_error: Option<String>,
}

impl TeardownReport {
    /// Only a failed erase makes the teardown itself fail
    pub fn into_result(self, gate_id: &str) -> Result<(), GateError> {
        match self.erase_error {
            Some(message) => Err(GateError::Teardown {
                gate_id: gate_id.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }
}

/// Tracks dependents and runs the teardown sequence
pub struct Lifecycle {
    gate_id: String,
    dependents: Vec<Box<dyn Dependent>>,
}

impl Lifecycle {
    pub fn new(gate_id: &str) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            dependents: Vec::new(),
        }
    }

    pub fn add_dependent(&mut self, dependent: Box<dyn Dependent>) {
        debug!(gate_id = %self.gate_id, dependent = %dependent.id(), "Lifecycle::add_dependent: called");
        self.dependents.push(dependent);
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents.len()
    }

    /// Dependents first, then stop, then (for destroy) erase the own namespace
    pub async fn teardown<R: ManagedResource>(&mut self, resource: &mut R, mode: TeardownMode) -> TeardownReport {
        info!(gate_id = %self.gate_id, %mode, dependents = self.dependents.len(), "Tearing down");
        let mut report = TeardownReport::default();

        for dependent in self.dependents.drain(..) {
            match dependent.teardown(mode).await {
                Ok(()) => report.dependents_closed += 1,
                Err(e) => {
                    warn!(gate_id = %self.gate_id, dependent = %dependent.id(), error = %e, "Dependent teardown failed");
                    report.dependent_failures.push(dependent.id().to_string());
                }
            }
        }

        if let Err(e) = resource.stop().await {
            warn!(gate_id = %self.gate_id, error = %e, "Resource stop failed, continuing teardown");
            report.stop_error = Some(e.to_string());
        }

        if mode == TeardownMode::Destroy {
            let namespace = resource.namespace();
            match namespace.destroy() {
                Ok(existed) => {
                    info!(gate_id = %self.gate_id, path = %namespace.path().display(), existed, "Erased storage");
                    report.erased = true;
                }
                Err(e) => {
                    error!(gate_id = %self.gate_id, error = %e, "Failed to erase storage");
                    report.erase_error = Some(e.to_string());
                }
            }
        }

        report
    }
}
