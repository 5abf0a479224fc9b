//! Cloneable handle to a running gate

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::broadcaster::ResourceWaiter;
use super::lifecycle::{Dependent, TeardownMode};
use super::messages::{GateError, GateRequest, GateStatus, RegistrationOutcome, StartError};
use crate::resource::ManagedResource;

/// Handle for participants and owners of a gate
pub struct GateHandle<R: ManagedResource> {
    gate_id: Arc<str>,
    tx: mpsc::Sender<GateRequest<R>>,
    waiter: ResourceWaiter<R::Handle>,
}

impl<R: ManagedResource> Clone for GateHandle<R> {
    fn clone(&self) -> Self {
        Self {
            gate_id: Arc::clone(&self.gate_id),
            tx: self.tx.clone(),
            waiter: self.waiter.clone(),
        }
    }
}

impl<R: ManagedResource> GateHandle<R> {
    pub(super) fn new(gate_id: &str, tx: mpsc::Sender<GateRequest<R>>, waiter: ResourceWaiter<R::Handle>) -> Self {
        Self {
            gate_id: Arc::from(gate_id),
            tx,
            waiter,
        }
    }

    pub fn gate_id(&self) -> &str {
        &self.gate_id
    }

    /// Register for readiness only
    pub async fn register(&self, participant_id: &str) -> Result<RegistrationOutcome, GateError> {
        self.register_with(participant_id, None, None).await
    }

    /// Register, optionally attaching a child and a dependent for cascading teardown
    pub async fn register_with(
        &self,
        participant_id: &str,
        child: Option<R::Child>,
        dependent: Option<Box<dyn Dependent>>,
    ) -> Result<RegistrationOutcome, GateError> {
        debug!(gate_id = %self.gate_id, %participant_id, "GateHandle::register_with: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GateRequest::Register {
                participant_id: participant_id.to_string(),
                child,
                dependent,
                reply,
            })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    pub async fn status(&self) -> Result<GateStatus, GateError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GateRequest::Status { reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Tear the gate down; closing an already closed gate succeeds
    pub async fn close(&self, mode: TeardownMode) -> Result<(), GateError> {
        debug!(gate_id = %self.gate_id, %mode, "GateHandle::close: called");
        let (reply, rx) = oneshot::channel();
        if self.tx.send(GateRequest::Close { mode, reply }).await.is_err() {
            debug!(gate_id = %self.gate_id, "GateHandle::close: already closed");
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Waiter for the started resource, usable before or after the start
    pub fn subscribe(&self) -> ResourceWaiter<R::Handle> {
        self.waiter.clone()
    }

    /// Wait for the start outcome
    pub async fn started(&self) -> Result<R::Handle, StartError> {
        self.waiter.wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn closed(&self) -> GateError {
        GateError::Closed(self.gate_id.to_string())
    }
}

#[async_trait]
impl<R: ManagedResource> Dependent for GateHandle<R> {
    fn id(&self) -> &str {
        &self.gate_id
    }

    async fn teardown(&self, mode: TeardownMode) -> Result<(), GateError> {
        self.close(mode).await
    }
}
