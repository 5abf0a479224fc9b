//! Write-once resource broadcast
//!
//! A started resource handle (or the start failure) is published exactly once
//! and every waiter, whether it subscribed before or after resolution, sees
//! the same outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::messages::StartError;

type Slot<T> = Option<Result<T, StartError>>;

/// Publishing side, owned by the gate
#[derive(Debug)]
pub struct ResourceBroadcaster<T> {
    gate_id: Arc<str>,
    tx: watch::Sender<Slot<T>>,
}

impl<T: Clone> ResourceBroadcaster<T> {
    pub fn new(gate_id: &str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            gate_id: Arc::from(gate_id),
            tx,
        }
    }

    /// Publish the outcome; returns false (and changes nothing) if already resolved
    pub fn resolve(&self, result: Result<T, StartError>) -> bool {
        debug!(gate_id = %self.gate_id, ok = result.is_ok(), "ResourceBroadcaster::resolve: called");
        let mut pending = Some(result);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> ResourceWaiter<T> {
        ResourceWaiter {
            gate_id: Arc::clone(&self.gate_id),
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side, cheap to clone
#[derive(Debug, Clone)]
pub struct ResourceWaiter<T> {
    gate_id: Arc<str>,
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> ResourceWaiter<T> {
    /// Wait for the outcome
    ///
    /// Resolves to [`StartError::Abandoned`] if the broadcaster goes away
    /// without ever publishing.
    pub async fn wait(&self) -> Result<T, StartError> {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => match &*slot {
                Some(result) => result.clone(),
                None => Err(self.abandoned()),
            },
            Err(_) => Err(self.abandoned()),
        }
    }

    /// Peek at the outcome without waiting
    pub fn try_get(&self) -> Option<Result<T, StartError>> {
        self.rx.borrow().clone()
    }

    fn abandoned(&self) -> StartError {
        StartError::Abandoned {
            gate_id: self.gate_id.to_string(),
        }
    }
}
