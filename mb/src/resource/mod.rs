//! Protocol resources
//!
//! A managed resource is the thing a startup gate starts exactly once: a
//! commissioning server or an aggregator. Children are attached while the
//! gate is still waiting; after `start` the resource hands out a cloneable
//! handle that participants use to reach it.

mod aggregator;
mod endpoint;
mod error;
pub mod pairing;
mod server;

pub use aggregator::BridgeAggregator;
pub use endpoint::{BridgedAccessory, CommissioningEndpoint, ControllerEndpoint};
pub use error::ResourceError;
pub use pairing::{PairingData, PairingInfo, format_manual_code, parse_manual_code};
pub use server::{BridgeServer, ConnectedController, ServerChild, ServerHandle};

use std::fmt;

use async_trait::async_trait;
use matterstore::Namespace;
use serde::{Deserialize, Serialize};

/// Which kind of resource a gate manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Server,
    Aggregator,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Aggregator => write!(f, "aggregator"),
        }
    }
}

/// A resource that is configured, started once, and torn down
#[async_trait]
pub trait ManagedResource: Send + 'static {
    /// What participants attach before the start
    type Child: Send + 'static;

    /// What subscribers receive once started
    type Handle: Clone + Send + Sync + 'static;

    fn kind(&self) -> ResourceKind;

    /// Attach a child; only valid before `start`
    fn attach(&mut self, id: &str, child: Self::Child) -> Result<(), ResourceError>;

    async fn start(&mut self) -> Result<Self::Handle, ResourceError>;

    /// Release runtime resources; persisted state is left alone
    async fn stop(&mut self) -> Result<(), ResourceError>;

    /// The storage namespace owned by this resource
    fn namespace(&self) -> &Namespace;
}
