//! Flow nodes
//!
//! Each node kind wraps one piece of the bridge: servers and aggregators own a
//! startup gate, devices and controllers register with one, and the status and
//! control nodes observe or drive a device.

mod aggregator;
mod control;
mod controller;
mod device;
mod server;
mod status;

pub use aggregator::AggregatorNode;
pub use control::DeviceControlNode;
pub use controller::ControllerNode;
pub use device::{DeviceNode, parse_status_patch};
pub use server::ServerNode;
pub use status::DeviceStatusNode;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use matterstore::{Namespace, StorageRoot, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::events::{EventBus, EventEmitter};
use crate::flow::{FlowDefinition, FlowError, NodeKind};
use crate::gate::{Dependent, GateError, GateHandle, GateStatus};
use crate::resource::{BridgeAggregator, BridgeServer, CommissioningEndpoint, PairingInfo, ServerChild, ServerHandle, pairing};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] FlowError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("{node} does not support {operation}")]
    Unsupported { node: String, operation: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl NodeError {
    fn unsupported(node: &str, operation: &'static str) -> Self {
        Self::Unsupported {
            node: node.to_string(),
            operation,
        }
    }
}

/// Pairing state as shown to users
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingStatus {
    pub commissioned: bool,
    pub pairing_code: Option<String>,
    pub url: Option<String>,
}

impl From<PairingInfo> for PairingStatus {
    fn from(info: PairingInfo) -> Self {
        Self {
            commissioned: info.commissioned,
            pairing_code: Some(info.manual_code),
            url: Some(info.url),
        }
    }
}

/// A running node in the deployed flow
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Pairing state, for nodes that publish a commissioning endpoint
    async fn pairing(&self) -> Option<PairingStatus> {
        None
    }

    async fn decommission(&self) -> Result<PairingStatus, NodeError> {
        Err(NodeError::unsupported(self.id(), "decommission"))
    }

    async fn input(&self, _payload: Value) -> Result<(), NodeError> {
        Err(NodeError::unsupported(self.id(), "input"))
    }

    async fn gate_status(&self) -> Option<GateStatus> {
        None
    }

    /// Tear the node down; `removed` means it is gone from the flow for good
    async fn close(&self, removed: bool) -> Result<(), NodeError>;
}

/// Everything a node constructor can see
pub struct NodeContext {
    pub flow: Arc<FlowDefinition>,
    pub storage: StorageRoot,
    pub events: Arc<EventBus>,
    pub config: Arc<Config>,
    pub servers: HashMap<String, GateHandle<BridgeServer>>,
    pub aggregators: HashMap<String, GateHandle<BridgeAggregator>>,
    pub devices: HashMap<String, Arc<DeviceNode>>,
}

impl NodeContext {
    pub fn new(flow: Arc<FlowDefinition>, storage: StorageRoot, events: Arc<EventBus>, config: Arc<Config>) -> Self {
        Self {
            flow,
            storage,
            events,
            config,
            servers: HashMap::new(),
            aggregators: HashMap::new(),
            devices: HashMap::new(),
        }
    }

    fn server(&self, node: &str, server_id: Option<&str>) -> Result<GateHandle<BridgeServer>, NodeError> {
        let target = server_id.unwrap_or_default();
        self.servers.get(target).cloned().ok_or_else(|| {
            FlowError::MissingReference {
                node: node.to_string(),
                expected: NodeKind::Server,
                target: target.to_string(),
            }
            .into()
        })
    }

    fn aggregator(&self, node: &str, aggregator_id: Option<&str>) -> Result<GateHandle<BridgeAggregator>, NodeError> {
        let target = aggregator_id.unwrap_or_default();
        self.aggregators.get(target).cloned().ok_or_else(|| {
            FlowError::MissingReference {
                node: node.to_string(),
                expected: NodeKind::Aggregator,
                target: target.to_string(),
            }
            .into()
        })
    }
}

/// Latest pairing state of a node, shared with its setup task
#[derive(Clone, Default)]
struct PairingSlot {
    inner: Arc<RwLock<PairingStatus>>,
}

impl PairingSlot {
    async fn get(&self) -> PairingStatus {
        self.inner.read().await.clone()
    }

    /// Re-read pairing info from a started server
    async fn refresh(&self, server: &ServerHandle, node_id: &str, emitter: &EventEmitter) {
        match server.pairing_info(node_id) {
            Ok(Some(info)) => {
                let status = PairingStatus::from(info);
                let commissioned = status.commissioned;
                *self.inner.write().await = status;
                emitter.pairing_updated(commissioned);
            }
            Ok(None) => debug!(%node_id, "PairingSlot::refresh: endpoint not served"),
            Err(e) => {
                warn!(%node_id, error = %e, "Failed to read pairing info");
                emitter.error(format!("Failed to read pairing info: {}", e));
            }
        }
    }

    /// Clear persisted pairing state and refresh from the server if it is up
    async fn decommission(
        &self,
        namespace: &Namespace,
        server: &GateHandle<BridgeServer>,
        node_id: &str,
        emitter: &EventEmitter,
    ) -> Result<PairingStatus, NodeError> {
        pairing::decommission(namespace)?;
        match server.subscribe().try_get() {
            Some(Ok(handle)) => self.refresh(&handle, node_id, emitter).await,
            _ => {
                self.inner.write().await.commissioned = false;
                emitter.pairing_updated(false);
            }
        }
        Ok(self.get().await)
    }
}

/// Background setup work of a node, aborted on close
#[derive(Default)]
struct SetupTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SetupTask {
    fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn abort(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}

/// Register an endpoint with its server and pick up pairing info once it starts
async fn publish_on_server(
    node_id: String,
    server: GateHandle<BridgeServer>,
    endpoint: CommissioningEndpoint,
    dependent: Option<Box<dyn Dependent>>,
    slot: PairingSlot,
    emitter: EventEmitter,
) {
    debug!(%node_id, server = %server.gate_id(), "publish_on_server: called");
    if let Err(e) = server
        .register_with(&node_id, Some(ServerChild::Endpoint(endpoint)), dependent)
        .await
    {
        warn!(%node_id, error = %e, "Registration with server failed");
        emitter.error(e.to_string());
        return;
    }
    match server.started().await {
        Ok(handle) => slot.refresh(&handle, &node_id, &emitter).await,
        Err(e) => {
            warn!(%node_id, error = %e, "Server did not start");
            emitter.error(format!("Matter server {} unavailable: {}", server.gate_id(), e));
        }
    }
}
