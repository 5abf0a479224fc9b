//! Host runtime
//!
//! Builds the nodes of a flow in dependency order and tears them down in
//! reverse. A node that fails to build is reported once on the event bus and
//! left out; its siblings are unaffected.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use eyre::Result;
use futures::future::join_all;
use matterstore::StorageRoot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::events::EventBus;
use crate::flow::{FlowDefinition, FlowError, NodeDef, NodeKind};
use crate::gate::GateStatus;
use crate::nodes::{
    AggregatorNode, ControllerNode, DeviceControlNode, DeviceNode, DeviceStatusNode, Node, NodeContext, NodeError,
    ServerNode,
};

pub struct Host {
    deployment_id: Uuid,
    flow: Arc<FlowDefinition>,
    events: Arc<EventBus>,
    nodes: Vec<Arc<dyn Node>>,
    index: HashMap<String, usize>,
    failures: BTreeMap<String, String>,
}

impl Host {
    /// Build every node of the flow; must be called inside a tokio runtime
    pub fn build(flow: FlowDefinition, config: Arc<Config>, storage: StorageRoot, events: Arc<EventBus>) -> Self {
        let flow = Arc::new(flow);
        let deployment_id = Uuid::now_v7();
        info!(%deployment_id, nodes = flow.nodes.len(), "Deploying flow");
        let mut ctx = NodeContext::new(flow.clone(), storage, events.clone(), config);
        let mut nodes: Vec<Arc<dyn Node>> = Vec::new();
        let mut index = HashMap::new();
        let mut failures = BTreeMap::new();

        for def in flow.build_order() {
            if index.contains_key(&def.id) || failures.contains_key(&def.id) {
                let err = NodeError::from(FlowError::DuplicateId(def.id.clone()));
                warn!(id = %def.id, "Skipping duplicate node id");
                events.emitter_for(&def.id).error(err.to_string());
                continue;
            }
            match build_node(def, &mut ctx) {
                Ok(node) => {
                    debug!(id = %def.id, kind = %def.kind, "Host::build: node built");
                    index.insert(def.id.clone(), nodes.len());
                    nodes.push(node);
                }
                Err(e) => {
                    error!(id = %def.id, error = %e, "Failed to build node");
                    events.emitter_for(&def.id).error(e.to_string());
                    failures.insert(def.id.clone(), e.to_string());
                }
            }
        }

        info!(built = nodes.len(), failed = failures.len(), "Flow deployed");
        Self {
            deployment_id,
            flow,
            events,
            nodes,
            index,
            failures,
        }
    }

    /// Identifies this deployment; a redeploy gets a new one
    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    pub fn node(&self, id: &str) -> Option<Arc<dyn Node>> {
        self.index.get(id).map(|i| self.nodes[*i].clone())
    }

    /// Nodes in construction order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<dyn Node>> {
        self.nodes.iter()
    }

    /// Nodes that failed to build, with the reason
    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    /// Status of every gate in the flow
    pub async fn gate_statuses(&self) -> Vec<GateStatus> {
        join_all(self.nodes.iter().map(|node| node.gate_status()))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Close every node in reverse construction order
    pub async fn close(&self, removed: bool) -> Result<()> {
        info!(removed, "Closing flow");
        self.close_with(|_| removed).await
    }

    /// Close for a redeploy: only nodes missing from the next flow are removed
    pub async fn close_for_redeploy(&self, next: &FlowDefinition) -> Result<()> {
        info!(nodes = next.nodes.len(), "Closing flow for redeploy");
        self.close_with(|node| {
            next.get(node.id())
                .map(|def| def.kind != node.kind())
                .unwrap_or(true)
        })
        .await
    }

    async fn close_with<F>(&self, removed: F) -> Result<()>
    where
        F: Fn(&dyn Node) -> bool,
    {
        let mut failed = Vec::new();
        for node in self.nodes.iter().rev() {
            let removed = removed(node.as_ref());
            debug!(id = %node.id(), removed, "Host::close: closing node");
            if let Err(e) = node.close(removed).await {
                error!(id = %node.id(), error = %e, "Failed to close node");
                self.events.emitter_for(node.id()).error(e.to_string());
                failed.push(node.id().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(eyre::eyre!("Failed to close nodes: {}", failed.join(", ")))
        }
    }
}

fn build_node(def: &NodeDef, ctx: &mut NodeContext) -> Result<Arc<dyn Node>, NodeError> {
    let node: Arc<dyn Node> = match def.kind {
        NodeKind::Server => {
            let node = ServerNode::build(def, ctx)?;
            ctx.servers.insert(def.id.clone(), node.gate());
            Arc::new(node)
        }
        NodeKind::Aggregator => {
            let node = AggregatorNode::build(def, ctx)?;
            ctx.aggregators.insert(def.id.clone(), node.gate());
            Arc::new(node)
        }
        NodeKind::Device => {
            let node = Arc::new(DeviceNode::build(def, ctx)?);
            ctx.devices.insert(def.id.clone(), node.clone());
            node
        }
        NodeKind::Controller => Arc::new(ControllerNode::build(def, ctx)?),
        NodeKind::DeviceStatus => Arc::new(DeviceStatusNode::build(def, ctx)?),
        NodeKind::DeviceControl => Arc::new(DeviceControlNode::build(def, ctx)?),
    };
    Ok(node)
}
