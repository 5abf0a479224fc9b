//! Server node: owns the commissioning server and its startup gate

use async_trait::async_trait;
use matterstore::NamespaceKind;
use tracing::{debug, info};

use super::{Node, NodeContext, NodeError};
use crate::flow::{NodeDef, NodeKind};
use crate::gate::{GateHandle, GateStatus, ParticipantFilter, StartupGate, TeardownMode};
use crate::resource::BridgeServer;

pub struct ServerNode {
    id: String,
    gate: GateHandle<BridgeServer>,
}

impl ServerNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, "ServerNode::build: called");
        let namespace = ctx.storage.namespace(NamespaceKind::Server, &def.id)?;
        let resource = BridgeServer::new(
            &def.id,
            namespace,
            ctx.config.network.bind_ip,
            &ctx.config.pairing.qr_base_url,
        );
        let participants = ParticipantFilter::server(&def.id).resolve(&ctx.flow.nodes);
        info!(id = %def.id, ?participants, "Server waiting for participants");

        let (gate, handle) = StartupGate::new(
            &def.id,
            ctx.config.startup.server.clone(),
            resource,
            participants,
            ctx.events.emitter_for(&def.id),
        );
        gate.spawn();

        Ok(Self {
            id: def.id.clone(),
            gate: handle,
        })
    }

    pub fn gate(&self) -> GateHandle<BridgeServer> {
        self.gate.clone()
    }
}

#[async_trait]
impl Node for ServerNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Server
    }

    async fn gate_status(&self) -> Option<GateStatus> {
        self.gate.status().await.ok()
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "ServerNode::close: called");
        self.gate.close(TeardownMode::from_removed(removed)).await?;
        Ok(())
    }
}
