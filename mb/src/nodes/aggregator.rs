//! Aggregator node
//!
//! Waits for its aggregated devices, starts, then registers the resulting
//! endpoint with its server. The aggregator's own gate is handed to the server
//! as a dependent so a server teardown cascades to it.

use async_trait::async_trait;
use matterstore::{Namespace, NamespaceKind};
use tracing::{debug, info, warn};

use super::{Node, NodeContext, NodeError, PairingSlot, PairingStatus, SetupTask, publish_on_server};
use crate::events::EventEmitter;
use crate::flow::{NodeDef, NodeKind};
use crate::gate::{GateHandle, GateStatus, ParticipantFilter, StartError, StartupGate, TeardownMode};
use crate::resource::{BridgeAggregator, BridgeServer};

pub struct AggregatorNode {
    id: String,
    gate: GateHandle<BridgeAggregator>,
    server: GateHandle<BridgeServer>,
    namespace: Namespace,
    pairing: PairingSlot,
    emitter: EventEmitter,
    setup: SetupTask,
}

impl AggregatorNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, "AggregatorNode::build: called");
        ctx.flow.check_node(def)?;
        let server = ctx.server(&def.id, def.server.as_deref())?;
        let namespace = ctx.storage.namespace(NamespaceKind::Aggregator, &def.id)?;
        let emitter = ctx.events.emitter_for(&def.id);

        let participants = ParticipantFilter::aggregator(&def.id).resolve(&ctx.flow.nodes);
        info!(id = %def.id, ?participants, "Aggregator waiting for devices");
        let (gate, handle) = StartupGate::new(
            &def.id,
            ctx.config.startup.aggregator.clone(),
            BridgeAggregator::new(def, namespace.clone()),
            participants,
            emitter.clone(),
        );
        gate.spawn();

        let pairing = PairingSlot::default();
        let task = {
            let id = def.id.clone();
            let aggregator = handle.clone();
            let server = server.clone();
            let pairing = pairing.clone();
            let emitter = emitter.clone();
            tokio::spawn(async move {
                let endpoint = match aggregator.started().await {
                    Ok(endpoint) => endpoint,
                    Err(StartError::Abandoned { .. }) => {
                        debug!(%id, "Aggregator closed before start");
                        return;
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "Aggregator did not start, not publishing");
                        return;
                    }
                };
                let dependent = Box::new(aggregator.clone());
                publish_on_server(id, server, endpoint, Some(dependent), pairing, emitter).await;
            })
        };

        Ok(Self {
            id: def.id.clone(),
            gate: handle,
            server,
            namespace,
            pairing,
            emitter,
            setup: SetupTask::new(task),
        })
    }

    pub fn gate(&self) -> GateHandle<BridgeAggregator> {
        self.gate.clone()
    }
}

#[async_trait]
impl Node for AggregatorNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Aggregator
    }

    async fn pairing(&self) -> Option<PairingStatus> {
        Some(self.pairing.get().await)
    }

    async fn decommission(&self) -> Result<PairingStatus, NodeError> {
        info!(id = %self.id, "Decommissioning aggregator");
        self.pairing
            .decommission(&self.namespace, &self.server, &self.id, &self.emitter)
            .await
    }

    async fn gate_status(&self) -> Option<GateStatus> {
        self.gate.status().await.ok()
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "AggregatorNode::close: called");
        self.setup.abort().await;
        self.gate.close(TeardownMode::from_removed(removed)).await?;
        Ok(())
    }
}
