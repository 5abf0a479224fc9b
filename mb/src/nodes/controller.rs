//! Controller node: drives a remote device through its server

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Node, NodeContext, NodeError, SetupTask, parse_status_patch};
use crate::events::{EventEmitter, StatusFill, StatusIndicator};
use crate::flow::{DeviceType, NodeDef, NodeKind};
use crate::gate::{GateHandle, StartError, TeardownMode};
use crate::resource::{BridgeServer, ControllerEndpoint, ServerChild};

pub struct ControllerNode {
    id: String,
    name: String,
    device_type: DeviceType,
    connected: Arc<AtomicBool>,
    emitter: EventEmitter,
    setup: SetupTask,
}

impl ControllerNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, "ControllerNode::build: called");
        ctx.flow.check_node(def)?;
        let server = ctx.server(&def.id, def.server.as_deref())?;
        let remote = ControllerEndpoint::from_def(def).ok_or_else(|| NodeError::InvalidInput(format!("{} has no pairing code", def.id)))?;
        let emitter = ctx.events.emitter_for(&def.id);
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(connect(
            def.id.clone(),
            server,
            remote,
            connected.clone(),
            emitter.clone(),
        ));

        Ok(Self {
            id: def.id.clone(),
            name: def.display_name().to_string(),
            device_type: def.device_type,
            connected,
            emitter,
            setup: SetupTask::new(task),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn connect(
    node_id: String,
    server: GateHandle<BridgeServer>,
    remote: ControllerEndpoint,
    connected: Arc<AtomicBool>,
    emitter: EventEmitter,
) {
    if let Err(e) = server
        .register_with(&node_id, Some(ServerChild::Controller(remote)), None)
        .await
    {
        warn!(%node_id, error = %e, "Registration with server failed");
        emitter.error(e.to_string());
        return;
    }

    let handle = match server.started().await {
        Ok(handle) => handle,
        Err(StartError::Abandoned { .. }) => {
            debug!(%node_id, "Server closed before start");
            return;
        }
        Err(e) => {
            emitter.error(format!("Matter server {} unavailable: {}", server.gate_id(), e));
            return;
        }
    };

    match handle.controller(&node_id) {
        Some(controller) if controller.connected => {
            info!(%node_id, address = ?controller.address, "Controller connected");
            connected.store(true, Ordering::SeqCst);
            emitter.node_status(StatusIndicator::dot(StatusFill::Green, "connected"));
        }
        Some(controller) => {
            let reason = controller.error.unwrap_or_else(|| "not connected".to_string());
            warn!(%node_id, %reason, "Controller failed to connect");
            emitter.node_status(StatusIndicator::dot(StatusFill::Red, "disconnected"));
            emitter.error(reason);
        }
        None => {
            emitter.node_status(StatusIndicator::dot(StatusFill::Red, "disconnected"));
            emitter.error(format!("Not attached to {}", server.gate_id()));
        }
    }
}

#[async_trait]
impl Node for ControllerNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Controller
    }

    async fn input(&self, payload: Value) -> Result<(), NodeError> {
        debug!(id = %self.id, "ControllerNode::input: called");
        let patch = parse_status_patch(&payload, self.device_type)?;
        if !self.is_connected() {
            return Err(NodeError::InvalidInput(format!("{} is not connected", self.id)));
        }
        self.emitter.status_changed(&self.name, self.device_type, patch);
        Ok(())
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "ControllerNode::close: called");
        self.setup.abort().await;
        self.connected.store(false, Ordering::SeqCst);
        self.emitter.torn_down(TeardownMode::from_removed(removed));
        Ok(())
    }
}
