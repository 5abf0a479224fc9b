//! Device status observer
//!
//! Mirrors a device's on/off state as a coloured status indicator.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{Node, NodeContext, NodeError, SetupTask};
use crate::events::{BridgeEvent, DeviceState, EventEmitter, StatusIndicator};
use crate::flow::{NodeDef, NodeKind};

pub struct DeviceStatusNode {
    id: String,
    device: String,
    watcher: SetupTask,
}

impl DeviceStatusNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, "DeviceStatusNode::build: called");
        ctx.flow.check_node(def)?;
        let device = def.device.clone().unwrap_or_default();

        // Subscribe before reporting so no change is missed
        let rx = ctx.events.subscribe();
        let emitter = ctx.events.emitter_for(&def.id);
        emitter.node_status(StatusIndicator::for_state(&DeviceState::default()));
        let task = tokio::spawn(watch(device.clone(), rx, emitter));

        Ok(Self {
            id: def.id.clone(),
            device,
            watcher: SetupTask::new(task),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

async fn watch(device: String, mut rx: broadcast::Receiver<BridgeEvent>, emitter: EventEmitter) {
    loop {
        match rx.recv().await {
            Ok(BridgeEvent::StatusChanged { node_id, state, .. }) if node_id == device => {
                emitter.node_status(StatusIndicator::for_state(&state));
            }
            Ok(BridgeEvent::TornDown { node_id, .. }) if node_id == device => {
                emitter.node_status(StatusIndicator::for_state(&DeviceState::default()));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(%device, skipped, "Status observer lagged behind the event bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[async_trait]
impl Node for DeviceStatusNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::DeviceStatus
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "DeviceStatusNode::close: called");
        self.watcher.abort().await;
        Ok(())
    }
}
