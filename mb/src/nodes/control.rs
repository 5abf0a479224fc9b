//! Device control node: forwards validated input to a device

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{DeviceNode, Node, NodeContext, NodeError};
use crate::flow::{FlowError, NodeDef, NodeKind};

pub struct DeviceControlNode {
    id: String,
    target: Arc<DeviceNode>,
}

impl DeviceControlNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, "DeviceControlNode::build: called");
        ctx.flow.check_node(def)?;
        let device = def.device.clone().unwrap_or_default();
        let target = ctx
            .devices
            .get(&device)
            .cloned()
            .ok_or_else(|| FlowError::MissingReference {
                node: def.id.clone(),
                expected: NodeKind::Device,
                target: device,
            })?;
        Ok(Self {
            id: def.id.clone(),
            target,
        })
    }
}

#[async_trait]
impl Node for DeviceControlNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::DeviceControl
    }

    async fn input(&self, payload: Value) -> Result<(), NodeError> {
        debug!(id = %self.id, device = %self.target.id(), "DeviceControlNode::input: called");
        self.target.input(payload).await
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "DeviceControlNode::close: called");
        Ok(())
    }
}
