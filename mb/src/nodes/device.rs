//! Device node
//!
//! A standalone device publishes its own commissioning endpoint on a server;
//! an aggregated device is exposed as a bridged accessory of its aggregator.

use async_trait::async_trait;
use matterstore::{Namespace, NamespaceKind};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Node, NodeContext, NodeError, PairingSlot, PairingStatus, SetupTask, publish_on_server};
use crate::events::{DeviceState, EventEmitter, StatusFill, StatusIndicator};
use crate::flow::{DeviceCategory, DeviceType, NodeDef, NodeKind};
use crate::gate::{GateHandle, StartError, TeardownMode};
use crate::resource::{BridgeAggregator, BridgeServer, BridgedAccessory, CommissioningEndpoint};

/// Validate a status patch against a device type
///
/// The payload must be an object with at least one of `on` (bool) or `level`
/// (0-100, dimmable types only). Unknown keys are logged and ignored.
pub fn parse_status_patch(payload: &Value, device_type: DeviceType) -> Result<DeviceState, NodeError> {
    let Some(fields) = payload.as_object() else {
        return Err(NodeError::InvalidInput("payload must be a JSON object".to_string()));
    };

    let mut patch = DeviceState::default();
    for (key, value) in fields {
        match key.as_str() {
            "on" => {
                let on = value
                    .as_bool()
                    .ok_or_else(|| NodeError::InvalidInput("on must be a boolean".to_string()))?;
                patch.on = Some(on);
            }
            "level" => {
                if !device_type.is_dimmable() {
                    return Err(NodeError::InvalidInput(format!("{} has no level", device_type)));
                }
                let level = value
                    .as_u64()
                    .filter(|level| *level <= 100)
                    .ok_or_else(|| NodeError::InvalidInput("level must be a number between 0 and 100".to_string()))?;
                patch.level = Some(level as u8);
            }
            other => warn!(key = %other, "Ignoring unknown status key"),
        }
    }

    if patch == DeviceState::default() {
        return Err(NodeError::InvalidInput("patch sets nothing".to_string()));
    }
    Ok(patch)
}

/// Where the device is published
enum Placement {
    Standalone {
        namespace: Namespace,
        server: GateHandle<BridgeServer>,
    },
    Aggregated,
}

pub struct DeviceNode {
    id: String,
    name: String,
    device_type: DeviceType,
    placement: Placement,
    state: Mutex<DeviceState>,
    pairing: PairingSlot,
    emitter: EventEmitter,
    setup: SetupTask,
}

impl DeviceNode {
    pub fn build(def: &NodeDef, ctx: &NodeContext) -> Result<Self, NodeError> {
        debug!(id = %def.id, category = ?def.category, "DeviceNode::build: called");
        ctx.flow.check_node(def)?;
        let emitter = ctx.events.emitter_for(&def.id);
        let pairing = PairingSlot::default();

        let (placement, task) = match def.category {
            DeviceCategory::Standalone => {
                let server = ctx.server(&def.id, def.server.as_deref())?;
                let namespace = ctx.storage.namespace(NamespaceKind::Device, &def.id)?;
                let endpoint = CommissioningEndpoint::from_def(def, namespace.clone());
                let task = tokio::spawn(publish_on_server(
                    def.id.clone(),
                    server.clone(),
                    endpoint,
                    None,
                    pairing.clone(),
                    emitter.clone(),
                ));
                (Placement::Standalone { namespace, server }, task)
            }
            DeviceCategory::Aggregated => {
                let aggregator = ctx.aggregator(&def.id, def.aggregator.as_deref())?;
                let accessory = BridgedAccessory::from_def(def);
                let task = tokio::spawn(join_aggregator(def.id.clone(), aggregator, accessory, emitter.clone()));
                (Placement::Aggregated, task)
            }
        };

        Ok(Self {
            id: def.id.clone(),
            name: def.display_name().to_string(),
            device_type: def.device_type,
            placement,
            state: Mutex::new(DeviceState::default()),
            pairing,
            emitter,
            setup: SetupTask::new(task),
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub async fn state(&self) -> DeviceState {
        *self.state.lock().await
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self.placement, Placement::Standalone { .. })
    }
}

async fn join_aggregator(
    node_id: String,
    aggregator: GateHandle<BridgeAggregator>,
    accessory: BridgedAccessory,
    emitter: EventEmitter,
) {
    if let Err(e) = aggregator.register_with(&node_id, Some(accessory), None).await {
        warn!(%node_id, error = %e, "Registration with aggregator failed");
        emitter.error(e.to_string());
        return;
    }
    match aggregator.started().await {
        Ok(endpoint) => {
            let bridged = endpoint.bridged.iter().any(|b| b.id == node_id);
            if bridged {
                emitter.node_status(StatusIndicator::dot(StatusFill::Green, "bridged"));
            } else {
                emitter.warning(format!("Not bridged by {}", aggregator.gate_id()));
            }
        }
        Err(StartError::Abandoned { .. }) => debug!(%node_id, "Aggregator closed before start"),
        Err(e) => {
            warn!(%node_id, error = %e, "Aggregator did not start");
            emitter.error(format!("Aggregator {} unavailable: {}", aggregator.gate_id(), e));
        }
    }
}

#[async_trait]
impl Node for DeviceNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Device
    }

    async fn pairing(&self) -> Option<PairingStatus> {
        match self.placement {
            Placement::Standalone { .. } => Some(self.pairing.get().await),
            Placement::Aggregated => None,
        }
    }

    async fn decommission(&self) -> Result<PairingStatus, NodeError> {
        match &self.placement {
            Placement::Standalone { namespace, server } => {
                info!(id = %self.id, "Decommissioning device");
                self.pairing.decommission(namespace, server, &self.id, &self.emitter).await
            }
            Placement::Aggregated => Err(NodeError::unsupported(&self.id, "decommission")),
        }
    }

    async fn input(&self, payload: Value) -> Result<(), NodeError> {
        debug!(id = %self.id, "DeviceNode::input: called");
        let patch = parse_status_patch(&payload, self.device_type)?;
        let state = {
            let mut state = self.state.lock().await;
            if patch.on.is_some() {
                state.on = patch.on;
            }
            if patch.level.is_some() {
                state.level = patch.level;
            }
            *state
        };
        self.emitter.status_changed(&self.name, self.device_type, state);
        Ok(())
    }

    async fn close(&self, removed: bool) -> Result<(), NodeError> {
        debug!(id = %self.id, removed, "DeviceNode::close: called");
        self.setup.abort().await;
        if removed && let Placement::Standalone { namespace, .. } = &self.placement {
            namespace.destroy()?;
        }
        self.emitter.torn_down(TeardownMode::from_removed(removed));
        Ok(())
    }
}
