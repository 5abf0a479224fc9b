//! Things that attach to a server or an aggregator

use std::net::SocketAddr;

use matterstore::Namespace;
use serde::{Deserialize, Serialize};

use crate::flow::{DeviceType, NodeDef};

/// An endpoint a server publishes for commissioning
///
/// Standalone devices contribute one each; an aggregator contributes one that
/// carries all of its bridged accessories.
#[derive(Debug, Clone)]
pub struct CommissioningEndpoint {
    pub node_id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub port: u16,
    pub discriminator: u16,
    pub product_id: u16,
    pub bridged: Vec<BridgedAccessory>,
    /// Where the endpoint keeps its pairing state
    pub namespace: Namespace,
}

impl CommissioningEndpoint {
    pub fn from_def(def: &NodeDef, namespace: Namespace) -> Self {
        Self {
            node_id: def.id.clone(),
            name: def.display_name().to_string(),
            device_type: def.device_type,
            port: def.port,
            discriminator: def.discriminator,
            product_id: def.product_id,
            bridged: Vec::new(),
            namespace,
        }
    }
}

/// A device exposed behind an aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgedAccessory {
    pub id: String,
    pub label: String,
    pub serial_number: String,
    pub device_type: DeviceType,
    pub reachable: bool,
    /// Assigned by the aggregator at start, stable across restarts
    #[serde(default)]
    pub endpoint_number: Option<u16>,
}

impl BridgedAccessory {
    pub fn new(id: &str, label: &str, device_type: DeviceType) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            serial_number: format!("bridge-{}", id),
            device_type,
            reachable: true,
            endpoint_number: None,
        }
    }

    pub fn from_def(def: &NodeDef) -> Self {
        Self::new(&def.id, def.display_name(), def.device_type)
    }
}

/// A remote device a controller connects to through the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    pub node_id: String,
    pub pairing_code: String,
    pub address: Option<SocketAddr>,
}

impl ControllerEndpoint {
    /// The remote address is known only when both `ip` and `port` are set
    pub fn from_def(def: &NodeDef) -> Option<Self> {
        let pairing_code = def.pairing_code.clone()?;
        Some(Self {
            node_id: def.id.clone(),
            pairing_code,
            address: def.ip.filter(|_| def.port != 0).map(|ip| SocketAddr::new(ip, def.port)),
        })
    }
}
