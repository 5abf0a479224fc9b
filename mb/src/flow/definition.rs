//! Node definitions and flow loading

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors found while validating a flow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Duplicate node id: {0}")]
    DuplicateId(String),

    #[error("Invalid node id: {0:?}")]
    InvalidId(String),

    #[error("Node {node}: {field} is required")]
    MissingField { node: String, field: &'static str },

    #[error("Node {node}: {expected} {target} not found")]
    MissingReference {
        node: String,
        expected: NodeKind,
        target: String,
    },
}

/// Kind of a node in the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Server,
    Aggregator,
    Device,
    Controller,
    DeviceStatus,
    DeviceControl,
}

impl NodeKind {
    /// Construction rank; parents always come before the nodes that reference them
    pub fn build_rank(&self) -> u8 {
        match self {
            Self::Server => 0,
            Self::Aggregator => 1,
            Self::Device => 2,
            Self::Controller => 3,
            Self::DeviceStatus => 4,
            Self::DeviceControl => 5,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Server => "server",
            Self::Aggregator => "aggregator",
            Self::Device => "device",
            Self::Controller => "controller",
            Self::DeviceStatus => "device-status",
            Self::DeviceControl => "device-control",
        };
        write!(f, "{}", name)
    }
}

/// Whether a device is published on its own or behind an aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceCategory {
    #[default]
    Standalone,
    Aggregated,
}

/// Device types a bridged or standalone device can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    #[default]
    OnOffLight,
    OnOffPlugin,
    DimmableLight,
    DimmablePlugin,
    Aggregator,
}

impl DeviceType {
    pub fn is_dimmable(&self) -> bool {
        matches!(self, Self::DimmableLight | Self::DimmablePlugin)
    }

    /// Protocol device type code advertised for the endpoint
    pub fn code(&self) -> u16 {
        match self {
            Self::OnOffLight => 0x0100,
            Self::DimmableLight => 0x0101,
            Self::OnOffPlugin => 0x010a,
            Self::DimmablePlugin => 0x010b,
            Self::Aggregator => 0x000e,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OnOffLight => "on-off-light",
            Self::OnOffPlugin => "on-off-plugin",
            Self::DimmableLight => "dimmable-light",
            Self::DimmablePlugin => "dimmable-plugin",
            Self::Aggregator => "aggregator",
        };
        write!(f, "{}", name)
    }
}

fn default_discriminator() -> u16 {
    3840
}

fn default_product_id() -> u16 {
    0x8000
}

/// One node as written in the flow file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDef {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    #[serde(default)]
    pub name: Option<String>,

    /// Parent server (aggregators, standalone devices, controllers)
    #[serde(default)]
    pub server: Option<String>,

    /// Parent aggregator (aggregated devices)
    #[serde(default)]
    pub aggregator: Option<String>,

    #[serde(default)]
    pub category: DeviceCategory,

    #[serde(default)]
    pub device_type: DeviceType,

    /// Commissioning port, 0 picks a free port
    #[serde(default)]
    pub port: u16,

    #[serde(default = "default_discriminator")]
    pub discriminator: u16,

    #[serde(default = "default_product_id")]
    pub product_id: u16,

    /// Pairing code of a remote device (controllers)
    #[serde(default)]
    pub pairing_code: Option<String>,

    /// Address of a remote device (controllers)
    #[serde(default)]
    pub ip: Option<IpAddr>,

    /// Target device (device-status, device-control)
    #[serde(default)]
    pub device: Option<String>,
}

impl NodeDef {
    /// Create a definition with defaults for everything but id and kind
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            server: None,
            aggregator: None,
            category: DeviceCategory::default(),
            device_type: DeviceType::default(),
            port: 0,
            discriminator: default_discriminator(),
            product_id: default_product_id(),
            pairing_code: None,
            ip: None,
            device: None,
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_aggregator(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregator = Some(aggregator.into());
        self
    }

    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_pairing_code(mut self, code: impl Into<String>) -> Self {
        self.pairing_code = Some(code.into());
        self
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// The complete deployed flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

impl FlowDefinition {
    pub fn new(nodes: Vec<NodeDef>) -> Self {
        Self { nodes }
    }

    /// Load a flow from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "FlowDefinition::load: called");
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read flow file: {}", path.display()))?;
        let flow: Self =
            serde_yaml::from_str(&content).context(format!("Failed to parse flow file: {}", path.display()))?;
        info!(path = %path.display(), nodes = flow.nodes.len(), "Loaded flow");
        Ok(flow)
    }

    pub fn get(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Nodes sorted so every parent precedes the nodes referencing it
    pub fn build_order(&self) -> Vec<&NodeDef> {
        let mut ordered: Vec<&NodeDef> = self.nodes.iter().collect();
        ordered.sort_by_key(|n| n.kind.build_rank());
        ordered
    }

    /// Check the references a single node makes
    pub fn check_node(&self, def: &NodeDef) -> Result<(), FlowError> {
        // ids name storage and event log directories
        matterstore::validate_id(&def.id).map_err(|_| FlowError::InvalidId(def.id.clone()))?;
        match def.kind {
            NodeKind::Server => Ok(()),
            NodeKind::Aggregator | NodeKind::Controller => {
                self.check_reference(def, "server", def.server.as_deref(), NodeKind::Server)?;
                if def.kind == NodeKind::Controller && def.pairing_code.is_none() {
                    return Err(FlowError::MissingField {
                        node: def.id.clone(),
                        field: "pairing-code",
                    });
                }
                Ok(())
            }
            NodeKind::Device => match def.category {
                DeviceCategory::Standalone => {
                    self.check_reference(def, "server", def.server.as_deref(), NodeKind::Server)
                }
                DeviceCategory::Aggregated => {
                    self.check_reference(def, "aggregator", def.aggregator.as_deref(), NodeKind::Aggregator)
                }
            },
            // status observers may also watch a controller
            NodeKind::DeviceStatus
                if def
                    .device
                    .as_deref()
                    .and_then(|target| self.get(target))
                    .is_some_and(|target| target.kind == NodeKind::Controller) =>
            {
                Ok(())
            }
            NodeKind::DeviceStatus | NodeKind::DeviceControl => {
                self.check_reference(def, "device", def.device.as_deref(), NodeKind::Device)
            }
        }
    }

    fn check_reference(
        &self,
        def: &NodeDef,
        field: &'static str,
        target: Option<&str>,
        expected: NodeKind,
    ) -> Result<(), FlowError> {
        let Some(target) = target else {
            return Err(FlowError::MissingField {
                node: def.id.clone(),
                field,
            });
        };
        match self.get(target) {
            Some(node) if node.kind == expected => Ok(()),
            _ => Err(FlowError::MissingReference {
                node: def.id.clone(),
                expected,
                target: target.to_string(),
            }),
        }
    }

    /// Report every configuration problem without aborting the load
    pub fn validate(&self) -> Vec<FlowError> {
        debug!(nodes = self.nodes.len(), "FlowDefinition::validate: called");
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for def in &self.nodes {
            if !seen.insert(def.id.as_str()) {
                errors.push(FlowError::DuplicateId(def.id.clone()));
            }
            if let Err(e) = self.check_node(def) {
                errors.push(e);
            }
        }
        errors
    }
}
