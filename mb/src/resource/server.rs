//! Commissioning server backend

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use matterstore::{Namespace, StoreError};
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::endpoint::{BridgedAccessory, CommissioningEndpoint, ControllerEndpoint};
use super::pairing::{PairingData, PairingInfo, parse_manual_code};
use super::{ManagedResource, ResourceError, ResourceKind};

/// What can be attached to a server before it starts
#[derive(Debug, Clone)]
pub enum ServerChild {
    Endpoint(CommissioningEndpoint),
    Controller(ControllerEndpoint),
}

/// Result of connecting a controller to its remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectedController {
    pub node_id: String,
    pub address: Option<SocketAddr>,
    pub short_discriminator: Option<u8>,
    pub connected: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
struct ServedEndpoint {
    endpoint: CommissioningEndpoint,
    local_addr: SocketAddr,
}

#[derive(Debug)]
struct ServerState {
    server_id: String,
    qr_base_url: String,
    endpoints: BTreeMap<String, ServedEndpoint>,
    controllers: BTreeMap<String, ConnectedController>,
}

/// Handle to a started server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    inner: Arc<ServerState>,
}

impl ServerHandle {
    pub fn server_id(&self) -> &str {
        &self.inner.server_id
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.inner.endpoints.keys().cloned().collect()
    }

    pub fn local_addr(&self, node_id: &str) -> Option<SocketAddr> {
        self.inner.endpoints.get(node_id).map(|s| s.local_addr)
    }

    pub fn bridged(&self, node_id: &str) -> Vec<BridgedAccessory> {
        self.inner
            .endpoints
            .get(node_id)
            .map(|s| s.endpoint.bridged.clone())
            .unwrap_or_default()
    }

    /// Pairing info for an endpoint served by this server
    pub fn pairing_info(&self, node_id: &str) -> Result<Option<PairingInfo>, StoreError> {
        debug!(server_id = %self.inner.server_id, %node_id, "ServerHandle::pairing_info: called");
        let Some(served) = self.inner.endpoints.get(node_id) else {
            return Ok(None);
        };
        let namespace = &served.endpoint.namespace;
        let data = PairingData::load_or_create(namespace, served.endpoint.discriminator)?;
        data.info(namespace, &self.inner.qr_base_url).map(Some)
    }

    pub fn controller(&self, node_id: &str) -> Option<ConnectedController> {
        self.inner.controllers.get(node_id).cloned()
    }

    pub fn controllers(&self) -> Vec<ConnectedController> {
        self.inner.controllers.values().cloned().collect()
    }
}

/// Server resource: one UDP listener per published endpoint
pub struct BridgeServer {
    id: String,
    namespace: Namespace,
    bind_ip: IpAddr,
    qr_base_url: String,
    endpoints: BTreeMap<String, CommissioningEndpoint>,
    controllers: BTreeMap<String, ControllerEndpoint>,
    sockets: Vec<UdpSocket>,
    running: bool,
}

impl BridgeServer {
    pub fn new(id: &str, namespace: Namespace, bind_ip: IpAddr, qr_base_url: &str) -> Self {
        debug!(%id, %bind_ip, "BridgeServer::new: called");
        Self {
            id: id.to_string(),
            namespace,
            bind_ip,
            qr_base_url: qr_base_url.to_string(),
            endpoints: BTreeMap::new(),
            controllers: BTreeMap::new(),
            sockets: Vec::new(),
            running: false,
        }
    }

    fn connect(&self, controller: &ControllerEndpoint) -> ConnectedController {
        match parse_manual_code(&controller.pairing_code) {
            Some((short, _)) => {
                info!(server_id = %self.id, controller = %controller.node_id, address = ?controller.address, "Controller connected");
                ConnectedController {
                    node_id: controller.node_id.clone(),
                    address: controller.address,
                    short_discriminator: Some(short),
                    connected: true,
                    error: None,
                }
            }
            None => {
                let err = ResourceError::InvalidPairingCode {
                    node: controller.node_id.clone(),
                    code: controller.pairing_code.clone(),
                };
                warn!(server_id = %self.id, error = %err, "Controller not connected");
                ConnectedController {
                    node_id: controller.node_id.clone(),
                    address: controller.address,
                    short_discriminator: None,
                    connected: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[async_trait]
impl ManagedResource for BridgeServer {
    type Child = ServerChild;
    type Handle = ServerHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Server
    }

    fn attach(&mut self, id: &str, child: ServerChild) -> Result<(), ResourceError> {
        debug!(server_id = %self.id, %id, "BridgeServer::attach: called");
        if self.running {
            return Err(ResourceError::AlreadyStarted);
        }
        match child {
            ServerChild::Endpoint(endpoint) => {
                if self.endpoints.insert(id.to_string(), endpoint).is_some() {
                    warn!(server_id = %self.id, %id, "Replaced existing endpoint");
                }
            }
            ServerChild::Controller(controller) => {
                self.controllers.insert(id.to_string(), controller);
            }
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<ServerHandle, ResourceError> {
        if self.running {
            return Err(ResourceError::AlreadyStarted);
        }
        info!(server_id = %self.id, endpoints = self.endpoints.len(), controllers = self.controllers.len(), "Starting server");
        self.namespace.set("last-started", &Utc::now())?;

        let mut sockets = Vec::with_capacity(self.endpoints.len());
        let mut served = BTreeMap::new();
        for (id, endpoint) in &self.endpoints {
            let bind_err = |source| ResourceError::Bind {
                port: endpoint.port,
                source,
            };
            let socket = UdpSocket::bind(SocketAddr::new(self.bind_ip, endpoint.port))
                .await
                .map_err(bind_err)?;
            let local_addr = socket.local_addr().map_err(bind_err)?;
            let pairing = PairingData::load_or_create(&endpoint.namespace, endpoint.discriminator)?;
            info!(
                server_id = %self.id,
                endpoint = %id,
                %local_addr,
                device_type = %endpoint.device_type,
                bridged = endpoint.bridged.len(),
                code = %pairing.manual_code(),
                "Endpoint listening"
            );
            sockets.push(socket);
            served.insert(
                id.clone(),
                ServedEndpoint {
                    endpoint: endpoint.clone(),
                    local_addr,
                },
            );
        }

        let controllers = self
            .controllers
            .iter()
            .map(|(id, c)| (id.clone(), self.connect(c)))
            .collect();

        self.sockets = sockets;
        self.running = true;
        Ok(ServerHandle {
            inner: Arc::new(ServerState {
                server_id: self.id.clone(),
                qr_base_url: self.qr_base_url.clone(),
                endpoints: served,
                controllers,
            }),
        })
    }

    async fn stop(&mut self) -> Result<(), ResourceError> {
        debug!(server_id = %self.id, running = self.running, "BridgeServer::stop: called");
        if self.running {
            info!(server_id = %self.id, listeners = self.sockets.len(), "Stopping server");
        }
        self.sockets.clear();
        self.running = false;
        Ok(())
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}
