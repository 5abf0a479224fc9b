//! Admin HTTP endpoint
//!
//! Pairing lookups, decommissioning, device control and gate inspection for
//! the deployed flow. The host behind the router is swapped on redeploy.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gate::GateStatus;
use crate::host::Host;
use crate::nodes::{Node, NodeError};

/// The currently deployed host
pub type SharedHost = Arc<RwLock<Arc<Host>>>;

#[derive(Debug, Deserialize)]
pub struct NodeQuery {
    #[serde(rename = "node-id")]
    pub node_id: String,
}

#[derive(Debug, Serialize)]
pub struct GatesResponse {
    pub deployment_id: Uuid,
    pub gates: Vec<GateStatus>,
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::InvalidInput(_) | NodeError::Unsupported { .. } => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn create_router(host: SharedHost) -> Router {
    Router::new()
        .route("/pairing-code", get(pairing_code_handler))
        .route("/decommission", post(decommission_handler))
        .route("/control", post(control_handler))
        .route("/gates", get(gates_handler))
        .with_state(host)
}

/// Serve the admin endpoint until `shutdown` resolves
pub async fn serve<F>(bind: SocketAddr, host: SharedHost, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind admin endpoint on {}", bind))?;
    info!("Admin endpoint listening on {}", bind);
    axum::serve(listener, create_router(host))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Admin endpoint failed")?;
    Ok(())
}

async fn lookup(host: &SharedHost, node_id: &str) -> Result<Arc<dyn Node>, ApiError> {
    host.read()
        .await
        .node(node_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown node {}", node_id)))
}

async fn pairing_code_handler(
    State(host): State<SharedHost>,
    Query(query): Query<NodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(node_id = %query.node_id, "pairing_code_handler: called");
    let node = lookup(&host, &query.node_id).await?;
    let status = node
        .pairing()
        .await
        .ok_or_else(|| ApiError::NotFound(format!("{} has no pairing code", query.node_id)))?;
    Ok(Json(status))
}

async fn decommission_handler(
    State(host): State<SharedHost>,
    Query(query): Query<NodeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(node_id = %query.node_id, "decommission_handler: called");
    let node = lookup(&host, &query.node_id).await?;
    let status = node.decommission().await?;
    info!(node_id = %query.node_id, "Decommissioned");
    Ok(Json(status))
}

async fn control_handler(
    State(host): State<SharedHost>,
    Query(query): Query<NodeQuery>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(node_id = %query.node_id, "control_handler: called");
    let node = lookup(&host, &query.node_id).await?;
    if let Err(e) = node.input(payload).await {
        warn!(node_id = %query.node_id, error = %e, "Rejected control input");
        return Err(e.into());
    }
    Ok(StatusCode::ACCEPTED)
}

async fn gates_handler(State(host): State<SharedHost>) -> impl IntoResponse {
    let host = host.read().await.clone();
    Json(GatesResponse {
        deployment_id: host.deployment_id(),
        gates: host.gate_statuses().await,
        failures: host.failures().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::flow::{FlowDefinition, NodeDef, NodeKind};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use matterstore::StorageRoot;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn host(temp: &TempDir) -> SharedHost {
        let mut config = Config::default();
        config.network.bind_ip = "127.0.0.1".parse().unwrap();
        let mut light = NodeDef::new("light", NodeKind::Device).with_server("srv");
        light.port = 0;
        let flow = FlowDefinition::new(vec![
            NodeDef::new("srv", NodeKind::Server),
            light,
            NodeDef::new("ctl", NodeKind::DeviceControl).with_device("light"),
        ]);
        let storage = StorageRoot::open(temp.path()).unwrap();
        let host = Host::build(flow, Arc::new(config), storage, Arc::new(EventBus::with_default_capacity()));
        Arc::new(RwLock::new(Arc::new(host)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let temp = TempDir::new().unwrap();
        let app = create_router(host(&temp));

        let (status, _) = send(&app, Method::GET, "/pairing-code?node-id=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::POST, "/decommission?node-id=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::POST, "/control?node-id=nope", Some(json!({"on": true}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pairing_and_decommission() {
        let temp = TempDir::new().unwrap();
        let shared = host(&temp);
        let app = create_router(shared.clone());

        let (status, body) = send(&app, Method::GET, "/pairing-code?node-id=light", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commissioned"], json!(false));

        let (status, body) = send(&app, Method::POST, "/decommission?node-id=light", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commissioned"], json!(false));

        // servers publish no pairing code of their own
        let (status, _) = send(&app, Method::GET, "/pairing-code?node-id=srv", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        shared.read().await.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_control_validates_input() {
        let temp = TempDir::new().unwrap();
        let shared = host(&temp);
        let app = create_router(shared.clone());

        let (status, _) = send(&app, Method::POST, "/control?node-id=ctl", Some(json!({"on": true}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = send(&app, Method::POST, "/control?node-id=ctl", Some(json!({"level": 50}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::POST, "/control?node-id=srv", Some(json!({"on": true}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        shared.read().await.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_gates_lists_servers() {
        let temp = TempDir::new().unwrap();
        let shared = host(&temp);
        let app = create_router(shared.clone());

        let (status, body) = send(&app, Method::GET, "/gates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gates"][0]["gate-id"], json!("srv"));
        assert!(body["failures"].as_object().unwrap().is_empty());

        shared.read().await.close(false).await.unwrap();
    }
}
