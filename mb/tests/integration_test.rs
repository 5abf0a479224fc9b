//! Integration tests for MatterBridge
//!
//! Deploy whole flows against a temporary storage root and observe them
//! through the event bus, the gates and the CLI.

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use matterbridge::config::Config;
use matterbridge::events::{BridgeEvent, EventBus, StatusFill};
use matterbridge::flow::{DeviceCategory, DeviceType, FlowDefinition, NodeDef, NodeKind};
use matterbridge::gate::{GateState, GateStatus, StartMode};
use matterbridge::host::Host;
use matterstore::{NamespaceKind, StorageRoot};
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn test_config(server_ms: u64, aggregator_ms: u64) -> Arc<Config> {
    let mut config = Config::default();
    config.network.bind_ip = "127.0.0.1".parse().unwrap();
    config.startup.server.timeout_ms = server_ms;
    config.startup.aggregator.timeout_ms = aggregator_ms;
    Arc::new(config)
}

fn node(id: &str, kind: NodeKind) -> NodeDef {
    let mut def = NodeDef::new(id, kind);
    def.port = 0;
    def
}

async fn wait_for_gate(host: &Host, id: &str) -> GateStatus {
    for _ in 0..300 {
        let status = host.node(id).unwrap().gate_status().await.unwrap();
        if status.state != GateState::Waiting && status.state != GateState::Starting {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gate {} never left startup", id);
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<BridgeEvent>, mut pred: F) -> BridgeEvent
where
    F: FnMut(&BridgeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not seen")
}

// =============================================================================
// Deployment
// =============================================================================

#[tokio::test]
async fn test_home_flow_starts_fully() {
    let temp = TempDir::new().unwrap();
    let storage = StorageRoot::open(temp.path()).unwrap();
    let events = Arc::new(EventBus::with_default_capacity());
    let mut rx = events.subscribe();

    let flow = FlowDefinition::new(vec![
        node("srv", NodeKind::Server),
        node("hall", NodeKind::Aggregator).with_server("srv"),
        node("lamp", NodeKind::Device)
            .with_category(DeviceCategory::Aggregated)
            .with_aggregator("hall"),
        node("fan", NodeKind::Device)
            .with_category(DeviceCategory::Aggregated)
            .with_aggregator("hall")
            .with_device_type(DeviceType::OnOffPlugin),
        node("desk", NodeKind::Device)
            .with_server("srv")
            .with_device_type(DeviceType::DimmableLight),
        node("desk-status", NodeKind::DeviceStatus).with_device("desk"),
        node("desk-control", NodeKind::DeviceControl).with_device("desk"),
    ]);
    let host = Host::build(flow, test_config(2_000, 1_000), storage, events.clone());
    assert!(host.failures().is_empty());

    let hall = wait_for_gate(&host, "hall").await;
    assert_eq!(hall.state, GateState::Started);
    assert_eq!(hall.mode, Some(StartMode::Full));
    assert_eq!(hall.metrics.start_attempts, 1);

    let srv = wait_for_gate(&host, "srv").await;
    assert_eq!(srv.state, GateState::Started);
    assert_eq!(srv.mode, Some(StartMode::Full));
    assert_eq!(srv.metrics.unreachable_warnings, 0);
    assert_eq!(srv.registrations.keys().collect::<Vec<_>>(), vec!["desk", "hall"]);

    // aggregator is published once its server has started
    let event = next_matching(&mut rx, |e| matches!(e, BridgeEvent::PairingUpdated { node_id, .. } if node_id == "hall")).await;
    assert!(matches!(event, BridgeEvent::PairingUpdated { commissioned: false, .. }));
    let pairing = host.node("hall").unwrap().pairing().await.unwrap();
    assert!(pairing.pairing_code.is_some());

    host.node("desk-control")
        .unwrap()
        .input(json!({"on": true, "level": 60}))
        .await
        .unwrap();
    let event = next_matching(&mut rx, |e| {
        matches!(e, BridgeEvent::NodeStatus { node_id, status } if node_id == "desk-status" && status.fill == StatusFill::Green)
    })
    .await;
    match event {
        BridgeEvent::NodeStatus { status, .. } => assert_eq!(status.text, "on (60%)"),
        other => panic!("unexpected event {:?}", other),
    }

    host.close(false).await.unwrap();
}

#[tokio::test]
async fn test_misconfigured_participant_degrades_server() {
    let temp = TempDir::new().unwrap();
    let storage = StorageRoot::open(temp.path()).unwrap();
    let events = Arc::new(EventBus::with_default_capacity());
    let mut rx = events.subscribe();

    // controller without a pairing code never registers
    let flow = FlowDefinition::new(vec![
        node("srv", NodeKind::Server),
        node("desk", NodeKind::Device).with_server("srv"),
        node("remote", NodeKind::Controller).with_server("srv"),
    ]);
    let host = Host::build(flow, test_config(200, 100), storage, events.clone());
    assert_eq!(host.failures().keys().collect::<Vec<_>>(), vec!["remote"]);

    let srv = wait_for_gate(&host, "srv").await;
    assert_eq!(srv.state, GateState::Started);
    assert_eq!(
        srv.mode,
        Some(StartMode::Degraded {
            missing: vec!["remote".to_string()]
        })
    );
    assert_eq!(srv.metrics.unreachable_warnings, 1);

    let event = next_matching(&mut rx, |e| matches!(e, BridgeEvent::ParticipantUnreachable { .. })).await;
    match event {
        BridgeEvent::ParticipantUnreachable { node_id, gate_id, .. } => {
            assert_eq!(node_id, "remote");
            assert_eq!(gate_id, "srv");
        }
        other => panic!("unexpected event {:?}", other),
    }

    host.close(false).await.unwrap();
}

#[tokio::test]
async fn test_controller_connects_through_server() {
    let temp = TempDir::new().unwrap();
    let storage = StorageRoot::open(temp.path()).unwrap();
    let events = Arc::new(EventBus::with_default_capacity());
    let mut rx = events.subscribe();

    let flow = FlowDefinition::new(vec![
        node("srv", NodeKind::Server),
        node("remote", NodeKind::Controller)
            .with_server("srv")
            .with_pairing_code("3497-011-2332"),
    ]);
    let host = Host::build(flow, test_config(1_000, 500), storage, events.clone());

    let event = next_matching(&mut rx, |e| matches!(e, BridgeEvent::NodeStatus { node_id, .. } if node_id == "remote")).await;
    match event {
        BridgeEvent::NodeStatus { status, .. } => {
            assert_eq!(status.fill, StatusFill::Green);
            assert_eq!(status.text, "connected");
        }
        other => panic!("unexpected event {:?}", other),
    }
    host.node("remote").unwrap().input(json!({"on": false})).await.unwrap();

    host.close(false).await.unwrap();
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_redeploy_destroys_only_removed_server() {
    let temp = TempDir::new().unwrap();
    let storage = StorageRoot::open(temp.path()).unwrap();
    let events = Arc::new(EventBus::with_default_capacity());
    let flow = FlowDefinition::new(vec![node("kitchen", NodeKind::Server), node("garage", NodeKind::Server)]);
    let host = Host::build(flow.clone(), test_config(500, 200), storage.clone(), events);

    wait_for_gate(&host, "kitchen").await;
    wait_for_gate(&host, "garage").await;
    let kitchen = storage.namespace(NamespaceKind::Server, "kitchen").unwrap();
    let garage = storage.namespace(NamespaceKind::Server, "garage").unwrap();
    assert!(kitchen.exists());
    assert!(garage.exists());

    let next = FlowDefinition::new(vec![node("garage", NodeKind::Server)]);
    host.close_for_redeploy(&next).await.unwrap();

    assert!(!kitchen.exists());
    assert!(garage.exists());
    let status = host.node("garage").unwrap().gate_status().await;
    assert!(status.is_none(), "closed gate still answering");
}

#[tokio::test]
async fn test_plain_close_preserves_pairing() {
    let temp = TempDir::new().unwrap();
    let config = test_config(500, 200);
    let flow = FlowDefinition::new(vec![node("srv", NodeKind::Server), node("desk", NodeKind::Device).with_server("srv")]);

    let first_code = {
        let storage = StorageRoot::open(temp.path()).unwrap();
        let events = Arc::new(EventBus::with_default_capacity());
        let mut rx = events.subscribe();
        let host = Host::build(flow.clone(), config.clone(), storage, events.clone());
        next_matching(&mut rx, |e| matches!(e, BridgeEvent::PairingUpdated { node_id, .. } if node_id == "desk")).await;
        let code = host.node("desk").unwrap().pairing().await.unwrap().pairing_code;
        host.close(false).await.unwrap();
        code
    };
    assert!(first_code.is_some());

    let storage = StorageRoot::open(temp.path()).unwrap();
    let events = Arc::new(EventBus::with_default_capacity());
    let mut rx = events.subscribe();
    let host = Host::build(flow, config, storage, events.clone());
    next_matching(&mut rx, |e| matches!(e, BridgeEvent::PairingUpdated { node_id, .. } if node_id == "desk")).await;
    let second_code = host.node("desk").unwrap().pairing().await.unwrap().pairing_code;
    assert_eq!(first_code, second_code);

    let reset = host.node("desk").unwrap().decommission().await.unwrap();
    assert!(!reset.commissioned);
    host.close(false).await.unwrap();
}

// =============================================================================
// CLI
// =============================================================================

fn mb(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mb").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"));
    cmd
}

#[test]
fn test_cli_check_valid_flow() {
    let home = TempDir::new().unwrap();
    let flow = home.path().join("flow.yml");
    std::fs::write(
        &flow,
        r#"
nodes:
  - id: lamp
    type: device
    server: srv
  - id: srv
    type: server
"#,
    )
    .unwrap();

    mb(&home)
        .args(["check", "--flow"])
        .arg(&flow)
        .assert()
        .success()
        .stdout(predicate::str::contains("srv → lamp"));
}

#[test]
fn test_cli_check_reports_dangling_reference() {
    let home = TempDir::new().unwrap();
    let flow = home.path().join("flow.yml");
    std::fs::write(
        &flow,
        r#"
nodes:
  - id: lamp
    type: device
    server: nope
"#,
    )
    .unwrap();

    mb(&home)
        .args(["check", "--flow"])
        .arg(&flow)
        .assert()
        .failure()
        .stdout(predicate::str::contains("server nope not found"));
}

#[test]
fn test_cli_pairing_before_first_start() {
    let home = TempDir::new().unwrap();
    let storage = home.path().join("storage");
    let config = home.path().join("config.yml");
    std::fs::write(&config, format!("storage:\n  root: {}\n", storage.display())).unwrap();
    let flow = home.path().join("flow.yml");
    std::fs::write(
        &flow,
        r#"
nodes:
  - id: srv
    type: server
  - id: lamp
    type: device
    server: srv
"#,
    )
    .unwrap();

    mb(&home)
        .arg("--config")
        .arg(&config)
        .args(["pairing", "lamp", "--flow"])
        .arg(&flow)
        .assert()
        .failure()
        .stderr(predicate::str::contains("has not started yet"));

    let lamp = StorageRoot::open(&storage)
        .unwrap()
        .namespace(NamespaceKind::Device, "lamp")
        .unwrap();
    assert!(!lamp.exists(), "pairing query created state");
}
