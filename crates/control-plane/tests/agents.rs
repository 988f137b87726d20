#[path = "support/common.rs"]
mod support;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use ::common::api::{AgentMetadata, FleetEvent, NodeStatus, TelemetryReport};
use control_plane::{
    credentials::digest_credential,
    error::AgentCallError,
    persistence::{EnrollmentTokenRecord, FleetRepository},
    registry::AgentConnection,
};
use support::{setup_app, TestApp};

async fn seed_token(test: &TestApp, credential: &str) {
    test.repo
        .insert_enrollment_token(EnrollmentTokenRecord {
            id: Uuid::new_v4(),
            credential_digest: digest_credential(credential).unwrap(),
            expires_at: Utc::now() + Duration::hours(1),
            consumed_at: None,
            node_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

fn metadata(hostname: &str) -> AgentMetadata {
    AgentMetadata {
        hostname: hostname.to_string(),
        ip: None,
        os: Some("linux".into()),
        agent_version: Some("0.4.0".into()),
    }
}

fn telemetry() -> TelemetryReport {
    serde_json::from_value(json!({
        "cpu_percent": 10.0,
        "ram_used_mb": 1024.0,
        "ram_total_mb": 4096.0,
        "disk_usage": {"/": 30.0}
    }))
    .unwrap()
}

#[tokio::test]
async fn racing_registrations_spend_one_token_once() {
    let test = setup_app();
    seed_token(&test, "contested").await;

    let (tx_a, _rx_a) = mpsc::channel(4);
    let (tx_b, _rx_b) = mpsc::channel(4);
    let control = test.state.control.clone();
    let (left, right) = tokio::join!(
        control.register(AgentConnection::new(tx_a), "contested", metadata("racer-a")),
        control.register(AgentConnection::new(tx_b), "contested", metadata("racer-b")),
    );

    // One racer enrolls; the loser of the token race re-resolves through
    // the digest lookup and lands on the same node record.
    let mut node_ids = Vec::new();
    for result in [left, right] {
        match result {
            Ok(node_id) => node_ids.push(node_id),
            Err(AgentCallError::Unauthorized(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(!node_ids.is_empty());
    assert_eq!(test.repo.list_nodes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn agent_lifecycle_publishes_dashboard_events_in_order() {
    let test = setup_app();
    seed_token(&test, "lifecycle").await;
    let mut events = test.state.events.subscribe();

    let (tx, _rx) = mpsc::channel(8);
    let conn = AgentConnection::new(tx);
    let node_id = test
        .state
        .control
        .register(conn.clone(), "lifecycle", metadata("life-host"))
        .await
        .unwrap();

    test.state
        .control
        .heartbeat(conn.connection_id, node_id, telemetry())
        .await
        .unwrap();
    test.state.control.disconnect(conn.connection_id).await;

    match events.recv().await.unwrap() {
        FleetEvent::NodeRegistered { node } => {
            assert_eq!(node.id, node_id);
            assert_eq!(node.hostname, "life-host");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.unwrap() {
        FleetEvent::TelemetryReceived { node_id: id } => assert_eq!(id, node_id),
        other => panic!("unexpected event: {other:?}"),
    }
    // Disconnect is silent: the status stays Online until the health
    // monitor decides otherwise from last-seen timestamps.
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(
        test.repo.get_node(node_id).await.unwrap().unwrap().status,
        NodeStatus::Online
    );
}

#[tokio::test]
async fn reregistration_of_a_monitored_offline_node_flips_status_back_online() {
    let test = setup_app();
    seed_token(&test, "flapper").await;

    let (tx, _rx) = mpsc::channel(4);
    let first = AgentConnection::new(tx);
    let node_id = test
        .state
        .control
        .register(first.clone(), "flapper", metadata("flap-host"))
        .await
        .unwrap();
    test.state.control.disconnect(first.connection_id).await;

    // Stand in for the health monitor, which owns Online -> Offline.
    test.repo
        .touch_liveness(node_id, Utc::now(), NodeStatus::Offline)
        .await
        .unwrap();
    assert_eq!(
        test.repo.get_node(node_id).await.unwrap().unwrap().status,
        NodeStatus::Offline
    );

    let mut events = test.state.events.subscribe();
    let (tx, _rx) = mpsc::channel(4);
    let again = test
        .state
        .control
        .register(AgentConnection::new(tx), "flapper", metadata("flap-host"))
        .await
        .unwrap();
    assert_eq!(again, node_id);
    assert_eq!(
        test.repo.get_node(node_id).await.unwrap().unwrap().status,
        NodeStatus::Online
    );
    match events.recv().await.unwrap() {
        FleetEvent::NodeStatusChanged { status, .. } => assert_eq!(status, NodeStatus::Online),
        other => panic!("unexpected event: {other:?}"),
    }
}
