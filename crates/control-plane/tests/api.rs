#[path = "support/common.rs"]
mod support;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use ::common::api::{
    AgentMetadata, CommandCreateResponse, ConnectionInfo, EnrollmentTokenCreateResponse,
    HealthResponse, NodeStatus, NodeSummary, ServerFrame,
};
use control_plane::{
    credentials::digest_credential,
    persistence::{EnrollmentTokenRecord, FleetRepository},
    registry::AgentConnection,
};
use support::{anonymous_get, operator_get, operator_post, read_json, setup_app, TestApp};

async fn enroll_agent(
    test: &TestApp,
    credential: &str,
) -> (Uuid, AgentConnection, mpsc::Receiver<ServerFrame>) {
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

    let (tx, rx) = mpsc::channel(8);
    let conn = AgentConnection::new(tx);
    let node_id = test
        .state
        .control
        .register(
            conn.clone(),
            credential,
            AgentMetadata {
                hostname: "api-host".into(),
                ip: Some("10.1.0.2".into()),
                os: Some("linux".into()),
                agent_version: Some("0.4.0".into()),
            },
        )
        .await
        .expect("agent registers");
    (node_id, conn, rx)
}

#[tokio::test]
async fn health_is_public_and_reports_version() {
    let test = setup_app();
    let response = test.app.oneshot(anonymous_get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = read_json(response).await;
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn operator_endpoints_reject_missing_and_invalid_tokens() {
    let test = setup_app();

    let response = test
        .app
        .clone()
        .oneshot(anonymous_get("/api/v1/nodes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bad = axum::http::Request::builder()
        .method("GET")
        .uri("/api/v1/nodes")
        .header("authorization", "Bearer wrong-token")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = test.app.oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn nodes_list_reflects_registered_agents() {
    let test = setup_app();
    let (node_id, _conn, _rx) = enroll_agent(&test, "api-secret").await;

    let response = test
        .app
        .oneshot(operator_get("/api/v1/nodes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let nodes: Vec<NodeSummary> = read_json(response).await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, node_id);
    assert_eq!(nodes[0].hostname, "api-host");
    assert_eq!(nodes[0].status, NodeStatus::Online);
}

#[tokio::test]
async fn connections_list_shows_live_bindings() {
    let test = setup_app();
    let (node_id, conn, _rx) = enroll_agent(&test, "api-secret").await;

    let response = test
        .app
        .clone()
        .oneshot(operator_get("/api/v1/connections"))
        .await
        .unwrap();
    let connections: Vec<ConnectionInfo> = read_json(response).await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].node_id, node_id);
    assert_eq!(connections[0].connection_id, conn.connection_id);

    test.state.control.disconnect(conn.connection_id).await;
    let response = test
        .app
        .oneshot(operator_get("/api/v1/connections"))
        .await
        .unwrap();
    let connections: Vec<ConnectionInfo> = read_json(response).await;
    assert!(connections.is_empty());
}

#[tokio::test]
async fn minted_enrollment_token_is_usable_for_registration() {
    let test = setup_app();
    let response = test
        .app
        .oneshot(operator_post(
            "/api/v1/enrollment-tokens",
            json!({"ttl_secs": 600}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let minted: EnrollmentTokenCreateResponse = read_json(response).await;
    assert!(minted.expires_at > Utc::now());

    let (tx, _rx) = mpsc::channel(4);
    let node_id = test
        .state
        .control
        .register(
            AgentConnection::new(tx),
            &minted.token,
            AgentMetadata {
                hostname: "minted-host".into(),
                ip: None,
                os: None,
                agent_version: None,
            },
        )
        .await
        .expect("minted token enrolls");
    assert!(test.repo.get_node(node_id).await.unwrap().is_some());
}

#[tokio::test]
async fn enrollment_token_ttl_is_bounded() {
    let test = setup_app();
    let response = test
        .app
        .clone()
        .oneshot(operator_post(
            "/api/v1/enrollment-tokens",
            json!({"ttl_secs": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let over_max = test.state.enrollment.max_ttl_secs + 1;
    let response = test
        .app
        .oneshot(operator_post(
            "/api/v1/enrollment-tokens",
            json!({"ttl_secs": over_max}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn command_is_queued_and_delivered_to_a_live_agent() {
    let test = setup_app();
    let (node_id, _conn, mut rx) = enroll_agent(&test, "api-secret").await;

    let response = test
        .app
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{node_id}/commands"),
            json!({"command_type": "shell", "payload": {"script": "uptime"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: CommandCreateResponse = read_json(response).await;
    assert!(created.delivered);

    let stored = test
        .repo
        .get_command(created.command_id)
        .await
        .unwrap()
        .expect("command stored");
    assert_eq!(stored.node_id, node_id);

    match rx.recv().await.unwrap() {
        ServerFrame::ExecuteCommand {
            command_id,
            command_type,
            payload,
        } => {
            assert_eq!(command_id, created.command_id);
            assert_eq!(command_type, "shell");
            assert_eq!(payload["script"], "uptime");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn command_for_offline_node_stays_queued() {
    let test = setup_app();
    let (node_id, conn, _rx) = enroll_agent(&test, "api-secret").await;
    test.state.control.disconnect(conn.connection_id).await;

    let response = test
        .app
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{node_id}/commands"),
            json!({"command_type": "shell", "payload": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: CommandCreateResponse = read_json(response).await;
    assert!(!created.delivered);
    assert!(test
        .repo
        .get_command(created.command_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn command_for_unknown_node_is_404() {
    let test = setup_app();
    let response = test
        .app
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{}/commands", Uuid::new_v4()),
            json!({"command_type": "shell"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn telemetry_and_ping_requests_reach_the_agent() {
    let test = setup_app();
    let (node_id, _conn, mut rx) = enroll_agent(&test, "api-secret").await;

    let response = test
        .app
        .clone()
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{node_id}/telemetry-request"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = test
        .app
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{node_id}/ping"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert!(matches!(rx.recv().await.unwrap(), ServerFrame::RequestTelemetry));
    assert!(matches!(rx.recv().await.unwrap(), ServerFrame::RequestPing));
}

#[tokio::test]
async fn telemetry_request_for_offline_node_is_404() {
    let test = setup_app();
    let response = test
        .app
        .oneshot(operator_post(
            &format!("/api/v1/nodes/{}/telemetry-request", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_requires_operator_token_and_reports_http_counters() {
    let test = setup_app();

    let response = test
        .app
        .clone()
        .oneshot(anonymous_get("/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let _ = test
        .app
        .clone()
        .oneshot(anonymous_get("/health"))
        .await
        .unwrap();

    let response = test.app.oneshot(operator_get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8_lossy(&body);
    assert!(
        body.contains("control_plane_http_requests_total"),
        "metrics payload missing http counters: {body}"
    );
}
