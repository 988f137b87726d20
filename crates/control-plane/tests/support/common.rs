#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, Request as HttpRequest},
    Router,
};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

use control_plane::{
    config::EnrollmentConfig,
    events::FleetEventBroadcaster,
    metrics::init_metrics_recorder,
    persistence::{memory::InMemoryFleetRepository, FleetRepositoryRef},
    registry::ConnectionRegistry,
    routes::build_router,
    services::agents::AgentControlPlane,
    session::SessionMap,
    state::{AppState, OperatorAuth},
};

pub const TEST_OPERATOR_TOKEN: &str = "test-operator-token";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub repo: Arc<InMemoryFleetRepository>,
}

pub fn setup_app() -> TestApp {
    let repo = Arc::new(InMemoryFleetRepository::new());
    let repo_ref: FleetRepositoryRef = repo.clone();

    let registry = ConnectionRegistry::new();
    let sessions = SessionMap::new();
    let events = FleetEventBroadcaster::new(64);
    let control = AgentControlPlane::new(
        repo_ref.clone(),
        registry.clone(),
        sessions,
        events.clone(),
    );

    let state = AppState {
        control,
        repo: repo_ref,
        registry,
        events,
        operator_auth: OperatorAuth {
            tokens: vec![TEST_OPERATOR_TOKEN.to_string()],
            header_name: HeaderName::from_static("authorization"),
        },
        enrollment: EnrollmentConfig {
            default_ttl_secs: 900,
            max_ttl_secs: 86_400,
        },
        agent_outbound_buffer: 8,
        metrics_handle: init_metrics_recorder(),
    };

    let app = build_router(state.clone()).with_state(state.clone());
    TestApp { app, state, repo }
}

pub fn operator_get(uri: &str) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_OPERATOR_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

pub fn operator_post(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_OPERATOR_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn anonymous_get(uri: &str) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response body deserializes")
}
