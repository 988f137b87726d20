//! HTTP surface: operator REST endpoints plus the agent and dashboard
//! WebSocket endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderName, Request, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::warn;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use uuid::Uuid;

use crate::{
    error::{ApiResult, AppError},
    metrics::track_http_metrics,
    persistence::NewCommand,
    services,
    state::AppState,
};
use common::api::{
    CommandCreateRequest, CommandCreateResponse, ConnectionInfo, EnrollmentTokenCreateRequest,
    EnrollmentTokenCreateResponse, ErrorResponse, HealthResponse, NodeSummary,
};

mod agents;
mod dashboard;
mod nodes;

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/health", get(healthz))
        .route(
            "/metrics",
            get(metrics).route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_operator_auth,
            )),
        )
        .merge(agents::router())
        .merge(dashboard::router())
        .merge(nodes::router(state))
        .layer(middleware::from_fn(track_http_metrics))
}

pub async fn require_operator_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let token = extract_bearer_from_header(
        req.headers(),
        &state.operator_auth.header_name,
        "operator authorization header",
    )?;
    if !state.operator_auth.is_operator_token(&token) {
        warn!(path = %req.uri().path(), "operator request with invalid token");
        return Err(AppError::forbidden("invalid operator token"));
    }
    Ok(next.run(req).await)
}

pub fn extract_bearer_from_header(
    headers: &HeaderMap,
    header: &HeaderName,
    context: &str,
) -> ApiResult<String> {
    let value = headers
        .get(header)
        .ok_or_else(|| AppError::unauthorized(format!("missing {context}")))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized(format!("invalid {context}")))?;

    let prefix = "Bearer ";
    if !value.starts_with(prefix) {
        return Err(AppError::unauthorized(format!("invalid {context} scheme")));
    }

    Ok(value[prefix.len()..].to_string())
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is serving", body = HealthResponse))
)]
pub(crate) async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version::VERSION.to_string(),
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        healthz,
        nodes::list_nodes,
        nodes::list_connections,
        nodes::create_enrollment_token,
        nodes::create_command,
        nodes::request_telemetry,
        nodes::request_ping,
    ),
    components(schemas(
        common::api::NodeStatus,
        NodeSummary,
        ConnectionInfo,
        EnrollmentTokenCreateRequest,
        EnrollmentTokenCreateResponse,
        CommandCreateRequest,
        CommandCreateResponse,
        HealthResponse,
        ErrorResponse,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = "Fleet Control Plane API".to_string();
        openapi.info.version = crate::version::VERSION.to_string();

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_schemes_from_iter([
            (
                "operatorBearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("opaque")
                        .description(Some(
                            "Bearer token for operator endpoints (Authorization header).",
                        ))
                        .build(),
                ),
            ),
            (
                "agentBearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("opaque")
                        .description(Some(
                            "Agent credential presented when opening the agent WebSocket.",
                        ))
                        .build(),
                ),
            ),
        ]);
    }
}
