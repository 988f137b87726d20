use super::*;

pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/connections", get(list_connections))
        .route(
            "/api/v1/enrollment-tokens",
            post(create_enrollment_token),
        )
        .route("/api/v1/nodes/{id}/commands", post(create_command))
        .route(
            "/api/v1/nodes/{id}/telemetry-request",
            post(request_telemetry),
        )
        .route("/api/v1/nodes/{id}/ping", post(request_ping))
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    responses(
        (status = 200, description = "All known nodes", body = [NodeSummary]),
        (status = 401, description = "Missing operator token", body = ErrorResponse)
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeSummary>>> {
    let nodes = state.repo.list_nodes().await?;
    Ok(Json(nodes.iter().map(|node| node.summary()).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/connections",
    responses(
        (status = 200, description = "Live agent connections", body = [ConnectionInfo])
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn list_connections(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ConnectionInfo>>> {
    Ok(Json(state.registry.snapshot().await))
}

#[utoipa::path(
    post,
    path = "/api/v1/enrollment-tokens",
    request_body = EnrollmentTokenCreateRequest,
    responses(
        (status = 201, description = "Token minted", body = EnrollmentTokenCreateResponse),
        (status = 400, description = "TTL out of range", body = ErrorResponse)
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn create_enrollment_token(
    State(state): State<AppState>,
    Json(body): Json<EnrollmentTokenCreateRequest>,
) -> ApiResult<(StatusCode, Json<EnrollmentTokenCreateResponse>)> {
    let ttl = body.ttl_secs.unwrap_or(state.enrollment.default_ttl_secs);
    if ttl == 0 || ttl > state.enrollment.max_ttl_secs {
        return Err(AppError::bad_request(format!(
            "ttl_secs must be between 1 and {}",
            state.enrollment.max_ttl_secs
        )));
    }
    let minted = services::tokens::mint_enrollment_token(&state.repo, ttl).await?;
    Ok((StatusCode::CREATED, Json(minted)))
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/commands",
    request_body = CommandCreateRequest,
    params(("id" = Uuid, Path, description = "Node id")),
    responses(
        (status = 201, description = "Command queued", body = CommandCreateResponse),
        (status = 404, description = "Unknown node", body = ErrorResponse)
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn create_command(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    Json(body): Json<CommandCreateRequest>,
) -> ApiResult<(StatusCode, Json<CommandCreateResponse>)> {
    if body.command_type.trim().is_empty() {
        return Err(AppError::bad_request("command_type cannot be empty"));
    }
    if state.repo.get_node(node_id).await?.is_none() {
        return Err(AppError::not_found("unknown node"));
    }

    let command = state
        .repo
        .create_command(NewCommand {
            id: Uuid::new_v4(),
            node_id,
            command_type: body.command_type,
            payload: body.payload,
        })
        .await?;

    // Delivery is best-effort: the command stays queued for an offline
    // node and the agent picks it up on a later dispatch.
    let delivered = state
        .control
        .execute_command_on_agent(
            node_id,
            command.id,
            command.command_type.clone(),
            command.payload.clone(),
        )
        .await
        .is_ok();

    Ok((
        StatusCode::CREATED,
        Json(CommandCreateResponse {
            command_id: command.id,
            delivered,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/telemetry-request",
    params(("id" = Uuid, Path, description = "Node id")),
    responses(
        (status = 202, description = "Request forwarded to the agent"),
        (status = 404, description = "No live connection", body = ErrorResponse)
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn request_telemetry(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.control.request_telemetry(node_id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/ping",
    params(("id" = Uuid, Path, description = "Node id")),
    responses(
        (status = 202, description = "Ping forwarded to the agent"),
        (status = 404, description = "No live connection", body = ErrorResponse)
    ),
    security(("operatorBearer" = []))
)]
pub(crate) async fn request_ping(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.control.request_ping(node_id).await?;
    Ok(StatusCode::ACCEPTED)
}
