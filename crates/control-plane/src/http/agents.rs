//! Agent-facing WebSocket endpoint.
//!
//! The bearer credential travels in the upgrade request (Authorization
//! header, or `access_token` query parameter for clients that cannot set
//! headers). Frames are JSON [`AgentFrame`] values, processed one at a
//! time in arrival order; a writer task drains the outbound queue so
//! server-initiated calls never block frame processing.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::{pin_mut, Sink, SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    error::{AgentCallError, AppError},
    registry::AgentConnection,
    services::agents::AgentControlPlane,
    state::AppState,
};
use common::api::{AgentFrame, ServerFrame};

pub fn router() -> Router<AppState> {
    Router::<AppState>::new().route("/api/v1/agent/connect", any(agent_ws_handler))
}

#[derive(Deserialize)]
pub(crate) struct ConnectParams {
    access_token: Option<String>,
}

pub(crate) async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Response {
    // The credential is checked for presence before the upgrade completes;
    // it is only verified against storage when the Register frame arrives.
    let Some(credential) = extract_agent_credential(&headers, &params) else {
        counter!("control_plane_agent_upgrades_rejected_total").increment(1);
        return AppError::unauthorized("missing agent credential").into_response();
    };

    let buffer = state.agent_outbound_buffer;
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state.control, credential, buffer))
}

/// Pull the bearer credential from the upgrade request: Authorization
/// header first, `access_token` query parameter as the fallback.
fn extract_agent_credential(
    headers: &axum::http::HeaderMap,
    params: &ConnectParams,
) -> Option<String> {
    if let Ok(token) = super::extract_bearer_from_header(
        headers,
        &axum::http::header::AUTHORIZATION,
        "authorization header",
    ) {
        return Some(token);
    }
    params
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// How long to wait for the writer to flush its queue at teardown before
/// giving up on an unresponsive peer.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn handle_agent_socket(
    socket: WebSocket,
    control: AgentControlPlane,
    credential: String,
    outbound_buffer: usize,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerFrame>(outbound_buffer);
    let connection = AgentConnection::new(tx.clone());
    let connection_id = connection.connection_id;

    debug!(%connection_id, "agent socket opened, awaiting registration");

    // Writer task: outbound queue to the socket.
    let mut send_task = tokio::spawn(pump_outbound(ws_sender, rx));

    // Frames are handled sequentially: an agent's own calls are never
    // reordered relative to each other.
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let frame = match serde_json::from_str::<AgentFrame>(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(%connection_id, %err, "dropping malformed agent frame");
                        counter!("control_plane_agent_frames_malformed_total").increment(1);
                        continue;
                    }
                };
                match dispatch_frame(&control, &connection, &credential, frame).await {
                    Ok(()) => {}
                    Err(AgentCallError::Unauthorized(message)) => {
                        let _ = tx
                            .send(ServerFrame::Error {
                                code: "unauthorized".to_string(),
                                message,
                            })
                            .await;
                        break;
                    }
                    Err(AgentCallError::Storage(err)) => {
                        // No safe continuation without storage.
                        warn!(%connection_id, %err, "storage failure on agent call; closing");
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(%connection_id, "agent socket closed");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%connection_id, %err, "agent socket error");
                break;
            }
        }
    }

    // Free the node's slot first (the registry holds a sender clone), then
    // release our own handles so the writer can flush what is already
    // queued: a rejection frame must reach the agent before teardown.
    control.disconnect(connection_id).await;
    drop(connection);
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        warn!(%connection_id, "writer did not drain in time; aborting");
        send_task.abort();
    }
}

/// Drain server frames from the queue into the socket, stopping when every
/// sender is gone and the queue is empty, or on the first send failure.
async fn pump_outbound<S>(sink: S, mut rx: mpsc::Receiver<ServerFrame>)
where
    S: Sink<Message>,
{
    pin_mut!(sink);
    while let Some(frame) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&frame) else {
            continue;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn dispatch_frame(
    control: &AgentControlPlane,
    connection: &AgentConnection,
    credential: &str,
    frame: AgentFrame,
) -> Result<(), AgentCallError> {
    match frame {
        AgentFrame::Register { metadata } => {
            let node_id = control
                .register(connection.clone(), credential, metadata)
                .await?;
            let _ = connection
                .outbound
                .send(ServerFrame::Registered { node_id })
                .await;
            Ok(())
        }
        AgentFrame::Heartbeat { node_id, telemetry } => {
            control
                .heartbeat(connection.connection_id, node_id, telemetry)
                .await
        }
        AgentFrame::CommandStatus {
            command_id,
            status,
            logs,
        } => {
            control
                .update_command_status(connection.connection_id, command_id, &status, logs)
                .await
        }
        AgentFrame::BackoffStatus {
            node_id,
            consecutive_failures,
            next_retry_utc,
        } => {
            info!(%node_id, consecutive_failures, "agent reported reconnect backoff");
            control.report_backoff(node_id, consecutive_failures, next_retry_utc);
            Ok(())
        }
        AgentFrame::PingResponse {
            node_id,
            success,
            next_retry_utc,
        } => {
            control.ping_response(node_id, success, next_retry_utc);
            Ok(())
        }
    }
}
