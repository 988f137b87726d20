//! Dashboard event stream endpoint.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::{events::FleetEventBroadcaster, state::AppState};

pub fn router() -> Router<AppState> {
    Router::<AppState>::new().route("/api/v1/events/stream", any(dashboard_ws_handler))
}

pub(crate) async fn dashboard_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, state.events))
}

async fn handle_dashboard_socket(socket: WebSocket, events: FleetEventBroadcaster) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = events.subscribe();
    debug!("dashboard observer attached");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // A lagged observer skips the overwritten events and keeps
                // streaming from the retained tail.
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dashboard observer lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%err, "dashboard socket error");
                    break;
                }
            },
        }
    }
    debug!("dashboard observer detached");
}
