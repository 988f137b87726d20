//! Agent-facing control-plane operations.
//!
//! [`AgentControlPlane`] is the transport-independent core: the WebSocket
//! layer decodes frames and calls in here, and the operator API calls in
//! here to push work out to live agents. Identity is tracked per
//! connection in the [`SessionMap`]; agent-supplied ids are never trusted
//! without checking them against the session or against stored ownership.

use chrono::Utc;
use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    credentials,
    error::{AgentCallError, DeliveryError},
    events::FleetEventBroadcaster,
    persistence::{
        CommandUpdate, FleetRepositoryRef, NewNode, NodeRegistrationUpdate, TelemetrySnapshot,
    },
    registry::{AgentConnection, ConnectionId, ConnectionRegistry},
    session::{AgentIdentity, SessionMap},
};
use common::api::{
    AgentMetadata, FleetEvent, NodeStatus, ParsedCommandStatus, ServerFrame, TelemetryReport,
    parse_command_status,
};

/// The control-plane core. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct AgentControlPlane {
    repo: FleetRepositoryRef,
    registry: ConnectionRegistry,
    sessions: SessionMap,
    events: FleetEventBroadcaster,
}

impl AgentControlPlane {
    pub fn new(
        repo: FleetRepositoryRef,
        registry: ConnectionRegistry,
        sessions: SessionMap,
        events: FleetEventBroadcaster,
    ) -> Self {
        Self {
            repo,
            registry,
            sessions,
            events,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn events(&self) -> &FleetEventBroadcaster {
        &self.events
    }

    /// Bind a connection to a durable node identity.
    ///
    /// The credential digest is the join key: a node already bound to it
    /// re-registers (refreshing its metadata), otherwise the digest must
    /// match an unspent enrollment token, which is atomically consumed to
    /// create the node. Anything else is rejected.
    pub async fn register(
        &self,
        connection: AgentConnection,
        credential: &str,
        metadata: AgentMetadata,
    ) -> Result<Uuid, AgentCallError> {
        let digest = credentials::digest_credential(credential)
            .map_err(|err| AgentCallError::unauthorized(err.to_string()))?;
        let now = Utc::now();

        let node = match self.repo.find_node_by_digest(&digest).await? {
            Some(existing) => {
                let was_offline = existing.status == NodeStatus::Offline;
                let updated = self
                    .repo
                    .apply_registration(
                        existing.id,
                        NodeRegistrationUpdate {
                            hostname: metadata.hostname,
                            ip: metadata.ip,
                            os: metadata.os,
                            agent_version: metadata.agent_version,
                            last_seen: now,
                            status: NodeStatus::Online,
                        },
                    )
                    .await?;
                if was_offline {
                    self.events.publish(FleetEvent::NodeStatusChanged {
                        node_id: updated.id,
                        status: NodeStatus::Online,
                        last_seen: updated.last_seen,
                    });
                }
                info!(node_id = %updated.id, hostname = %updated.hostname, "agent re-registered");
                updated
            }
            None => {
                let created = self
                    .repo
                    .consume_enrollment_token(
                        &digest,
                        NewNode {
                            id: Uuid::new_v4(),
                            hostname: metadata.hostname,
                            ip: metadata.ip,
                            os: metadata.os,
                            agent_version: metadata.agent_version,
                            credential_digest: digest.clone(),
                            last_seen: now,
                            status: NodeStatus::Online,
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        counter!("control_plane_registrations_rejected_total").increment(1);
                        AgentCallError::unauthorized("unknown credential")
                    })?;
                info!(node_id = %created.id, hostname = %created.hostname, "node enrolled");
                self.events.publish(FleetEvent::NodeRegistered {
                    node: created.summary(),
                });
                created
            }
        };

        self.registry.bind(node.id, connection.clone()).await;
        self.sessions
            .bind(
                connection.connection_id,
                AgentIdentity {
                    node_id: node.id,
                    credential_digest: digest,
                },
            )
            .await;
        counter!("control_plane_registrations_total").increment(1);
        Ok(node.id)
    }

    /// Record a heartbeat: bump liveness and store the telemetry sample.
    ///
    /// Requires a registered session whose node matches the claimed id; a
    /// mismatch is an authorization failure. A vanished node is logged and
    /// the call completes.
    pub async fn heartbeat(
        &self,
        connection_id: ConnectionId,
        node_id: Uuid,
        telemetry: TelemetryReport,
    ) -> Result<(), AgentCallError> {
        self.require_node(connection_id, node_id).await?;
        let now = Utc::now();

        let touched = self
            .repo
            .touch_liveness(node_id, now, NodeStatus::Online)
            .await?;
        if !touched {
            warn!(%node_id, "heartbeat for unknown node; dropping");
            return Ok(());
        }

        let ram_percent = if telemetry.ram_total_mb > 0.0 {
            (telemetry.ram_used_mb / telemetry.ram_total_mb) * 100.0
        } else {
            0.0
        };
        let disk_percent = if telemetry.disk_usage.is_empty() {
            0.0
        } else {
            telemetry.disk_usage.values().sum::<f64>() / telemetry.disk_usage.len() as f64
        };

        self.repo
            .insert_snapshot(TelemetrySnapshot {
                node_id,
                recorded_at: now,
                cpu_percent: telemetry.cpu_percent,
                ram_percent,
                disk_percent,
                temperature: telemetry.temperature,
                raw: serde_json::to_value(&telemetry)
                    .map_err(|err| AgentCallError::Storage(err.into()))?,
            })
            .await?;

        counter!("control_plane_heartbeats_total").increment(1);
        self.events.publish(FleetEvent::TelemetryReceived { node_id });
        Ok(())
    }

    /// Apply an agent's progress report to a stored command.
    ///
    /// Ownership is enforced against storage, not against the claim: the
    /// command must belong to the session's node. Unknown command ids and
    /// unrecognized status strings are logged and dropped. Output lines
    /// always append, even after the command went terminal; a terminal
    /// status is never overwritten.
    pub async fn update_command_status(
        &self,
        connection_id: ConnectionId,
        command_id: Uuid,
        status_text: &str,
        logs: Option<String>,
    ) -> Result<(), AgentCallError> {
        let identity = self.require_session(connection_id).await?;

        let Some(command) = self.repo.get_command(command_id).await? else {
            warn!(%command_id, node_id = %identity.node_id, "status report for unknown command; dropping");
            return Ok(());
        };
        if command.node_id != identity.node_id {
            warn!(
                %command_id,
                owner = %command.node_id,
                claimant = %identity.node_id,
                "status report for a command owned by another node"
            );
            counter!("control_plane_command_spoofs_rejected_total").increment(1);
            return Err(AgentCallError::unauthorized(
                "command belongs to another node",
            ));
        }

        let parsed = match parse_command_status(status_text) {
            ParsedCommandStatus::Known(status) => Some(status),
            ParsedCommandStatus::Unrecognized => {
                warn!(%command_id, status = %status_text, "unrecognized command status; keeping stored status");
                None
            }
        };

        // A terminal command keeps its status; late log lines still land.
        let new_status = parsed.filter(|_| !command.status.is_terminal());
        let newly_terminal = new_status.map(|s| s.is_terminal()).unwrap_or(false);

        if new_status.is_none() && logs.is_none() {
            return Ok(());
        }

        let Some(updated) = self
            .repo
            .update_command(
                command_id,
                CommandUpdate {
                    status: new_status,
                    append_log: logs,
                    executed_at: newly_terminal.then(Utc::now),
                },
            )
            .await?
        else {
            warn!(%command_id, "command vanished during update; dropping");
            return Ok(());
        };

        self.events.publish(FleetEvent::CommandUpdated {
            node_id: updated.node_id,
            command_id: updated.id,
            status: updated.status,
        });
        Ok(())
    }

    /// Relay reconnect-backoff diagnostics to dashboards.
    ///
    /// Deliberately unauthenticated: an agent in backoff may not hold a
    /// registered session yet, and the payload only drives a display.
    pub fn report_backoff(
        &self,
        node_id: Uuid,
        consecutive_failures: u32,
        next_retry_utc: chrono::DateTime<Utc>,
    ) {
        self.events.publish(FleetEvent::AgentBackoffStatus {
            node_id,
            consecutive_failures,
            next_retry_utc: Some(next_retry_utc),
        });
    }

    /// Relay a ping reply to dashboards. A successful reply also clears any
    /// backoff display for the node.
    pub fn ping_response(
        &self,
        node_id: Uuid,
        success: bool,
        next_retry_utc: Option<chrono::DateTime<Utc>>,
    ) {
        self.events.publish(FleetEvent::AgentPingResponse {
            node_id,
            success,
            next_retry_utc,
        });
        if success {
            self.events.publish(FleetEvent::AgentBackoffStatus {
                node_id,
                consecutive_failures: 0,
                next_retry_utc: None,
            });
        }
    }

    /// Tear down a closed connection's state. Safe to call for connections
    /// that never registered. Cleanup is session and registry removal only;
    /// the node's stored status is left as-is, since liveness decay belongs
    /// to the health monitor watching last-seen timestamps.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let _ = self.sessions.clear(connection_id).await;
        if let Some(node_id) = self.registry.remove_connection(connection_id).await {
            info!(%node_id, "agent disconnected");
        }
    }

    /// Push a command to the node's live connection.
    pub async fn execute_command_on_agent(
        &self,
        node_id: Uuid,
        command_id: Uuid,
        command_type: String,
        payload: serde_json::Value,
    ) -> Result<(), DeliveryError> {
        self.send_to_node(
            node_id,
            ServerFrame::ExecuteCommand {
                command_id,
                command_type,
                payload,
            },
        )
        .await
    }

    /// Ask the node's agent for an immediate heartbeat.
    pub async fn request_telemetry(&self, node_id: Uuid) -> Result<(), DeliveryError> {
        self.send_to_node(node_id, ServerFrame::RequestTelemetry).await
    }

    /// Ask the node's agent to confirm its link.
    pub async fn request_ping(&self, node_id: Uuid) -> Result<(), DeliveryError> {
        self.send_to_node(node_id, ServerFrame::RequestPing).await
    }

    async fn send_to_node(&self, node_id: Uuid, frame: ServerFrame) -> Result<(), DeliveryError> {
        let connection = self
            .registry
            .connection_for(node_id)
            .await
            .ok_or(DeliveryError::NoConnection)?;
        connection.outbound.try_send(frame).map_err(|err| match err {
            tokio::sync::mpsc::error::TrySendError::Closed(_) => DeliveryError::ChannelClosed,
            tokio::sync::mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
        })
    }

    async fn require_session(
        &self,
        connection_id: ConnectionId,
    ) -> Result<AgentIdentity, AgentCallError> {
        self.sessions
            .get(connection_id)
            .await
            .ok_or_else(|| AgentCallError::unauthorized("connection is not registered"))
    }

    async fn require_node(
        &self,
        connection_id: ConnectionId,
        claimed: Uuid,
    ) -> Result<AgentIdentity, AgentCallError> {
        let identity = self.require_session(connection_id).await?;
        if identity.node_id != claimed {
            warn!(
                bound = %identity.node_id,
                %claimed,
                "frame claims a node the connection is not bound to"
            );
            return Err(AgentCallError::unauthorized(
                "claimed node does not match this connection",
            ));
        }
        Ok(identity)
    }
}
