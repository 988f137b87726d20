//! Wire DTOs shared between the control-plane, agents, and dashboards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Node liveness as tracked by the control-plane (wire format uses lowercase).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node has a live agent connection or a recent heartbeat.
    Online,
    /// Node has not been heard from recently.
    Offline,
}

impl NodeStatus {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

/// Command lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Command created, not yet picked up by the agent.
    Queued,
    /// Agent acknowledged the command and is executing it.
    InProgress,
    /// Command finished successfully.
    Success,
    /// Command finished with an error.
    Failed,
}

impl CommandStatus {
    /// Returns the canonical snake_case representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::InProgress => "in_progress",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
        }
    }

    /// Terminal states are never re-opened by the control-plane.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Success | CommandStatus::Failed)
    }
}

/// Result of parsing a status string sent by an agent.
///
/// Parsing is total: a status the server does not recognize is a normal
/// control-flow branch, not an error, so newer agents are not disconnected
/// for speaking a newer vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCommandStatus {
    /// A status this server version understands.
    Known(CommandStatus),
    /// A status this server version does not understand.
    Unrecognized,
}

/// Parse a wire status string into the closed [`CommandStatus`] enum.
pub fn parse_command_status(raw: &str) -> ParsedCommandStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "queued" => ParsedCommandStatus::Known(CommandStatus::Queued),
        "in_progress" => ParsedCommandStatus::Known(CommandStatus::InProgress),
        "success" => ParsedCommandStatus::Known(CommandStatus::Success),
        "failed" => ParsedCommandStatus::Known(CommandStatus::Failed),
        _ => ParsedCommandStatus::Unrecognized,
    }
}

/// Identity metadata an agent reports when registering.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentMetadata {
    /// Hostname of the managed machine.
    pub hostname: String,
    /// IP address the agent reports for itself.
    #[serde(default)]
    pub ip: Option<String>,
    /// OS descriptor (e.g. "Ubuntu 24.04", "Windows 11").
    #[serde(default)]
    pub os: Option<String>,
    /// Version string of the agent binary.
    #[serde(default)]
    pub agent_version: Option<String>,
}

/// Point-in-time telemetry sample as sent by an agent.
///
/// RAM and disk figures arrive raw; the control-plane derives the stored
/// percentages. Everything under `extra` is opaque to the control-plane and
/// is stored untouched.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TelemetryReport {
    /// CPU utilization percentage as sampled on the host.
    #[serde(default)]
    pub cpu_percent: f64,
    /// RAM in use, megabytes.
    #[serde(default)]
    pub ram_used_mb: f64,
    /// Total RAM, megabytes. Zero or absent yields a stored RAM% of 0.
    #[serde(default)]
    pub ram_total_mb: f64,
    /// Used percentage per mount point.
    #[serde(default)]
    pub disk_usage: HashMap<String, f64>,
    /// Optional temperature reading, degrees Celsius.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Deeper sensor payloads (GPU/UPS/network); passed through to storage.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extra: Value,
}

/// Frames sent by an agent over its persistent connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Bind this connection to a durable node identity. The bearer
    /// credential travels in the connection handshake, not in the frame.
    Register {
        /// Node identity metadata.
        metadata: AgentMetadata,
    },
    /// Liveness plus a telemetry sample.
    Heartbeat {
        /// The node id the agent claims; must match the registered identity.
        node_id: Uuid,
        /// The telemetry sample.
        telemetry: TelemetryReport,
    },
    /// Progress report for a command previously dispatched to this node.
    CommandStatus {
        /// Command being reported on.
        command_id: Uuid,
        /// Status as text; unrecognized values are dropped server-side.
        status: String,
        /// Output lines to append to the command log.
        #[serde(default)]
        logs: Option<String>,
    },
    /// Reconnect-backoff diagnostics for dashboards. Display-only.
    BackoffStatus {
        /// Claimed node id.
        node_id: Uuid,
        /// Consecutive failed connection attempts.
        consecutive_failures: u32,
        /// When the agent will retry next.
        next_retry_utc: DateTime<Utc>,
    },
    /// Reply to a server ping request. Display-only.
    PingResponse {
        /// Claimed node id.
        node_id: Uuid,
        /// Whether the agent considers its link healthy.
        success: bool,
        /// When the agent will retry next, if it is backing off.
        #[serde(default)]
        next_retry_utc: Option<DateTime<Utc>>,
    },
}

/// Frames sent by the server to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Registration succeeded; the connection is now bound to this node.
    Registered {
        /// Durable node identity assigned to this connection.
        node_id: Uuid,
    },
    /// Run a command on the agent host.
    ExecuteCommand {
        /// Command identity to report progress against.
        command_id: Uuid,
        /// Type tag; the control-plane does not interpret it.
        command_type: String,
        /// Opaque command payload.
        payload: Value,
    },
    /// Ask the agent to send a fresh heartbeat immediately.
    RequestTelemetry,
    /// Ask the agent to confirm its link with a `PingResponse`.
    RequestPing,
    /// A call was rejected or malformed.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

/// Summary of a node record as exposed to dashboards and operators.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeSummary {
    /// Durable node identity.
    pub id: Uuid,
    /// Last reported hostname.
    pub hostname: String,
    /// Last reported IP address.
    pub ip: Option<String>,
    /// Last reported OS descriptor.
    pub os: Option<String>,
    /// Last reported agent version.
    pub agent_version: Option<String>,
    /// Liveness status.
    pub status: NodeStatus,
    /// Last time the node was heard from.
    pub last_seen: Option<DateTime<Utc>>,
    /// When the node was first registered.
    pub created_at: DateTime<Utc>,
}

/// Events fanned out to dashboard observers.
///
/// These are intentionally small: consumers pull fresh data when notified
/// rather than receiving it inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A node's liveness status changed value.
    NodeStatusChanged {
        /// Node whose status changed.
        node_id: Uuid,
        /// New status.
        status: NodeStatus,
        /// Last-seen timestamp at the time of the change.
        last_seen: Option<DateTime<Utc>>,
    },
    /// A node completed its first registration against a credential.
    NodeRegistered {
        /// The full node record.
        node: NodeSummary,
    },
    /// A telemetry snapshot was stored for this node. Payload-free.
    TelemetryReceived {
        /// Node the snapshot belongs to.
        node_id: Uuid,
    },
    /// A command changed status or accumulated output.
    CommandUpdated {
        /// Node that owns the command.
        node_id: Uuid,
        /// Command identity.
        command_id: Uuid,
        /// Status after the update.
        status: CommandStatus,
    },
    /// An agent reported reconnect-backoff state.
    AgentBackoffStatus {
        /// Claimed node id (display-only, not authenticated).
        node_id: Uuid,
        /// Consecutive failed attempts; zero clears the display.
        consecutive_failures: u32,
        /// Next retry time, if backing off.
        next_retry_utc: Option<DateTime<Utc>>,
    },
    /// An agent answered a ping request.
    AgentPingResponse {
        /// Claimed node id (display-only, not authenticated).
        node_id: Uuid,
        /// Whether the agent reported a healthy link.
        success: bool,
        /// Next retry time, if backing off.
        next_retry_utc: Option<DateTime<Utc>>,
    },
}

impl FleetEvent {
    /// Stable event name used for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::NodeStatusChanged { .. } => "node_status_changed",
            FleetEvent::NodeRegistered { .. } => "node_registered",
            FleetEvent::TelemetryReceived { .. } => "telemetry_received",
            FleetEvent::CommandUpdated { .. } => "command_updated",
            FleetEvent::AgentBackoffStatus { .. } => "agent_backoff_status",
            FleetEvent::AgentPingResponse { .. } => "agent_ping_response",
        }
    }
}

/// Request body for minting a single-use enrollment token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentTokenCreateRequest {
    /// Validity window in seconds; server default applies when absent.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Response for a freshly minted enrollment token.
///
/// The plaintext token is returned exactly once; only its digest is stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentTokenCreateResponse {
    /// The bearer credential to hand to the new agent out-of-band.
    pub token: String,
    /// When the token stops being usable.
    pub expires_at: DateTime<Utc>,
}

/// Request body for queueing a command against a node.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandCreateRequest {
    /// Type tag understood by the agent; opaque to the control-plane.
    pub command_type: String,
    /// Opaque payload forwarded verbatim to the agent.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Response after queueing a command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandCreateResponse {
    /// Identity of the stored command.
    pub command_id: Uuid,
    /// Whether the command was forwarded to a live agent connection.
    pub delivered: bool,
}

/// One live agent connection as seen by the connection registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// Node bound to the connection.
    pub node_id: Uuid,
    /// Opaque connection handle.
    pub connection_id: Uuid,
    /// Seconds since the connection claimed the node's slot.
    pub connected_secs: u64,
}

/// Health endpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always "ok" when the process is serving.
    pub status: String,
    /// Control-plane version.
    pub version: String,
}

/// Error payload returned by the operator API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_status_parse_is_total() {
        assert_eq!(
            parse_command_status("queued"),
            ParsedCommandStatus::Known(CommandStatus::Queued)
        );
        assert_eq!(
            parse_command_status("  In_Progress "),
            ParsedCommandStatus::Known(CommandStatus::InProgress)
        );
        assert_eq!(
            parse_command_status("SUCCESS"),
            ParsedCommandStatus::Known(CommandStatus::Success)
        );
        assert_eq!(
            parse_command_status("failed"),
            ParsedCommandStatus::Known(CommandStatus::Failed)
        );
        assert_eq!(
            parse_command_status("rebooting"),
            ParsedCommandStatus::Unrecognized
        );
        assert_eq!(parse_command_status(""), ParsedCommandStatus::Unrecognized);
    }

    #[test]
    fn terminal_statuses_are_marked() {
        assert!(CommandStatus::Success.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(!CommandStatus::Queued.is_terminal());
        assert!(!CommandStatus::InProgress.is_terminal());
    }

    #[test]
    fn agent_frames_round_trip_with_type_tag() {
        let frame = AgentFrame::CommandStatus {
            command_id: Uuid::new_v4(),
            status: "success".into(),
            logs: Some("done".into()),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "command_status");
        let back: AgentFrame = serde_json::from_value(json).unwrap();
        match back {
            AgentFrame::CommandStatus { status, logs, .. } => {
                assert_eq!(status, "success");
                assert_eq!(logs.as_deref(), Some("done"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn fleet_events_expose_stable_kinds() {
        let event = FleetEvent::TelemetryReceived {
            node_id: Uuid::new_v4(),
        };
        assert_eq!(event.kind(), "telemetry_received");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "telemetry_received");
    }

    #[test]
    fn telemetry_report_defaults_optional_fields() {
        let report: TelemetryReport = serde_json::from_str(r#"{"cpu_percent": 12.5}"#).unwrap();
        assert_eq!(report.cpu_percent, 12.5);
        assert_eq!(report.ram_total_mb, 0.0);
        assert!(report.disk_usage.is_empty());
        assert!(report.temperature.is_none());
        assert!(report.extra.is_null());
    }
}
