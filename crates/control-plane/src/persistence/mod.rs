//! The persistence boundary consumed by the control-plane.
//!
//! The core treats storage through the [`FleetRepository`] contract only;
//! storage mechanics live behind it. [`memory`] provides the adapter used
//! by the default runtime and the test suite.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::Result;
use common::api::{CommandStatus, NodeStatus, NodeSummary};

pub mod memory;

/// A managed machine's durable record.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: Uuid,
    pub hostname: String,
    pub ip: Option<String>,
    pub os: Option<String>,
    pub agent_version: Option<String>,
    /// Join key binding the node to a credential. At most one node owns a
    /// given non-null digest.
    pub credential_digest: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id,
            hostname: self.hostname.clone(),
            ip: self.ip.clone(),
            os: self.os.clone(),
            agent_version: self.agent_version.clone(),
            status: self.status,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }
}

/// A node to create on first registration against an enrollment token.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub id: Uuid,
    pub hostname: String,
    pub ip: Option<String>,
    pub os: Option<String>,
    pub agent_version: Option<String>,
    pub credential_digest: String,
    pub last_seen: DateTime<Utc>,
    pub status: NodeStatus,
}

/// Mutable fields refreshed on every successful registration.
#[derive(Debug, Clone)]
pub struct NodeRegistrationUpdate {
    pub hostname: String,
    pub ip: Option<String>,
    pub os: Option<String>,
    pub agent_version: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub status: NodeStatus,
}

/// A pre-issued, single-use, time-boxed enrollment credential.
#[derive(Debug, Clone)]
pub struct EnrollmentTokenRecord {
    pub id: Uuid,
    pub credential_digest: String,
    pub expires_at: DateTime<Utc>,
    /// Null until the token is spent; consumption is a one-way transition.
    pub consumed_at: Option<DateTime<Utc>>,
    /// The node the token created, once spent.
    pub node_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentTokenRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && now < self.expires_at
    }
}

/// A unit of work queued for a specific node.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: Uuid,
    pub node_id: Uuid,
    pub command_type: String,
    pub payload: Value,
    pub status: CommandStatus,
    /// Append-only, newline-joined output accumulated from the agent.
    pub output_log: String,
    /// Set exactly once, when the command reaches a terminal status.
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A command to store in `Queued` state.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub id: Uuid,
    pub node_id: Uuid,
    pub command_type: String,
    pub payload: Value,
}

/// A read-modify-write delta computed by the control-plane for one
/// `UpdateCommandStatus` call.
#[derive(Debug, Clone, Default)]
pub struct CommandUpdate {
    /// New status; `None` keeps the stored status (terminal commands).
    pub status: Option<CommandStatus>,
    /// Output lines to append, newline-joined onto the stored log.
    pub append_log: Option<String>,
    /// Execution stamp, set when the update drives the command terminal.
    pub executed_at: Option<DateTime<Utc>>,
}

/// An immutable point-in-time telemetry sample with derived ratios.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub node_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub temperature: Option<f64>,
    /// Deeper sensor payloads stored untouched.
    pub raw: Value,
}

/// Storage contract the control-plane consumes.
///
/// Implementations own their consistency; in particular
/// [`consume_enrollment_token`](FleetRepository::consume_enrollment_token)
/// must be one atomic conditional write so that racing registrations spend
/// a token exactly once.
#[async_trait]
pub trait FleetRepository: Send + Sync {
    /// Look up the node bound to a credential digest.
    async fn find_node_by_digest(&self, digest: &str) -> Result<Option<NodeRecord>>;

    /// Fetch one node record.
    async fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>>;

    /// All node records, oldest first.
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Refresh a node's mutable registration fields, returning the updated
    /// record. Fails if the node does not exist.
    async fn apply_registration(
        &self,
        node_id: Uuid,
        update: NodeRegistrationUpdate,
    ) -> Result<NodeRecord>;

    /// Lightweight liveness bump that does not load the full record.
    /// Returns false when the node is unknown.
    async fn touch_liveness(
        &self,
        node_id: Uuid,
        last_seen: DateTime<Utc>,
        status: NodeStatus,
    ) -> Result<bool>;

    /// Atomically spend an unconsumed, unexpired token matching `digest`
    /// and create (or bind, via the legacy hostname path) the node for it.
    /// Returns `None` when no usable token matches (including the loser of
    /// a race on the same token).
    async fn consume_enrollment_token(
        &self,
        digest: &str,
        node: NewNode,
    ) -> Result<Option<NodeRecord>>;

    /// Store a freshly minted enrollment token.
    async fn insert_enrollment_token(&self, token: EnrollmentTokenRecord) -> Result<()>;

    /// Fetch one command.
    async fn get_command(&self, id: Uuid) -> Result<Option<CommandRecord>>;

    /// Store a command in `Queued` state.
    async fn create_command(&self, command: NewCommand) -> Result<CommandRecord>;

    /// Apply a status/log delta, returning the updated record or `None`
    /// when the command vanished concurrently.
    async fn update_command(&self, id: Uuid, update: CommandUpdate)
        -> Result<Option<CommandRecord>>;

    /// Store one telemetry snapshot.
    async fn insert_snapshot(&self, snapshot: TelemetrySnapshot) -> Result<()>;
}

/// Shared handle to the repository implementation in use.
pub type FleetRepositoryRef = Arc<dyn FleetRepository>;
