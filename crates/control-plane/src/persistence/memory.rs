//! In-memory [`FleetRepository`] adapter.
//!
//! One mutex guards all tables, which is what makes the token
//! consume-and-create step a single atomic unit. Critical sections are
//! map operations only.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CommandRecord, CommandUpdate, EnrollmentTokenRecord, FleetRepository, NewCommand, NewNode,
    NodeRecord, NodeRegistrationUpdate, TelemetrySnapshot,
};
use crate::credentials::digests_match;
use crate::Result;
use common::api::{CommandStatus, NodeStatus};

#[derive(Default)]
struct Tables {
    nodes: HashMap<Uuid, NodeRecord>,
    tokens: HashMap<Uuid, EnrollmentTokenRecord>,
    commands: HashMap<Uuid, CommandRecord>,
    snapshots: Vec<TelemetrySnapshot>,
}

/// Repository adapter backed by process memory.
#[derive(Default)]
pub struct InMemoryFleetRepository {
    tables: Mutex<Tables>,
}

impl InMemoryFleetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots; test and diagnostics helper.
    pub async fn snapshot_count(&self) -> usize {
        self.tables.lock().await.snapshots.len()
    }

    /// Most recent snapshot for a node; test and diagnostics helper.
    pub async fn latest_snapshot(&self, node_id: Uuid) -> Option<TelemetrySnapshot> {
        let tables = self.tables.lock().await;
        tables
            .snapshots
            .iter()
            .rev()
            .find(|snapshot| snapshot.node_id == node_id)
            .cloned()
    }

    /// Fetch a token record; test and diagnostics helper.
    pub async fn get_enrollment_token(&self, id: Uuid) -> Option<EnrollmentTokenRecord> {
        self.tables.lock().await.tokens.get(&id).cloned()
    }
}

#[async_trait]
impl FleetRepository for InMemoryFleetRepository {
    async fn find_node_by_digest(&self, digest: &str) -> Result<Option<NodeRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .nodes
            .values()
            .find(|node| {
                node.credential_digest
                    .as_deref()
                    .is_some_and(|stored| digests_match(stored, digest))
            })
            .cloned())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.nodes.get(&id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let tables = self.tables.lock().await;
        let mut nodes: Vec<NodeRecord> = tables.nodes.values().cloned().collect();
        nodes.sort_by_key(|node| node.created_at);
        Ok(nodes)
    }

    async fn apply_registration(
        &self,
        node_id: Uuid,
        update: NodeRegistrationUpdate,
    ) -> Result<NodeRecord> {
        let mut tables = self.tables.lock().await;
        let node = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| anyhow::anyhow!("node {node_id} not found"))?;
        node.hostname = update.hostname;
        node.ip = update.ip;
        node.os = update.os;
        node.agent_version = update.agent_version;
        node.last_seen = Some(update.last_seen);
        node.status = update.status;
        Ok(node.clone())
    }

    async fn touch_liveness(
        &self,
        node_id: Uuid,
        last_seen: DateTime<Utc>,
        status: NodeStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.nodes.get_mut(&node_id) {
            Some(node) => {
                node.last_seen = Some(last_seen);
                node.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_enrollment_token(
        &self,
        digest: &str,
        node: NewNode,
    ) -> Result<Option<NodeRecord>> {
        let now = Utc::now();
        let mut tables = self.tables.lock().await;

        let token_id = match tables
            .tokens
            .values()
            .find(|token| digests_match(&token.credential_digest, digest) && token.is_usable(now))
            .map(|token| token.id)
        {
            Some(id) => id,
            None => return Ok(None),
        };

        // Legacy first-registration path: a node already known by hostname
        // but not yet bound to any credential claims this digest instead of
        // duplicating the machine.
        let existing_id = tables
            .nodes
            .values()
            .find(|candidate| {
                candidate.credential_digest.is_none() && candidate.hostname == node.hostname
            })
            .map(|candidate| candidate.id);

        let record = match existing_id {
            Some(id) => {
                let existing = tables.nodes.get_mut(&id).expect("node id just resolved");
                existing.ip = node.ip;
                existing.os = node.os;
                existing.agent_version = node.agent_version;
                existing.credential_digest = Some(digest.to_string());
                existing.last_seen = Some(node.last_seen);
                existing.status = node.status;
                existing.clone()
            }
            None => {
                let record = NodeRecord {
                    id: node.id,
                    hostname: node.hostname,
                    ip: node.ip,
                    os: node.os,
                    agent_version: node.agent_version,
                    credential_digest: Some(digest.to_string()),
                    last_seen: Some(node.last_seen),
                    status: node.status,
                    created_at: now,
                };
                tables.nodes.insert(record.id, record.clone());
                record
            }
        };

        let token = tables.tokens.get_mut(&token_id).expect("token id resolved");
        token.consumed_at = Some(now);
        token.node_id = Some(record.id);

        Ok(Some(record))
    }

    async fn insert_enrollment_token(&self, token: EnrollmentTokenRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.tokens.insert(token.id, token);
        Ok(())
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<CommandRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.commands.get(&id).cloned())
    }

    async fn create_command(&self, command: NewCommand) -> Result<CommandRecord> {
        let record = CommandRecord {
            id: command.id,
            node_id: command.node_id,
            command_type: command.command_type,
            payload: command.payload,
            status: CommandStatus::Queued,
            output_log: String::new(),
            executed_at: None,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.lock().await;
        tables.commands.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_command(
        &self,
        id: Uuid,
        update: CommandUpdate,
    ) -> Result<Option<CommandRecord>> {
        let mut tables = self.tables.lock().await;
        let Some(command) = tables.commands.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(status) = update.status {
            command.status = status;
        }
        if let Some(lines) = update.append_log {
            if command.output_log.is_empty() {
                command.output_log = lines;
            } else {
                command.output_log.push('\n');
                command.output_log.push_str(&lines);
            }
        }
        if update.executed_at.is_some() && command.executed_at.is_none() {
            command.executed_at = update.executed_at;
        }
        Ok(Some(command.clone()))
    }

    async fn insert_snapshot(&self, snapshot: TelemetrySnapshot) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.snapshots.push(snapshot);
        Ok(())
    }
}
