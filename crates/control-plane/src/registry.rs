use std::{collections::HashMap, sync::Arc, time::Instant};

use common::api::{ConnectionInfo, ServerFrame};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Opaque handle for one live transport connection.
pub type ConnectionId = Uuid;

/// One live agent connection: the handle plus the outbound channel used to
/// address server-initiated calls to the agent.
#[derive(Clone)]
pub struct AgentConnection {
    pub connection_id: ConnectionId,
    pub outbound: mpsc::Sender<ServerFrame>,
}

impl AgentConnection {
    pub fn new(outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            outbound,
        }
    }
}

struct BoundConnection {
    connection: AgentConnection,
    bound_at: Instant,
}

#[derive(Default)]
struct RegistryInner {
    by_node: HashMap<Uuid, BoundConnection>,
    by_connection: HashMap<ConnectionId, Uuid>,
}

/// In-memory bidirectional map from durable node identity to the single
/// most-recent live connection, and back.
///
/// A node owns at most one current connection; binding a newer connection
/// silently supersedes the previous one (last writer wins, covering the
/// agent that reconnects before its old connection's disconnect has been
/// processed). Critical sections are map operations only; no I/O happens
/// under the lock.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `node_id` to `connection`, superseding any prior binding for the
    /// node and any prior node this connection was bound to.
    pub async fn bind(&self, node_id: Uuid, connection: AgentConnection) {
        let mut guard = self.inner.write().await;

        // A connection that re-registers under a different credential must
        // not keep its old node slot.
        if let Some(previous_node) = guard.by_connection.remove(&connection.connection_id) {
            if previous_node != node_id {
                guard.by_node.remove(&previous_node);
            }
        }

        if let Some(stale) = guard.by_node.insert(
            node_id,
            BoundConnection {
                connection: connection.clone(),
                bound_at: Instant::now(),
            },
        ) {
            if stale.connection.connection_id != connection.connection_id {
                guard
                    .by_connection
                    .remove(&stale.connection.connection_id);
                counter!("control_plane_agent_sessions_superseded_total").increment(1);
            }
        }
        guard
            .by_connection
            .insert(connection.connection_id, node_id);
        gauge!("control_plane_agent_sessions").set(guard.by_node.len() as f64);
    }

    /// Remove the binding owned by `connection_id`, returning the node it
    /// was bound to. A connection that was already superseded removes
    /// nothing: the node's slot belongs to the newer connection.
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let mut guard = self.inner.write().await;
        let node_id = guard.by_connection.remove(&connection_id)?;
        let still_current = guard
            .by_node
            .get(&node_id)
            .map(|bound| bound.connection.connection_id == connection_id)
            .unwrap_or(false);
        if still_current {
            guard.by_node.remove(&node_id);
        }
        gauge!("control_plane_agent_sessions").set(guard.by_node.len() as f64);
        Some(node_id)
    }

    /// Resolve the current connection for a node, if any.
    pub async fn connection_for(&self, node_id: Uuid) -> Option<AgentConnection> {
        let guard = self.inner.read().await;
        guard
            .by_node
            .get(&node_id)
            .map(|bound| bound.connection.clone())
    }

    pub async fn contains(&self, node_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard.by_node.contains_key(&node_id)
    }

    /// Snapshot of all live bindings for the operator API.
    pub async fn snapshot(&self) -> Vec<ConnectionInfo> {
        let now = Instant::now();
        let guard = self.inner.read().await;
        guard
            .by_node
            .iter()
            .map(|(node_id, bound)| ConnectionInfo {
                node_id: *node_id,
                connection_id: bound.connection.connection_id,
                connected_secs: now.saturating_duration_since(bound.bound_at).as_secs(),
            })
            .collect()
    }
}
