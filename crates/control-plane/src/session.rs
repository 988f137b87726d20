use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::registry::ConnectionId;

/// Identity a connection proved during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub node_id: Uuid,
    pub credential_digest: String,
}

/// Connection-indexed store of proven identities, owned by the control
/// plane rather than attached to the transport's connection object.
///
/// An entry exists exactly for the window between a successful `Register`
/// and the connection's disconnect; the transport layer clears it on close.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<RwLock<HashMap<ConnectionId, AgentIdentity>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, connection_id: ConnectionId, identity: AgentIdentity) {
        let mut guard = self.inner.write().await;
        guard.insert(connection_id, identity);
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<AgentIdentity> {
        let guard = self.inner.read().await;
        guard.get(&connection_id).cloned()
    }

    pub async fn clear(&self, connection_id: ConnectionId) -> Option<AgentIdentity> {
        let mut guard = self.inner.write().await;
        guard.remove(&connection_id)
    }
}
