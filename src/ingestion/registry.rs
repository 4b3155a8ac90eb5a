//! Registry of connected agents, grounded in the teacher's `server::agent_state` module: one
//! entry per live connection holding a write-back channel the rest of the core (config pushes,
//! forced disconnects) can use without touching the socket directly.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::model::ServerId;

use super::protocol::ServerFrame;

pub struct AgentConnection {
    pub tx: mpsc::Sender<ServerFrame>,
}

#[derive(Default)]
pub struct AgentRegistry {
    connections: DashMap<ServerId, AgentConnection>,
}

pub type AgentRegistryHandle = Arc<AgentRegistry>;

impl AgentRegistry {
    pub fn new() -> AgentRegistryHandle {
        Arc::new(Self::default())
    }

    pub fn register(&self, server_id: ServerId, tx: mpsc::Sender<ServerFrame>) {
        self.connections.insert(server_id, AgentConnection { tx });
    }

    /// Removes the entry only if it still belongs to the connection calling this (guarded by
    /// comparing the sender, so a stale disconnect task can't evict a newer reconnect).
    pub fn deregister(&self, server_id: &str, tx: &mpsc::Sender<ServerFrame>) {
        if let Some(entry) = self.connections.get(server_id) {
            if !entry.tx.same_channel(tx) {
                return;
            }
        } else {
            return;
        }
        self.connections.remove(server_id);
    }

    pub async fn push_config(&self, server_id: &str, frame: ServerFrame) -> bool {
        let Some(entry) = self.connections.get(server_id) else {
            return false;
        };
        entry.tx.send(frame).await.is_ok()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, server_id: &str) -> bool {
        self.connections.contains_key(server_id)
    }
}
