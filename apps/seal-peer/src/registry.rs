//! Table of sessions currently held open by the peer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use shared_protocol::{AeadSuite, Curve, SessionId};

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub remote: Option<SocketAddr>,
    pub carrier: &'static str,
    pub curve: Curve,
    pub suite: AeadSuite,
    pub opened_at: SystemTime,
    pub records: u64,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SessionId, entry: SessionEntry) {
        self.sessions.insert(id, entry);
    }

    pub fn record_echoed(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.records += 1;
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
