//! Shared application state injected into every handler.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use scriba_core::ModelManager;

use crate::auth::TokenStore;
use crate::capabilities::ClientType;
use crate::config::ServerConfig;

/// Cloned into each handler by axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<ModelManager>,
    pub tokens: Arc<TokenStore>,
    pub sessions: Arc<SessionTable>,
    /// Whether `HF_TOKEN` was present at startup (gates diarization).
    pub diarization_available: bool,
}

/// What the table records about each live session (observability only —
/// the session task owns the actual recorder and engine references).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub client_name: String,
    pub client_type: ClientType,
    #[serde(skip)]
    pub connected_at: SystemTime,
}

/// Lock-guarded map of live sessions keyed by session UUID.
#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<HashMap<Uuid, SessionInfo>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, info: SessionInfo) {
        self.inner.write().insert(id, info);
    }

    /// Idempotent; cleanup paths may race.
    pub fn remove(&self, id: Uuid) -> Option<SessionInfo> {
        self.inner.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(Uuid, SessionInfo)> {
        self.inner
            .read()
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }
}

/// Seconds since the unix epoch as a float — the protocol's timestamp unit.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> SessionInfo {
        SessionInfo {
            client_name: name.into(),
            client_type: ClientType::Web,
            connected_at: SystemTime::now(),
        }
    }

    #[test]
    fn table_add_remove_is_idempotent() {
        let table = SessionTable::new();
        let id = Uuid::new_v4();
        table.insert(id, info("alice"));
        assert_eq!(table.len(), 1);

        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_reflects_live_sessions() {
        let table = SessionTable::new();
        table.insert(Uuid::new_v4(), info("a"));
        table.insert(Uuid::new_v4(), info("b"));
        let mut names: Vec<String> = table
            .snapshot()
            .into_iter()
            .map(|(_, i)| i.client_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
