//! Per-session state and the in-memory store that keeps it between requests.
//!
//! Each request loads a snapshot, hands it to the dispatcher by `&mut`, and
//! saves it back. Two concurrent requests on one session race and the last
//! save wins. Sessions idle for longer than the store's TTL are evicted on
//! save.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::conversation::ConversationHistory;
use crate::data_registry::TableStore;
use crate::models::{AnswerView, FileKind, UploadedFile};

pub const SESSION_COOKIE: &str = "tabrick_session";

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub loaded_files: BTreeMap<String, UploadedFile>,
    pub csv_files: TableStore,
    pub conversation_history: ConversationHistory,
    pub last_answer: Option<AnswerView>,
}

impl SessionState {
    pub fn files_of_kind(&self, kind: FileKind) -> Vec<String> {
        self.loaded_files
            .values()
            .filter(|f| f.kind == kind)
            .map(|f| f.name.clone())
            .collect()
    }
}

struct StoredSession {
    state: SessionState,
    last_seen: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, StoredSession>>>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    /// Snapshot of the session `id`, or a fresh session with a new id when
    /// `id` is missing, unknown or expired. The flag is true for fresh
    /// sessions, which are not stored until they are saved.
    pub async fn load(&self, id: Option<Uuid>) -> (Uuid, SessionState, bool) {
        self.load_at(id, Utc::now()).await
    }

    async fn load_at(&self, id: Option<Uuid>, now: DateTime<Utc>) -> (Uuid, SessionState, bool) {
        if let Some(id) = id {
            if let Some(stored) = self.inner.read().await.get(&id) {
                if now - stored.last_seen <= self.idle_ttl {
                    return (id, stored.state.clone(), false);
                }
            }
        }
        (Uuid::new_v4(), SessionState::default(), true)
    }

    pub async fn save(&self, id: Uuid, state: SessionState) {
        self.save_at(id, state, Utc::now()).await
    }

    async fn save_at(&self, id: Uuid, state: SessionState, now: DateTime<Utc>) {
        let mut sessions = self.inner.write().await;
        sessions.insert(id, StoredSession { state, last_seen: now });

        let before = sessions.len();
        sessions.retain(|_, stored| now - stored.last_seen <= self.idle_ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Session id from the request's `Cookie` headers
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(id: Uuid) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}
