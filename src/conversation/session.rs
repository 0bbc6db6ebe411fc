//! Per-session state and the in-memory session store

use super::state::State;
use super::uploads::TempUpload;
use crate::config::SessionsConfig;
use crate::context::Message;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Language replies are localized into until the model reports another
pub const DEFAULT_LANGUAGE: &str = "en";

/// Image and mask collected by the edit flow
#[derive(Debug, Default)]
pub struct PendingEdit {
    pub image: Option<TempUpload>,
    pub mask: Option<TempUpload>,
}

/// One user's conversation
#[derive(Debug)]
pub struct Session {
    id: String,
    pub username: Option<String>,
    pub state: State,
    /// Committed dialogue, oldest first
    pub dialogue: Vec<Message>,
    pub language: String,
    pub pending: PendingEdit,
    created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: None,
            state: State::default(),
            dialogue: Vec::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            pending: PendingEdit::default(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name to log the session under
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.id)
    }

    /// Forget the dialogue, pending uploads and detected language
    ///
    /// Dropping the pending uploads deletes their files.
    pub fn clear(&mut self) {
        self.dialogue.clear();
        self.pending = PendingEdit::default();
        self.language = DEFAULT_LANGUAGE.to_string();
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state,
            language: self.language.clone(),
            history_len: self.dialogue.len(),
            has_pending_image: self.pending.image.is_some(),
            has_pending_mask: self.pending.mask.is_some(),
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }
}

/// Read-only view of a session for the API
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: State,
    pub language: String,
    pub history_len: usize,
    pub has_pending_image: bool,
    pub has_pending_mask: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Sessions keyed by id, dropped after sitting idle
///
/// Each session sits behind its own async mutex; whoever handles an event
/// holds it for the whole event, so events of one session never overlap
/// while different sessions proceed concurrently. Evicting a session drops
/// its dialogue and deletes its pending uploads.
pub struct SessionStore {
    sessions: Cache<String, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, max_sessions: u64) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_sessions)
            .time_to_idle(idle_timeout)
            .eviction_listener(|id: Arc<String>, _session, cause: RemovalCause| {
                if cause.was_evicted() {
                    debug!("Session {} evicted ({:?})", id, cause);
                }
            })
            .build();
        Self { sessions }
    }

    pub fn from_config(config: &SessionsConfig) -> Self {
        Self::new(config.idle_timeout(), config.max_sessions)
    }

    /// Fetch a session, creating it on first access
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        let session = self
            .sessions
            .get_with(id.to_string(), async { Arc::new(Mutex::new(Session::new(id))) })
            .await;
        self.report();
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).await
    }

    /// Drop a session and everything it holds
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).await.is_some();
        self.report();
        removed
    }

    /// Apply pending evictions and refresh the session gauge
    pub async fn sweep(&self) {
        self.sessions.run_pending_tasks().await;
        self.report();
    }

    /// Approximate until [`SessionStore::sweep`] has run
    pub fn entry_count(&self) -> u64 {
        self.sessions.entry_count()
    }

    fn report(&self) {
        METRICS.active_sessions.set(self.sessions.entry_count() as i64);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}
