//! Session lookup and lazy initialization.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::credentials::CredentialProvisioner;
use crate::error::Result;
use crate::vertex::ModelBackend;

use super::thread::{ConversationSession, HistoryRetention};

type SessionSlot = Arc<OnceCell<Arc<ConversationSession>>>;

/// Thread-safe store for sessions.
///
/// A session is created on first access for its identifier and lives until
/// it is removed; there is no eviction.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    sessions: RwLock<HashMap<String, SessionSlot>>,
    provisioner: Arc<CredentialProvisioner>,
    backend: Arc<dyn ModelBackend>,
    retention: HistoryRetention,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("provisioner", &self.inner.provisioner)
            .field("retention", &self.inner.retention)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a new session store.
    pub fn new(
        provisioner: Arc<CredentialProvisioner>,
        backend: Arc<dyn ModelBackend>,
        retention: HistoryRetention,
    ) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                provisioner,
                backend,
                retention,
            }),
        }
    }

    /// Generate a fresh session identifier.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Return the session for `id`, initializing it on first access.
    ///
    /// Initialization provisions credentials (once per process) and opens a
    /// remote conversation. Concurrent callers for the same id share one
    /// attempt. On failure nothing is memoized and the next call retries; a
    /// failed slot is dropped from the map only when no other caller is still
    /// waiting on it, since that caller inherits the next attempt.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<ConversationSession>> {
        let slot = {
            let mut guard = self
                .inner
                .sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(guard.entry(id.to_string()).or_default())
        };

        let result = slot.get_or_try_init(|| self.initialize(id)).await.cloned();

        if result.is_err() {
            let mut guard = self
                .inner
                .sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // One reference in the map, one here: nobody else is waiting.
            if guard.get(id).is_some_and(|s| {
                Arc::ptr_eq(s, &slot) && !s.initialized() && Arc::strong_count(s) == 2
            }) {
                guard.remove(id);
            }
        }

        result
    }

    async fn initialize(&self, id: &str) -> Result<Arc<ConversationSession>> {
        let credentials = self.inner.provisioner.provision().await?;
        let remote = self.inner.backend.start_chat(credentials).await?;

        tracing::info!(
            name: "session.created",
            session_id = %id,
            remote_handle = %remote.handle(),
            "Session initialized"
        );

        Ok(Arc::new(ConversationSession::new(
            id,
            remote,
            self.inner.retention,
        )))
    }

    /// Get an initialized session by ID.
    pub fn get(&self, id: &str) -> Option<Arc<ConversationSession>> {
        let guard = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get(id).and_then(|slot| slot.get().cloned())
    }

    /// End a session. Its remote handle is released with it.
    pub fn remove(&self, id: &str) -> Option<Arc<ConversationSession>> {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = guard.remove(id).and_then(|slot| slot.get().cloned());
        if removed.is_some() {
            tracing::info!(name: "session.removed", session_id = %id, "Session ended");
        }
        removed
    }

    /// Get the number of initialized sessions.
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Check if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List initialized session IDs.
    pub fn list_ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The credential provisioner shared by all sessions.
    pub fn provisioner(&self) -> &Arc<CredentialProvisioner> {
        &self.inner.provisioner
    }
}
