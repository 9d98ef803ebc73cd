//! Conversation turns and the per-session state they live in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::vertex::RemoteConversation;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Bot,
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Bot, content)
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// How much local history a session keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRetention {
    /// Maximum number of turns kept; `None` keeps everything.
    pub max_turns: Option<usize>,
}

impl HistoryRetention {
    pub fn unbounded() -> Self {
        Self { max_turns: None }
    }

    pub fn capped(max_turns: usize) -> Self {
        Self {
            max_turns: Some(max_turns),
        }
    }

    /// Drop the oldest turns until the cap holds, never leaving a bot turn
    /// at the front without the question it answered.
    fn apply(self, history: &mut Vec<ConversationTurn>) -> usize {
        let Some(max) = self.max_turns else {
            return 0;
        };
        let max = max.max(2);
        if history.len() <= max {
            return 0;
        }

        let mut cut = history.len() - max;
        while history.get(cut).is_some_and(|t| t.role == TurnRole::Bot) {
            cut += 1;
        }
        history.drain(..cut);
        cut
    }
}

/// A single user session: local history plus the remote conversation.
///
/// All mutation goes through [`ConversationSession::lock`], which serializes
/// submissions for this session.
pub struct ConversationSession {
    id: String,
    created_at: DateTime<Utc>,
    retention: HistoryRetention,
    state: Mutex<SessionState>,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

/// Mutable session state, reachable only while the session lock is held.
pub struct SessionState {
    history: Vec<ConversationTurn>,
    remote: Box<dyn RemoteConversation>,
    last_activity: DateTime<Utc>,
    retention: HistoryRetention,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("turns", &self.history.len())
            .field("remote", &self.remote.handle())
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

impl SessionState {
    /// Turns in chronological order.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Append a turn, applying the retention policy after bot turns.
    pub fn push(&mut self, turn: ConversationTurn) {
        let is_bot = turn.role == TurnRole::Bot;
        self.history.push(turn);
        self.last_activity = Utc::now();
        if is_bot {
            let dropped = self.retention.apply(&mut self.history);
            if dropped > 0 {
                tracing::debug!(dropped, kept = self.history.len(), "History trimmed");
            }
        }
    }

    /// The remote conversation handle.
    pub fn remote(&mut self) -> &mut dyn RemoteConversation {
        self.remote.as_mut()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }
}

impl ConversationSession {
    /// Wrap a freshly opened remote conversation.
    pub fn new(
        id: impl Into<String>,
        remote: Box<dyn RemoteConversation>,
        retention: HistoryRetention,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            retention,
            state: Mutex::new(SessionState {
                history: Vec::new(),
                remote,
                last_activity: now,
                retention,
            }),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquire exclusive access to history and the remote handle.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Snapshot of the history.
    ///
    /// Takes the session lock, so it waits until an in-flight submission on
    /// this session has its answer (or its error).
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.lock().await.history.clone()
    }

    /// Number of turns in the history. Waits on the session lock like
    /// [`Self::history`].
    pub async fn turn_count(&self) -> usize {
        self.lock().await.history.len()
    }

    /// Identifier of the remote conversation.
    pub async fn remote_handle(&self) -> String {
        self.lock().await.remote.handle().to_string()
    }
}
