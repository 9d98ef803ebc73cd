//! Turn submission.
//!
//! [`ChatController`] sequences one question: it records the user turn,
//! forwards the text to the remote conversation with the fixed generation and
//! safety configuration, and records the answer. A failed exchange leaves the
//! question unanswered in history; it is never papered over with a synthetic
//! bot turn.

use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::session::{ConversationSession, ConversationTurn, SessionStore};
use crate::vertex::{Citation, GenerationConfig, SafetySetting};

/// A recorded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    /// Concatenation of `fragments`; this is what history stores.
    pub text: String,
    /// Reply fragments in service order.
    pub fragments: Vec<String>,
    pub citations: Vec<Citation>,
}

/// Reject empty or whitespace-only questions.
pub fn validate_input(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ChatError::InvalidInput("message cannot be empty".to_string()));
    }
    Ok(())
}

/// Drives question/answer turns against sessions.
#[derive(Debug, Clone)]
pub struct ChatController {
    sessions: SessionStore,
    generation: GenerationConfig,
    safety: Vec<SafetySetting>,
}

impl ChatController {
    /// Controller with the fixed generation config and permissive safety.
    pub fn new(sessions: SessionStore) -> Self {
        Self {
            sessions,
            generation: GenerationConfig::default(),
            safety: SafetySetting::permissive(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    pub fn safety(&self) -> &[SafetySetting] {
        &self.safety
    }

    /// Look up or create the session for `session_id`, minting an id when
    /// the client has none.
    pub async fn open(&self, session_id: Option<&str>) -> Result<Arc<ConversationSession>> {
        match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.sessions.get_or_create(id).await,
            None => self.sessions.get_or_create(&SessionStore::new_id()).await,
        }
    }

    /// Submit one question and wait for the complete answer.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidInput`] for empty text (nothing is recorded)
    /// - [`ChatError::RemoteCall`] when the exchange fails
    /// - [`ChatError::EmptyReply`] when the service returns no text
    ///
    /// In the latter two cases the user turn stays in history unanswered.
    pub async fn submit(&self, session: &ConversationSession, user_text: &str) -> Result<BotReply> {
        validate_input(user_text)?;

        let mut state = session.lock().await;
        state.push(ConversationTurn::user(user_text));

        tracing::info!(
            session_id = %session.id(),
            message_length = user_text.len(),
            turns = state.history().len(),
            "Submitting question"
        );
        tracing::trace!(session_id = %session.id(), message = %user_text, "Question text");

        let reply = match state
            .remote()
            .send_message(user_text, &self.generation, &self.safety)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "Remote call failed");
                return Err(match e {
                    err @ ChatError::RemoteCall(_) => err,
                    other => ChatError::RemoteCall(other.to_string()),
                });
            }
        };

        let text = reply.text();
        if text.trim().is_empty() {
            tracing::warn!(
                session_id = %session.id(),
                fragments = reply.fragments.len(),
                "Model returned an empty reply"
            );
            return Err(ChatError::EmptyReply);
        }

        state.push(ConversationTurn::bot(text.clone()));

        tracing::info!(
            session_id = %session.id(),
            reply_length = text.len(),
            fragments = reply.fragments.len(),
            citations = reply.citations.len(),
            "Answer recorded"
        );

        Ok(BotReply {
            text,
            fragments: reply.fragments,
            citations: reply.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input() {
        assert!(validate_input("What is the Mahamantra?").is_ok());
        assert!(matches!(validate_input(""), Err(ChatError::InvalidInput(_))));
        assert!(matches!(
            validate_input(" \n\t"),
            Err(ChatError::InvalidInput(_))
        ));
    }
}
