//! Scripted model backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use god_chatbot::chat::ChatController;
use god_chatbot::credentials::{CredentialProvisioner, CredentialSettings, ProvisionedCredentials};
use god_chatbot::error::{ChatError, Result};
use god_chatbot::session::{HistoryRetention, SessionStore};
use god_chatbot::vertex::{
    GenerationConfig, ModelBackend, ModelReply, RemoteConversation, SafetySetting,
};

/// What the stub answers to the next message.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Vec<String>),
    Fail(String),
}

impl Step {
    pub fn reply(fragments: &[&str]) -> Self {
        Self::Reply(fragments.iter().map(ToString::to_string).collect())
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }
}

/// Backend whose conversations answer from a shared script.
///
/// When the script runs dry every message is answered with a single
/// fragment echoing the question.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
    started: AtomicUsize,
    start_failures: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(steps: Vec<Step>) -> Arc<Self> {
        let backend = Self::default();
        backend
            .script
            .lock()
            .expect("script lock")
            .extend(steps);
        Arc::new(backend)
    }

    /// Make the next `n` calls to `start_chat` fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.start_failures.store(n, Ordering::SeqCst);
    }

    pub fn push(&self, step: Step) {
        self.script.lock().expect("script lock").push_back(step);
    }

    /// Number of remote conversations opened.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Every message forwarded to the service, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    async fn start_chat(
        &self,
        credentials: Arc<ProvisionedCredentials>,
    ) -> Result<Box<dyn RemoteConversation>> {
        assert!(credentials.path().exists(), "credentials must be on disk");

        // Give concurrent callers a chance to pile up on the same slot.
        tokio::task::yield_now().await;

        let pending = self.start_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.start_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ChatError::SessionInit("quota exceeded".to_string()));
        }

        let n = self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConversation {
            handle: format!("stub-chat-{n}"),
            script: Arc::clone(&self.script),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedConversation {
    handle: String,
    script: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl RemoteConversation for ScriptedConversation {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn send_message(
        &mut self,
        text: &str,
        generation: &GenerationConfig,
        safety: &[SafetySetting],
    ) -> Result<ModelReply> {
        assert_eq!(generation.max_output_tokens, 8192);
        assert_eq!(safety.len(), 4);

        self.sent.lock().expect("sent lock").push(text.to_string());
        // Let a competing submission run while this one is in flight.
        tokio::task::yield_now().await;
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(Step::Reply(fragments)) => Ok(ModelReply::from_fragments(fragments)),
            Some(Step::Fail(message)) => Err(ChatError::RemoteCall(message)),
            None => Ok(ModelReply::from_fragments([format!("You asked: {text}")])),
        }
    }
}

/// Base64 of a minimal credential document.
pub fn encoded_credentials() -> String {
    STANDARD.encode(br#"{"type":"service_account","project_id":"god-chatbot-test"}"#)
}

pub fn provisioner() -> Arc<CredentialProvisioner> {
    Arc::new(CredentialProvisioner::new(
        Some(encoded_credentials()),
        CredentialSettings::default(),
    ))
}

pub fn store(backend: Arc<ScriptedBackend>) -> SessionStore {
    SessionStore::new(provisioner(), backend, HistoryRetention::unbounded())
}

pub fn controller(backend: Arc<ScriptedBackend>) -> ChatController {
    ChatController::new(store(backend))
}
