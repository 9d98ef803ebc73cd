//! Remote model client for Vertex AI Gemini with retrieval grounding.
//!
//! This module owns everything about the hosted model: the fixed generation
//! and safety configuration, the grounding tool, authentication, and the
//! remote conversation handle.
//!
//! # Overview
//!
//! A [`ModelBackend`] opens conversations; a [`RemoteConversation`] is the
//! capability reference to one ongoing conversation and exchanges one message
//! at a time, returning a [`ModelReply`] composed of ordered text fragments.
//! Replies arrive whole: there is no partial-arrival semantics at this level.
//!
//! - [`VertexBackend`]: the real `generateContent` REST client
//! - [`auth`]: access tokens from a service-account key

pub mod auth;
pub mod client;

pub use client::{VertexBackend, VertexConversation};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::ProvisionedCredentials;
use crate::error::Result;

/// Default system instruction scoping the model to the Mahamantra Q&A corpus.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You have been provided some questions and answers about the Mahamantra. \
The questions are asked by devotees, and the answers are given by our Guru Maharaj. \
You will answer questions based on the given QAs between the devotees and Guru Maharaj. \
You DO NOT know anything other than this context. \
Under no circumstances are you to answer anything that is not related to the given context.";

pub const DEFAULT_PROJECT: &str = "god-chatbot-poc";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-002";
pub const DEFAULT_DATASTORE: &str = "projects/god-chatbot-poc/locations/us/collections/default_collection/dataStores/poc-god-chatbot_1732787019287";

/// Vertex AI connection and model settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VertexSettings {
    /// Google Cloud project identifier.
    pub project: String,
    /// Region the model is served from (e.g., `us-central1`).
    pub location: String,
    /// Publisher model identifier.
    pub model: String,
    /// Full resource name of the Vertex AI Search datastore used for grounding.
    pub datastore: String,
    /// System instruction sent with every request.
    pub system_instruction: String,
    /// Override for the regional API base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Pre-issued bearer token; bypasses the service-account exchange.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for VertexSettings {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            datastore: DEFAULT_DATASTORE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            endpoint: None,
            access_token: None,
        }
    }
}

impl VertexSettings {
    /// Base URL of the regional API.
    pub fn base_url(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com", self.location)
        })
    }

    /// Build the `generateContent` URL for the configured model.
    pub fn generate_content_url(&self) -> std::result::Result<Url, url::ParseError> {
        let base = self.base_url();
        Url::parse(&format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base.trim_end_matches('/'),
            self.project,
            self.location,
            self.model
        ))
    }
}

/// Sampling parameters sent with every message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 1.0,
            top_p: 0.95,
        }
    }
}

/// Harm categories the service can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
}

impl HarmCategory {
    pub const ALL: [Self; 4] = [
        Self::HateSpeech,
        Self::DangerousContent,
        Self::SexuallyExplicit,
        Self::Harassment,
    ];
}

/// Blocking sensitivity, most restrictive last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    Off,
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

/// One category/threshold pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

impl SafetySetting {
    /// Every category at its least restrictive threshold.
    ///
    /// In-domain theological content trips the default filters, so nothing
    /// is blocked on our side.
    pub fn permissive() -> Vec<Self> {
        HarmCategory::ALL
            .into_iter()
            .map(|category| Self {
                category,
                threshold: HarmBlockThreshold::Off,
            })
            .collect()
    }
}

/// A grounding source reported alongside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Zero-based position in the reply's source list.
    pub index: usize,
    /// Document URI in the datastore.
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A complete reply from the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    /// Text fragments in the order the service returned them.
    pub fragments: Vec<String>,
    pub citations: Vec<Citation>,
}

impl ModelReply {
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            citations: Vec::new(),
        }
    }

    /// All fragments joined in order.
    pub fn text(&self) -> String {
        self.fragments.concat()
    }
}

/// Opens remote conversations.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Initialize the client with the provisioned credentials and open a new
    /// conversation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatError::SessionInit`] on auth, network, or
    /// quota failures.
    async fn start_chat(
        &self,
        credentials: Arc<ProvisionedCredentials>,
    ) -> Result<Box<dyn RemoteConversation>>;
}

/// Server-side conversational state held by the model service.
#[async_trait::async_trait]
pub trait RemoteConversation: Send {
    /// Opaque identifier of this conversation.
    fn handle(&self) -> &str;

    /// Send one user message and wait for the complete reply.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatError::RemoteCall`] when the exchange
    /// fails. The conversation remains usable afterwards.
    async fn send_message(
        &mut self,
        text: &str,
        generation: &GenerationConfig,
        safety: &[SafetySetting],
    ) -> Result<ModelReply>;
}
