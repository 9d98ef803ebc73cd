//! Vertex AI `generateContent` REST client.
//!
//! The endpoint is stateless, so the conversation handle keeps the contents
//! exchanged so far and resends them with each message, exactly like the
//! official SDK's chat session does.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;
use uuid::Uuid;

use crate::credentials::ProvisionedCredentials;
use crate::error::{ChatError, Result};

use super::auth::{ServiceAccountTokenSource, StaticTokenSource, TokenSource};
use super::{
    Citation, GenerationConfig, ModelBackend, ModelReply, RemoteConversation, SafetySetting,
    VertexSettings,
};

/// Opens conversations against the Vertex AI REST API.
pub struct VertexBackend {
    http: reqwest::Client,
    settings: VertexSettings,
    url: Url,
    tokens: OnceCell<Arc<dyn TokenSource>>,
}

impl std::fmt::Debug for VertexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexBackend")
            .field("url", &self.url.as_str())
            .field("model", &self.settings.model)
            .field("datastore", &self.settings.datastore)
            .finish_non_exhaustive()
    }
}

impl VertexBackend {
    /// Create a backend for the given settings.
    pub fn new(settings: VertexSettings) -> Result<Self> {
        let url = settings
            .generate_content_url()
            .map_err(|e| ChatError::Configuration(format!("invalid model endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChatError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            settings,
            url,
            tokens: OnceCell::new(),
        })
    }

    /// Settings this backend was built with.
    pub fn settings(&self) -> &VertexSettings {
        &self.settings
    }

    async fn token_source(
        &self,
        credentials: &ProvisionedCredentials,
    ) -> Result<Arc<dyn TokenSource>> {
        self.tokens
            .get_or_try_init(|| self.build_token_source(credentials))
            .await
            .cloned()
    }

    async fn build_token_source(
        &self,
        credentials: &ProvisionedCredentials,
    ) -> Result<Arc<dyn TokenSource>> {
        if let Some(token) = &self.settings.access_token {
            tracing::debug!("Using configured access token");
            return Ok(Arc::new(StaticTokenSource::new(token.clone())));
        }
        let key = credentials.service_account_key()?;
        let source = ServiceAccountTokenSource::new(self.http.clone(), key)
            .map_err(|e| ChatError::SessionInit(e.to_string()))?;
        Ok(Arc::new(source))
    }
}

#[async_trait::async_trait]
impl ModelBackend for VertexBackend {
    async fn start_chat(
        &self,
        credentials: Arc<ProvisionedCredentials>,
    ) -> Result<Box<dyn RemoteConversation>> {
        let tokens = self.token_source(&credentials).await?;

        // Fail here rather than on the first question if auth is broken.
        tokens
            .token()
            .await
            .map_err(|e| ChatError::SessionInit(e.to_string()))?;

        let conversation = VertexConversation {
            handle: Uuid::new_v4().to_string(),
            http: self.http.clone(),
            url: self.url.clone(),
            tokens,
            system_instruction: Content::text("system", &self.settings.system_instruction),
            tools: vec![Tool::vertex_ai_search(&self.settings.datastore)],
            contents: Vec::new(),
        };

        tracing::info!(
            name: "vertex.chat.started",
            handle = %conversation.handle,
            model = %self.settings.model,
            "Remote conversation opened"
        );

        Ok(Box::new(conversation))
    }
}

/// One ongoing conversation with the model.
pub struct VertexConversation {
    handle: String,
    http: reqwest::Client,
    url: Url,
    tokens: Arc<dyn TokenSource>,
    system_instruction: Content,
    tools: Vec<Tool>,
    contents: Vec<Content>,
}

impl std::fmt::Debug for VertexConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexConversation")
            .field("handle", &self.handle)
            .field("turns", &self.contents.len())
            .finish_non_exhaustive()
    }
}

impl VertexConversation {
    async fn exchange(&self, request: &GenerateContentRequest<'_>) -> Result<GenerateContentResponse> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| ChatError::RemoteCall(e.to_string()))?;

        let resp = self
            .http
            .post(self.url.clone())
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::RemoteCall(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        resp.json()
            .await
            .map_err(|e| ChatError::RemoteCall(format!("failed to parse model response: {e}")))
    }
}

#[async_trait::async_trait]
impl RemoteConversation for VertexConversation {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn send_message(
        &mut self,
        text: &str,
        generation: &GenerationConfig,
        safety: &[SafetySetting],
    ) -> Result<ModelReply> {
        let user = Content::text("user", text);
        let mut contents: Vec<&Content> = self.contents.iter().collect();
        contents.push(&user);

        let request = GenerateContentRequest {
            contents,
            system_instruction: &self.system_instruction,
            tools: &self.tools,
            generation_config: generation,
            safety_settings: safety,
        };

        tracing::debug!(
            handle = %self.handle,
            content_count = request.contents.len(),
            "Sending generateContent request"
        );

        let response = self.exchange(&request).await?;
        let (reply, model_content) = extract_reply(response)?;

        // Commit the pair only when the model actually answered, so the
        // resent contents keep alternating user/model.
        match model_content {
            Some(content) if !reply.text().trim().is_empty() => {
                self.contents.push(user);
                self.contents.push(content);
            }
            _ => tracing::debug!(handle = %self.handle, "Empty reply not committed"),
        }

        tracing::debug!(
            handle = %self.handle,
            fragments = reply.fragments.len(),
            citations = reply.citations.len(),
            "Model reply received"
        );

        Ok(reply)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<&'a Content>,
    system_instruction: &'a Content,
    tools: &'a [Tool],
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    retrieval: Retrieval,
}

impl Tool {
    fn vertex_ai_search(datastore: &str) -> Self {
        Self {
            retrieval: Retrieval {
                vertex_ai_search: VertexAiSearch {
                    datastore: datastore.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Retrieval {
    vertex_ai_search: VertexAiSearch,
}

#[derive(Debug, Clone, Serialize)]
struct VertexAiSearch {
    datastore: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingChunk {
    #[serde(default)]
    retrieved_context: Option<RetrievedContext>,
}

#[derive(Debug, Deserialize)]
struct RetrievedContext {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Pull the ordered text parts and grounding sources out of the first
/// candidate. A missing candidate yields an empty reply.
fn extract_reply(response: GenerateContentResponse) -> Result<(ModelReply, Option<Content>)> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ChatError::RemoteCall(format!("prompt blocked: {reason}")));
        }
        return Ok((ModelReply::default(), None));
    };

    let fragments: Vec<String> = candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().filter_map(|p| p.text.clone()).collect())
        .unwrap_or_default();

    let citations = candidate
        .grounding_metadata
        .map(|meta| {
            meta.grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.retrieved_context)
                .filter_map(|ctx| ctx.uri.map(|uri| (uri, ctx.title)))
                .enumerate()
                .map(|(index, (uri, title))| Citation { index, uri, title })
                .collect()
        })
        .unwrap_or_default();

    let model_content = candidate.content.map(|mut c| {
        c.role = "model".to_string();
        c
    });

    Ok((
        ModelReply {
            fragments,
            citations,
        },
        model_content,
    ))
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .map(|wrapper| {
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            match wrapper.error.status {
                Some(s) if !s.is_empty() => format!("{s}: {msg}"),
                _ => msg,
            }
        })
        .unwrap_or_else(|| body.to_string());

    ChatError::RemoteCall(format!("HTTP {}: {message}", status.as_u16()))
}
