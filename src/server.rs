//! HTTP surface: the chat page, the JSON and SSE chat endpoints, session
//! inspection, and the server lifecycle.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{ChatController, validate_input};
use crate::config::AppConfig;
use crate::credentials::CredentialProvisioner;
use crate::error::ChatError;
use crate::events::{ChatEvent, sse_event};
use crate::render::ResponseRenderer;
use crate::session::{ConversationTurn, HistoryRetention, SessionStore};
use crate::vertex::{Citation, VertexBackend, VertexSettings};

/// Header carrying the session id on failed JSON chat requests.
pub const SESSION_HEADER: &str = "x-session-id";

/// Build the application router.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/sessions/{id}/messages", get(api_get_messages))
        .route("/api/sessions/{id}", axum::routing::delete(api_delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(request_timeout, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
///
/// Fails fast when the encoded credential variable is absent or cannot be
/// decoded; nothing is written to disk until the first session is created.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let provisioner = Arc::new(CredentialProvisioner::from_env(config.credentials.clone()));
    check_credentials(&provisioner, &config.model)?;

    let backend = Arc::new(VertexBackend::new(config.model.clone())?);
    let sessions = SessionStore::new(
        provisioner,
        backend,
        HistoryRetention::from(&config.history),
    );
    let state = AppState::new(
        ChatController::new(sessions),
        ResponseRenderer::from(&config.presentation),
    );

    let app = router(state, config.server.request_timeout());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Credentials must decode, and must be a service-account key unless a
/// static access token stands in for the token exchange.
fn check_credentials(
    provisioner: &CredentialProvisioner,
    model: &VertexSettings,
) -> Result<(), ChatError> {
    provisioner.check()?;
    if model.access_token.is_none() {
        provisioner.check_service_account()?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(name: "server.shutdown", "Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the JSON chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (creates new if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from the JSON chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    session_id: String,
    reply: String,
    citations: Vec<Citation>,
}

/// POST /api/chat - Ask one question and wait for the full answer.
async fn api_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    tracing::info!(
        message_length = req.message.len(),
        session_id = ?req.session_id,
        "Received chat request"
    );

    if let Err(e) = validate_input(&req.message) {
        return e.into_response();
    }

    let session = match state.controller.open(req.session_id.as_deref()).await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    match state.controller.submit(&session, &req.message).await {
        Ok(reply) => Json(ChatResponse {
            session_id: session.id().to_string(),
            reply: reply.text,
            citations: reply.citations,
        })
        .into_response(),
        Err(e) => ([(SESSION_HEADER, session.id().to_string())], e).into_response(),
    }
}

/// Query parameters for the SSE chat endpoint.
#[derive(Debug, Deserialize)]
struct StreamParams {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// GET /api/chat/stream - Ask one question and receive the answer as SSE.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    if let Err(e) = validate_input(&params.message) {
        return single_error_sse(&e);
    }

    let session = match state.controller.open(params.session_id.as_deref()).await {
        Ok(s) => s,
        Err(e) => return single_error_sse(&e),
    };

    let session_event = ChatEvent::Session {
        session_id: session.id().to_string(),
    };

    // The exchange runs to completion even if the client goes away, so the
    // answer still lands in history.
    let controller = state.controller.clone();
    let message = params.message;
    let exchange =
        tokio::spawn(async move { controller.submit(&session, &message).await });
    let renderer = state.renderer;

    let sse_stream = async_stream::stream! {
        yield Ok::<String, Infallible>(sse_event(&session_event));

        let outcome = exchange
            .await
            .unwrap_or_else(|e| Err(ChatError::RemoteCall(format!("exchange task failed: {e}"))));

        match outcome {
            Ok(reply) => {
                let frames = renderer.render(&reply);
                futures::pin_mut!(frames);
                while let Some(frame) = frames.next().await {
                    yield Ok(sse_event(&ChatEvent::MessageDelta { text: frame.delta }));
                }
                for citation in reply.citations {
                    yield Ok(sse_event(&ChatEvent::Citation(citation)));
                }
            }
            Err(e) => {
                yield Ok(sse_event(&ChatEvent::from(&e)));
            }
        }

        yield Ok(sse_event(&ChatEvent::Done));
    };

    build_sse_response(axum::body::Body::from_stream(sse_stream))
}

/// History of one session.
#[derive(Debug, Serialize)]
struct SessionMessages {
    session_id: String,
    messages: Vec<ConversationTurn>,
}

/// GET /api/sessions/{id}/messages - Get session messages.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionMessages>, ChatError> {
    let session = state
        .controller
        .sessions()
        .get(&id)
        .ok_or(ChatError::SessionNotFound(id))?;

    Ok(Json(SessionMessages {
        session_id: session.id().to_string(),
        messages: session.history().await,
    }))
}

/// DELETE /api/sessions/{id} - Drop a session and its remote conversation.
async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state
        .controller
        .sessions()
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ChatError::SessionNotFound(id))
}

/// GET /healthz
async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.controller.sessions();
    Json(serde_json::json!({
        "status": "ok",
        "sessions": sessions.len(),
        "credentials_provisioned": sessions.provisioner().is_provisioned(),
    }))
}

/// GET / - The chat page.
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}

fn single_error_sse(err: &ChatError) -> Response {
    tracing::warn!(kind = err.kind(), error = %err, "Chat stream rejected");
    let payload = format!(
        "{}{}",
        sse_event(&ChatEvent::from(err)),
        sse_event(&ChatEvent::Done)
    );
    build_sse_response(axum::body::Body::from(payload))
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Questions and answers about the Mahamantra">
    <title>GOD Chatbot - POC</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 0; background: #fafafa; color: #1f2933; }
        main { max-width: 48rem; margin: 0 auto; padding: 1.5rem; display: flex; flex-direction: column; height: 100vh; box-sizing: border-box; }
        h1 { margin: 0 0 .25rem; }
        .subtitle { margin: 0 0 1rem; color: #52606d; }
        #chat-log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: .75rem; padding-bottom: 1rem; }
        .turn { padding: .75rem 1rem; border-radius: .75rem; max-width: 85%; white-space: pre-wrap; }
        .turn.user { align-self: flex-end; background: #dbeafe; }
        .turn.bot { align-self: flex-start; background: #fff; border: 1px solid #e4e7eb; }
        .turn.failed { border: 1px solid #e12d39; }
        .turn .note { display: block; margin-top: .5rem; font-size: .8rem; color: #e12d39; }
        .sources { margin: .5rem 0 0; padding-left: 1.25rem; font-size: .8rem; }
        form { display: flex; gap: .5rem; }
        #chat-input { flex: 1; padding: .75rem; border: 1px solid #cbd2d9; border-radius: .5rem; font-size: 1rem; }
        button { padding: .75rem 1.25rem; border: 0; border-radius: .5rem; background: #2563eb; color: #fff; font-size: 1rem; }
        button:disabled, #chat-input:disabled { opacity: .6; }
    </style>
</head>
<body>
<main>
    <h1>GOD Chatbot - POC</h1>
    <p class="subtitle">Ask your questions about the Mahamantra below!</p>
    <div id="chat-log" aria-live="polite"></div>
    <form id="chat-form" autocomplete="off">
        <input id="chat-input" name="message" placeholder="Type your question here..." autofocus>
        <button id="chat-send" type="submit">Send</button>
    </form>
</main>
<script>
(() => {
    const KEY = "god-chatbot-session";
    const log = document.getElementById("chat-log");
    const form = document.getElementById("chat-form");
    const input = document.getElementById("chat-input");
    const send = document.getElementById("chat-send");
    let sessionId = sessionStorage.getItem(KEY);

    function bubble(role, text) {
        const el = document.createElement("div");
        el.className = "turn " + role;
        el.textContent = text;
        log.appendChild(el);
        log.scrollTop = log.scrollHeight;
        return el;
    }

    function markFailed(el, message) {
        el.classList.add("failed");
        const note = document.createElement("span");
        note.className = "note";
        note.textContent = message || "No answer was received for this question.";
        el.appendChild(note);
    }

    async function restore() {
        if (!sessionId) return;
        const res = await fetch("/api/sessions/" + encodeURIComponent(sessionId) + "/messages");
        if (!res.ok) {
            sessionStorage.removeItem(KEY);
            sessionId = null;
            return;
        }
        const body = await res.json();
        body.messages.forEach((turn, i) => {
            const el = bubble(turn.role, turn.content);
            const next = body.messages[i + 1];
            if (turn.role === "user" && (!next || next.role !== "bot")) markFailed(el);
        });
    }

    function ask(text) {
        const userEl = bubble("user", text);
        let botEl = null;
        let sources = null;
        let finished = false;
        input.disabled = true;
        send.disabled = true;

        const params = new URLSearchParams({ message: text });
        if (sessionId) params.set("session_id", sessionId);
        const es = new EventSource("/api/chat/stream?" + params.toString());

        function finish() {
            if (finished) return;
            finished = true;
            es.close();
            input.disabled = false;
            send.disabled = false;
            input.focus();
        }

        es.addEventListener("session", (ev) => {
            sessionId = JSON.parse(ev.data).data.session_id;
            sessionStorage.setItem(KEY, sessionId);
        });
        es.addEventListener("message.delta", (ev) => {
            if (!botEl) botEl = bubble("bot", "");
            botEl.textContent += JSON.parse(ev.data).data.text;
            log.scrollTop = log.scrollHeight;
        });
        es.addEventListener("citation", (ev) => {
            if (!botEl) return;
            const c = JSON.parse(ev.data).data;
            if (!sources) {
                sources = document.createElement("ol");
                sources.className = "sources";
                botEl.after(sources);
            }
            const item = document.createElement("li");
            item.textContent = c.title || c.uri;
            sources.appendChild(item);
        });
        es.addEventListener("error", (ev) => {
            if (finished) return;
            const detail = ev.data ? JSON.parse(ev.data).data.message : null;
            markFailed(userEl, detail);
            finish();
        });
        es.addEventListener("done", finish);
    }

    form.addEventListener("submit", (ev) => {
        ev.preventDefault();
        const text = input.value.trim();
        if (!text) return;
        input.value = "";
        ask(text);
    });

    restore();
})();
</script>
</body>
</html>
"##;
