//! GOD Chatbot
//!
//! A conversational web service answering questions about the Mahamantra.
//! Each question is forwarded to a hosted Gemini model on Vertex AI,
//! grounded on a document-retrieval data store, and the answer is shown back
//! to the user either all at once or revealed piece by piece.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server with an inline chat page and SSE replies
//! - **Credentials**: base64 service-account key materialized once per process
//! - **Vertex**: `generateContent` client with retrieval grounding
//! - **Sessions**: per-visitor history bound to one remote conversation
//!
//! # Modules
//!
//! - [`credentials`]: credential decoding and provisioning
//! - [`vertex`]: model backend traits, wire types and the Vertex client
//! - [`session`]: conversation sessions and the session store
//! - [`chat`]: question submission
//! - [`render`]: atomic and incremental reply presentation
//! - [`events`]: SSE event model

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod chat;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod render;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod vertex;

use chat::ChatController;
use render::ResponseRenderer;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Question submission against the session store.
    pub controller: ChatController,
    /// How replies are presented on the stream endpoint.
    pub renderer: ResponseRenderer,
}

impl AppState {
    pub fn new(controller: ChatController, renderer: ResponseRenderer) -> Self {
        Self {
            controller,
            renderer,
        }
    }
}
