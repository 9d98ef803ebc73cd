//! Session and conversation history management.
//!
//! Each UI session owns an ordered, append-only list of turns and the handle
//! to its remote conversation. Sessions are held in memory for the lifetime
//! of the process or until explicitly removed.
//!
//! # Architecture
//!
//! - [`ConversationTurn`]: one user or bot message
//! - [`ConversationSession`]: history plus remote handle behind one lock
//! - [`SessionStore`]: lazily initializes sessions by identifier
//!
//! # Example
//!
//! ```rust
//! use god_chatbot::session::{ConversationTurn, TurnRole};
//!
//! let turn = ConversationTurn::user("What is the Mahamantra?");
//! assert_eq!(turn.role, TurnRole::User);
//! ```

mod store;
mod thread;

pub use store::SessionStore;
pub use thread::{ConversationSession, ConversationTurn, HistoryRetention, SessionState, TurnRole};
