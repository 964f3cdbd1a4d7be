//! # Conversation
//!
//! Per-session history and the engine that answers product questions:
//!
//! 1. rewrite a follow-up into a standalone query using the history,
//! 2. retrieve the most relevant reviews,
//! 3. generate an answer grounded in those reviews,
//! 4. commit the exchange to the session's history.
//!
//! ```rust,ignore
//! use reviewqa_conversation::{ConversationEngine, SessionHistoryStore, SessionId};
//!
//! let engine = ConversationEngine::new(generator, retriever, Arc::new(SessionHistoryStore::new()));
//! let outcome = engine.respond(&SessionId::generate(), "Any cheap earbuds?").await?;
//! println!("{}", outcome.answer);
//! ```

pub mod engine;
pub mod error;
pub mod history;
pub mod prompt;

pub use engine::{ConversationEngine, EngineConfig, TurnOutcome, TurnReport, TurnState};
pub use error::{ConversationError, Result};
pub use history::{ConversationHistory, Role, SessionGuard, SessionHistoryStore, SessionId, Turn};
