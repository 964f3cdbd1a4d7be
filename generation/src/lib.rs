//! # Generation
//!
//! Language-model completion behind a single trait. The conversation
//! engine uses it twice per turn: once to rewrite a follow-up into a
//! standalone question and once to answer it.
//!
//! ```text
//! CompletionRequest ──► GenerationProvider ──► Completion
//!                            │
//!                            ▼
//!                  ChatCompletionsProvider (Groq / OpenAI-compatible)
//! ```

pub mod error;
pub mod message;
pub mod provider;

pub use error::{GenerationError, Result};
pub use message::{ChatMessage, ChatRole};
pub use provider::{ChatCompletionsProvider, Completion, CompletionRequest, GenerationProvider};
