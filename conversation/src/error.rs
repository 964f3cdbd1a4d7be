//! Error types for conversation turns.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for conversation operations.
pub type Result<T> = std::result::Result<T, ConversationError>;

/// Errors that can fail a conversation turn.
#[derive(Error, Debug)]
pub enum ConversationError {
    /// A history mutation would break user/assistant alternation.
    #[error("invalid history state: {0}")]
    InvalidState(String),

    /// Session id is empty, too long or has disallowed characters.
    #[error("invalid session id: {0:?}")]
    InvalidSession(String),

    /// Message is blank.
    #[error("message is empty")]
    EmptyMessage,

    /// The answer could not be generated.
    #[error("generation failed: {0}")]
    Generation(#[from] reviewqa_generation::GenerationError),

    /// The answer was not generated in time.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
}
