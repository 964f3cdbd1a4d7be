//! Application state shared across route handlers.

use std::sync::Arc;
use std::time::Instant;

use reviewqa_conversation::ConversationEngine;

/// Cloned into every handler task; all fields are shared.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}
