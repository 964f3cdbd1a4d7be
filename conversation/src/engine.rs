//! The retrieval-augmented conversation engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reviewqa_generation::{CompletionRequest, GenerationError, GenerationProvider};
use reviewqa_retrieval::{DEFAULT_TOP_K, DocumentRetriever, RetrievalResult};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ConversationError, Result};
use crate::history::{ConversationHistory, SessionHistoryStore, SessionId};
use crate::prompt::{answer_messages, render_context, rewrite_messages};

/// Stages a turn passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Rewritten,
    Retrieved,
    Generated,
    Persisted,
    Returned,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Documents retrieved per turn.
    pub top_k: usize,

    /// Prefix each document with its product metadata.
    pub include_metadata: bool,

    pub rewrite_timeout_ms: u64,
    pub retrieval_timeout_ms: u64,
    pub generation_timeout_ms: u64,

    /// Sampling temperature for both model calls.
    pub temperature: Option<f32>,

    /// Token cap for the answer.
    pub max_tokens: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            include_metadata: true,
            rewrite_timeout_ms: 15_000,
            retrieval_timeout_ms: 20_000,
            generation_timeout_ms: 30_000,
            temperature: Some(0.0),
            max_tokens: None,
        }
    }
}

impl EngineConfig {
    pub fn rewrite_timeout(&self) -> Duration {
        Duration::from_millis(self.rewrite_timeout_ms)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// What happened during one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub session_id: SessionId,
    pub states: Vec<TurnState>,

    /// Query used for retrieval and answering.
    pub rewritten_query: String,

    /// Retrieval failed and the answer was generated without context.
    pub retrieval_degraded: bool,

    pub documents: RetrievalResult,
    pub elapsed_ms: u64,
}

impl TurnReport {
    fn enter(&mut self, state: TurnState) {
        debug!(session_id = %self.session_id, state = ?state, "Turn state");
        self.states.push(state);
    }
}

/// Answer to a user message plus the turn report.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub report: TurnReport,
}

/// Rewrites, retrieves, answers and records each user message.
pub struct ConversationEngine {
    generator: Arc<dyn GenerationProvider>,
    retriever: Arc<dyn DocumentRetriever>,
    sessions: Arc<SessionHistoryStore>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        retriever: Arc<dyn DocumentRetriever>,
        sessions: Arc<SessionHistoryStore>,
    ) -> Self {
        Self {
            generator,
            retriever,
            sessions,
            config: EngineConfig::default(),
        }
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionHistoryStore> {
        &self.sessions
    }

    /// Answer `message` in the context of `session_id`.
    ///
    /// History is written only after the answer exists, and both turns are
    /// written together. A failed turn leaves the history as it was.
    pub async fn respond(&self, session_id: &SessionId, message: &str) -> Result<TurnOutcome> {
        let started = Instant::now();
        if message.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let mut session = self.sessions.lock(session_id).await;
        let mut report = TurnReport {
            session_id: session_id.clone(),
            states: Vec::with_capacity(6),
            rewritten_query: String::new(),
            retrieval_degraded: false,
            documents: RetrievalResult::empty(),
            elapsed_ms: 0,
        };
        report.enter(TurnState::Received);
        debug!(session_id = %session_id, text = message, "Received message");

        report.rewritten_query = self.rewrite_query(session.history(), message).await;
        report.enter(TurnState::Rewritten);

        match self.retrieve(&report.rewritten_query).await {
            Ok(documents) => report.documents = documents,
            Err(reason) => {
                warn!(
                    session_id = %session_id,
                    reason = %reason,
                    "Retrieval failed; answering without context"
                );
                report.retrieval_degraded = true;
            }
        }
        report.enter(TurnState::Retrieved);

        let answer = self
            .generate(session.history(), &report.documents, &report.rewritten_query)
            .await?;
        report.enter(TurnState::Generated);

        session.commit_exchange(message, answer.clone())?;
        report.enter(TurnState::Persisted);
        drop(session);

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.enter(TurnState::Returned);
        info!(
            session_id = %session_id,
            documents = report.documents.len(),
            degraded = report.retrieval_degraded,
            elapsed_ms = report.elapsed_ms,
            "Turn complete"
        );
        Ok(TurnOutcome { answer, report })
    }

    /// Standalone form of `question` given `history`.
    ///
    /// Empty history returns the question unchanged without calling the
    /// model. A failed, late or blank rewrite also falls back to the
    /// question.
    pub async fn rewrite_query(&self, history: &ConversationHistory, question: &str) -> String {
        if history.is_empty() {
            return question.to_string();
        }

        let mut request = CompletionRequest::new(rewrite_messages(history, question));
        request.temperature = self.config.temperature;
        let limit = self.config.rewrite_timeout();

        match timeout(limit, self.generator.complete(request)).await {
            Ok(Ok(completion)) if !completion.text.trim().is_empty() => {
                let rewritten = completion.text.trim().to_string();
                debug!(question, rewritten = %rewritten, "Rewrote query");
                rewritten
            }
            Ok(Ok(_)) => {
                warn!("Rewrite returned blank text; using the question as is");
                question.to_string()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Rewrite failed; using the question as is");
                question.to_string()
            }
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Rewrite timed out; using the question as is"
                );
                question.to_string()
            }
        }
    }

    async fn retrieve(&self, query: &str) -> std::result::Result<RetrievalResult, String> {
        let limit = self.config.retrieval_timeout();
        match timeout(limit, self.retriever.retrieve(query, self.config.top_k)).await {
            Ok(Ok(documents)) => {
                debug!(k = self.config.top_k, documents = documents.len(), "Retrieved context");
                Ok(documents)
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {limit:?}")),
        }
    }

    async fn generate(
        &self,
        history: &ConversationHistory,
        documents: &RetrievalResult,
        query: &str,
    ) -> Result<String> {
        let context = render_context(documents, self.config.include_metadata);
        let mut request = CompletionRequest::new(answer_messages(history, &context, query));
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;

        let limit = self.config.generation_timeout();
        let completion = timeout(limit, self.generator.complete(request))
            .await
            .map_err(|_| ConversationError::GenerationTimeout(limit))??;

        let answer = completion.text.trim();
        if answer.is_empty() {
            return Err(GenerationError::InvalidResponse("blank answer".to_string()).into());
        }
        Ok(answer.to_string())
    }
}
