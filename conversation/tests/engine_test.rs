//! Conversation engine scenarios with scripted model and index doubles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reviewqa_conversation::prompt::{ANSWER_INSTRUCTION, NO_CONTEXT, REWRITE_INSTRUCTION};
use reviewqa_conversation::{
    ConversationEngine, ConversationError, EngineConfig, Role, SessionHistoryStore, SessionId,
    TurnState,
};
use reviewqa_embeddings::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use reviewqa_generation::{
    ChatRole, Completion, CompletionRequest, GenerationError, GenerationProvider,
};
use reviewqa_retrieval::document::keys;
use reviewqa_retrieval::{
    Document, DocumentRetriever, InMemoryIndex, IndexSpec, Metadata, ProvisionPolicy,
    RetrievalError, RetrievalResult, Retriever, VectorIndex, VectorRecord,
};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum RewriteMode {
    Prefix,
    Fail,
    Hang,
}

#[derive(Clone, Copy, PartialEq)]
enum AnswerMode {
    /// "answer to: <query>".
    Echo,
    /// Grounded answer about BudgetBuds when the context has it, else "I don't know."
    Grounded,
    Fail,
    Hang,
}

/// Generator that answers from the prompt it receives and records every request.
struct ScriptedGenerator {
    rewrite: RewriteMode,
    answer: AnswerMode,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGenerator {
    fn new(rewrite: RewriteMode, answer: AnswerMode) -> Arc<Self> {
        Arc::new(Self {
            rewrite,
            answer,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn rewrite_calls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.messages[0].content == REWRITE_INSTRUCTION)
            .count()
    }
}

fn completion(text: impl Into<String>) -> Completion {
    Completion {
        text: text.into(),
        model: "scripted".to_string(),
        tokens_used: None,
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> reviewqa_generation::Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let system = request.messages[0].content.clone();
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if system == REWRITE_INSTRUCTION {
            return match self.rewrite {
                RewriteMode::Prefix => Ok(completion(format!("standalone: {last}"))),
                RewriteMode::Fail => Err(GenerationError::ApiRequest("503: busy".to_string())),
                RewriteMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(completion("standalone: too late"))
                }
            };
        }

        match self.answer {
            AnswerMode::Echo => Ok(completion(format!("  answer to: {last}\n"))),
            AnswerMode::Grounded => {
                let lower = last.to_lowercase();
                let on_topic = ["cheap", "battery", "budget", "earphone", "buds"]
                    .iter()
                    .any(|w| lower.contains(w));
                if on_topic && system.contains("BudgetBuds X1") {
                    Ok(completion(
                        "BudgetBuds X1 is the budget pick. Reviewers say the battery lasts two days.",
                    ))
                } else {
                    Ok(completion("I don't know."))
                }
            }
            AnswerMode::Fail => Err(GenerationError::ApiRequest("500: boom".to_string())),
            AnswerMode::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(completion("too late"))
            }
        }
    }
}

/// Retriever returning the same documents for every query.
struct FixedRetriever {
    documents: Vec<Document>,
}

#[async_trait]
impl DocumentRetriever for FixedRetriever {
    async fn retrieve(&self, _query: &str, k: usize) -> reviewqa_retrieval::Result<RetrievalResult> {
        let hits = self
            .documents
            .iter()
            .cloned()
            .map(|document| reviewqa_retrieval::ScoredDocument {
                document,
                score: 0.8,
            })
            .collect();
        Ok(RetrievalResult::ranked(hits, k))
    }
}

/// Retriever that never answers in time.
struct HangingRetriever;

#[async_trait]
impl DocumentRetriever for HangingRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> reviewqa_retrieval::Result<RetrievalResult> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(RetrievalResult::empty())
    }
}

struct FailingRetriever;

#[async_trait]
impl DocumentRetriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> reviewqa_retrieval::Result<RetrievalResult> {
        Err(RetrievalError::IndexApi("503: index unavailable".to_string()))
    }
}

const TOPICS: [&[&str]; 4] = [
    &["cheap", "price", "budget", "value"],
    &["battery"],
    &["bass"],
    &["noise"],
];

/// One dimension per topic word group.
struct TopicEmbedder;

fn embed_topics(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    TOPICS
        .iter()
        .map(|words| {
            if words.iter().any(|w| lower.contains(w)) {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn name(&self) -> &str {
        "topic"
    }

    fn default_model(&self) -> &str {
        "topic"
    }

    fn default_dimension(&self) -> usize {
        TOPICS.len()
    }

    async fn embed(&self, request: EmbeddingRequest) -> reviewqa_embeddings::Result<EmbeddingResponse> {
        let embedding = embed_topics(&request.text);
        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: "topic".to_string(),
            tokens_used: None,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn review(product: &str, rating: i64, summary: &str, text: &str) -> Document {
    let mut metadata = Metadata::new();
    metadata.insert(keys::PRODUCT_NAME.into(), product.into());
    metadata.insert(keys::PRODUCT_RATING.into(), rating.into());
    metadata.insert(keys::PRODUCT_SUMMARY.into(), summary.into());
    Document::new(text, metadata)
}

fn catalogue() -> Vec<Document> {
    vec![
        review(
            "BudgetBuds X1",
            4,
            "Great value",
            "Good sound for the price, battery lasts two days.",
        ),
        review("BassPro 500", 5, "Wonderful", "Deep bass and very comfortable."),
        review("NoiseAway ANC", 2, "Bad quality", "Noise cancelling stopped working."),
    ]
}

async fn indexed_retriever() -> Arc<Retriever> {
    let index = Arc::new(InMemoryIndex::new());
    let spec = IndexSpec::new("product-reviews", TOPICS.len());
    index.create_index(&spec).await.unwrap();
    let records: Vec<VectorRecord> = catalogue()
        .into_iter()
        .map(|doc| {
            let values = embed_topics(&doc.content);
            VectorRecord::new(doc, values)
        })
        .collect();
    index.upsert("product-reviews", &records).await.unwrap();

    Arc::new(
        Retriever::new(Arc::new(TopicEmbedder), index, spec).with_policy(ProvisionPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            timeout_ms: 100,
        }),
    )
}

fn engine(
    generator: Arc<ScriptedGenerator>,
    retriever: Arc<dyn DocumentRetriever>,
) -> ConversationEngine {
    ConversationEngine::new(generator, retriever, Arc::new(SessionHistoryStore::new()))
}

fn fixed() -> Arc<dyn DocumentRetriever> {
    Arc::new(FixedRetriever {
        documents: catalogue(),
    })
}

fn sid(raw: &str) -> SessionId {
    SessionId::parse(raw).unwrap()
}

fn sentence_count(text: &str) -> usize {
    text.split_terminator(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}

// ---------------------------------------------------------------------------
// Turn lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_turn_skips_rewrite() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed());

    let outcome = engine.respond(&sid("abc"), "any cheap buds?").await.unwrap();

    assert_eq!(outcome.report.rewritten_query, "any cheap buds?");
    assert_eq!(generator.rewrite_calls(), 0);
    assert_eq!(generator.requests().len(), 1);
    assert_eq!(outcome.answer, "answer to: any cheap buds?");
    assert_eq!(
        outcome.report.states,
        vec![
            TurnState::Received,
            TurnState::Rewritten,
            TurnState::Retrieved,
            TurnState::Generated,
            TurnState::Persisted,
            TurnState::Returned,
        ]
    );
}

#[tokio::test]
async fn test_rewrite_of_empty_history_is_identity() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed());

    let history = engine.sessions().get_or_create(&sid("abc")).await;
    let rewritten = engine.rewrite_query(&history, "how is the battery?").await;

    assert_eq!(rewritten, "how is the battery?");
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn test_follow_up_is_rewritten_with_history() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed());
    let id = sid("abc");

    engine.respond(&id, "any cheap buds?").await.unwrap();
    let outcome = engine.respond(&id, "how is its battery?").await.unwrap();

    assert_eq!(outcome.report.rewritten_query, "standalone: how is its battery?");
    let requests = generator.requests();
    let rewrite = &requests[1];
    let roles: Vec<ChatRole> = rewrite.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
    );
    assert_eq!(rewrite.messages[1].content, "any cheap buds?");

    // The answer prompt ends with the standalone query.
    let answer = &requests[2];
    assert_eq!(
        answer.messages.last().map(|m| m.content.as_str()),
        Some("standalone: how is its battery?")
    );
    // History keeps what the user actually typed.
    let history = engine.sessions().get_or_create(&id).await;
    assert_eq!(history.turns()[2].text, "how is its battery?");
}

#[tokio::test]
async fn test_failed_rewrite_falls_back_to_question() {
    let generator = ScriptedGenerator::new(RewriteMode::Fail, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed());
    let id = sid("abc");

    engine.respond(&id, "any cheap buds?").await.unwrap();
    let outcome = engine.respond(&id, "and the battery?").await.unwrap();

    assert_eq!(outcome.report.rewritten_query, "and the battery?");
    assert_eq!(outcome.answer, "answer to: and the battery?");
}

#[tokio::test]
async fn test_slow_rewrite_falls_back_to_question() {
    let generator = ScriptedGenerator::new(RewriteMode::Hang, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed()).with_config(EngineConfig {
        rewrite_timeout_ms: 20,
        ..EngineConfig::default()
    });
    let id = sid("abc");

    engine.respond(&id, "any cheap buds?").await.unwrap();
    let outcome = engine.respond(&id, "and the battery?").await.unwrap();

    assert_eq!(generator.rewrite_calls(), 1);
    assert_eq!(outcome.report.rewritten_query, "and the battery?");
    assert_eq!(outcome.answer, "answer to: and the battery?");
    assert_eq!(engine.sessions().get_or_create(&id).await.len(), 4);
}

#[tokio::test]
async fn test_history_alternates_over_many_turns() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = engine(generator, fixed());
    let id = sid("abc");

    for i in 0..5 {
        engine.respond(&id, &format!("question {i}")).await.unwrap();
        let history = engine.sessions().get_or_create(&id).await;
        assert_eq!(history.len(), 2 * (i + 1));
    }

    let history = engine.sessions().get_or_create(&id).await;
    for (i, turn) in history.turns().iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected);
    }
}

#[tokio::test]
async fn test_blank_message_rejected() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = engine(generator.clone(), fixed());

    let err = engine.respond(&sid("abc"), "   ").await.unwrap_err();

    assert!(matches!(err, ConversationError::EmptyMessage));
    assert!(generator.requests().is_empty());
    assert!(engine.sessions().is_empty().await);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generation_failure_leaves_history_untouched() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Fail);
    let engine = engine(generator, fixed());
    let id = sid("abc");

    let err = engine.respond(&id, "any cheap buds?").await.unwrap_err();

    assert!(matches!(err, ConversationError::Generation(_)));
    assert!(engine.sessions().get_or_create(&id).await.is_empty());
}

#[tokio::test]
async fn test_generation_timeout_fails_turn() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Hang);
    let engine = engine(generator, fixed()).with_config(EngineConfig {
        generation_timeout_ms: 20,
        ..EngineConfig::default()
    });
    let id = sid("abc");

    let err = engine.respond(&id, "any cheap buds?").await.unwrap_err();

    assert!(matches!(err, ConversationError::GenerationTimeout(_)));
    assert!(engine.sessions().get_or_create(&id).await.is_empty());
}

#[tokio::test]
async fn test_retrieval_failure_degrades_to_empty_context() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Grounded);
    let engine = engine(generator.clone(), Arc::new(FailingRetriever));
    let id = sid("abc");

    let outcome = engine.respond(&id, "any cheap buds?").await.unwrap();

    assert!(outcome.report.retrieval_degraded);
    assert!(outcome.report.documents.is_empty());
    assert_eq!(outcome.answer, "I don't know.");
    let answer_request = generator.requests().pop().unwrap();
    assert!(answer_request.messages[0].content.ends_with(NO_CONTEXT));
    assert_eq!(engine.sessions().get_or_create(&id).await.len(), 2);
}

#[tokio::test]
async fn test_slow_retrieval_degrades_to_empty_context() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Grounded);
    let retriever: Arc<dyn DocumentRetriever> = Arc::new(HangingRetriever);
    let engine = engine(generator.clone(), retriever).with_config(EngineConfig {
        retrieval_timeout_ms: 20,
        ..EngineConfig::default()
    });
    let id = sid("abc");

    let outcome = engine.respond(&id, "any cheap buds?").await.unwrap();

    assert!(outcome.report.retrieval_degraded);
    assert!(outcome.report.documents.is_empty());
    assert_eq!(outcome.answer, "I don't know.");
    let answer_request = generator.requests().pop().unwrap();
    assert!(answer_request.messages[0].content.ends_with(NO_CONTEXT));
    assert_eq!(engine.sessions().get_or_create(&id).await.len(), 2);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_sessions_never_mix() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = Arc::new(engine(generator, fixed()));

    let turns = (0..16).map(|i| {
        let engine = engine.clone();
        async move {
            let id = sid(&format!("session-{i}"));
            engine.respond(&id, &format!("question from {i}")).await.unwrap();
            id
        }
    });
    let ids = futures::future::join_all(turns).await;

    for (i, id) in ids.iter().enumerate() {
        let history = engine.sessions().get_or_create(id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].text, format!("question from {i}"));
        assert_eq!(history.turns()[1].text, format!("answer to: question from {i}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_session_turns_are_serialized() {
    const N: usize = 12;
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Echo);
    let engine = Arc::new(engine(generator, fixed()));
    let id = sid("shared");

    let turns: Vec<_> = (0..N)
        .map(|i| {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.respond(&id, &format!("q{i}")).await.unwrap() })
        })
        .collect();
    for turn in turns {
        turn.await.unwrap();
    }

    let history = engine.sessions().get_or_create(&id).await;
    assert_eq!(history.len(), 2 * N);
    for pair in history.turns().chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        // Each answer belongs to the question just before it.
        assert!(pair[1].text.ends_with(&pair[0].text));
    }
}

// ---------------------------------------------------------------------------
// End to end over an indexed catalogue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_budget_earphones_scenario() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Grounded);
    let engine = engine(generator.clone(), indexed_retriever().await);

    let outcome = engine
        .respond(&sid("abc"), "cheap earphones with good battery")
        .await
        .unwrap();

    let top = outcome.report.documents.top().unwrap();
    assert_eq!(top.document.product_name().as_deref(), Some("BudgetBuds X1"));
    assert!(outcome.report.documents.len() <= 4);

    let answer_request = generator.requests().pop().unwrap();
    let system = &answer_request.messages[0].content;
    assert!(system.starts_with(ANSWER_INSTRUCTION));
    assert!(system.contains("Good sound for the price, battery lasts two days."));
    assert!(system.contains("Product: BudgetBuds X1"));

    assert!(outcome.answer.contains("BudgetBuds X1"));
    assert!(sentence_count(&outcome.answer) <= 3);
}

#[tokio::test]
async fn test_off_topic_question_gets_dont_know() {
    let generator = ScriptedGenerator::new(RewriteMode::Prefix, AnswerMode::Grounded);
    let engine = engine(generator.clone(), indexed_retriever().await);

    let outcome = engine
        .respond(&sid("abc"), "What is the capital of France?")
        .await
        .unwrap();

    assert_eq!(outcome.answer, "I don't know.");
    let answer_request = generator.requests().pop().unwrap();
    assert!(answer_request.messages[0].content.contains("say that you don't know"));
}
