//! Prompt construction for query rewriting and answering.

use reviewqa_generation::ChatMessage;
use reviewqa_retrieval::document::keys;
use reviewqa_retrieval::{Document, RetrievalResult};

use crate::history::{ConversationHistory, Role};

/// System instruction for turning a follow-up into a standalone question.
pub const REWRITE_INSTRUCTION: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which \
can be understood without the chat history. Do NOT answer the question, just reformulate \
it if needed and otherwise return it as is.";

/// System instruction for answering from retrieved reviews.
pub const ANSWER_INSTRUCTION: &str = "You are an assistant for question-answering tasks \
about headphones and earbuds. Use only the following pieces of retrieved product reviews \
to answer the question. If the reviews do not contain the answer, say that you don't \
know. If the question is not about these products or their reviews, say that you don't \
know. Use three sentences maximum and keep the answer concise.";

/// Shown in place of the context when retrieval found nothing.
pub const NO_CONTEXT: &str = "(no relevant reviews were found)";

fn label(key: &str) -> &str {
    match key {
        keys::PRODUCT_NAME => "Product",
        keys::PRODUCT_RATING => "Rating",
        keys::PRODUCT_SUMMARY => "Summary",
        other => other,
    }
}

fn render_document(document: &Document, include_metadata: bool) -> String {
    if !include_metadata || document.metadata.is_empty() {
        return document.content.clone();
    }
    let header = document
        .metadata
        .iter()
        .filter(|(_, value)| !value.to_string().trim().is_empty())
        .map(|(key, value)| format!("{}: {value}", label(key)))
        .collect::<Vec<_>>()
        .join(" | ");
    if header.is_empty() {
        document.content.clone()
    } else {
        format!("{header}\n{}", document.content)
    }
}

/// Retrieved documents as one block of text, most relevant first.
pub fn render_context(result: &RetrievalResult, include_metadata: bool) -> String {
    if result.is_empty() {
        return NO_CONTEXT.to_string();
    }
    result
        .documents()
        .map(|doc| render_document(doc, include_metadata))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn history_messages(history: &ConversationHistory) -> impl Iterator<Item = ChatMessage> + '_ {
    history.turns().iter().map(|turn| match turn.role {
        Role::User => ChatMessage::user(turn.text.clone()),
        Role::Assistant => ChatMessage::assistant(turn.text.clone()),
    })
}

/// Messages asking the model to rewrite `question` as a standalone query.
pub fn rewrite_messages(history: &ConversationHistory, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(REWRITE_INSTRUCTION));
    messages.extend(history_messages(history));
    messages.push(ChatMessage::user(question));
    messages
}

/// Messages asking the model to answer `query` from `context`.
pub fn answer_messages(
    history: &ConversationHistory,
    context: &str,
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!("{ANSWER_INSTRUCTION}\n\n{context}")));
    messages.extend(history_messages(history));
    messages.push(ChatMessage::user(query));
    messages
}
