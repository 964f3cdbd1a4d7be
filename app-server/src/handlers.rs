//! HTTP handlers for the chat page, the chat endpoint and health.

use axum::Json;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use reviewqa_conversation::{ConversationError, SessionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::state::AppState;

/// Cookie carrying the session id between page loads.
pub const SESSION_COOKIE: &str = "reviewqa_session";

/// Header a non-browser client may use to pick its session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Body returned when a turn fails. Internal error text is only logged.
pub const APOLOGY: &str =
    "Sorry, I couldn't answer that right now. Please try again in a moment.";

const CHAT_PAGE: &str = include_str!("../assets/chat.html");

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// Errors surfaced to chat clients as plain text.
#[derive(Debug)]
pub enum ChatError {
    /// 400: the request cannot be answered as sent.
    BadRequest(String),
    /// 503: the turn failed downstream.
    Unavailable,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match self {
            ChatError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ChatError::Unavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, APOLOGY.to_string()).into_response()
            }
        }
    }
}

impl From<ConversationError> for ChatError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::EmptyMessage => {
                ChatError::BadRequest("Please enter a message.".to_string())
            }
            ConversationError::InvalidSession(_) => {
                ChatError::BadRequest("Invalid session id.".to_string())
            }
            other => {
                error!(error = %other, "Turn failed");
                ChatError::Unavailable
            }
        }
    }
}

/// Session the request belongs to and whether it was issued just now.
struct ResolvedSession {
    id: SessionId,
    issued: bool,
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Form field, then header, then cookie, then a fresh id.
///
/// An explicit form or header id must be valid. A malformed cookie is
/// replaced with a fresh session.
fn resolve_session(
    form_id: Option<&str>,
    headers: &HeaderMap,
) -> Result<ResolvedSession, ConversationError> {
    let header_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Some(raw) = non_blank(form_id).or_else(|| non_blank(header_id)) {
        return Ok(ResolvedSession {
            id: SessionId::parse(raw)?,
            issued: false,
        });
    }

    if let Some(raw) = non_blank(cookie_value(headers, SESSION_COOKIE)) {
        match SessionId::parse(raw) {
            Ok(id) => return Ok(ResolvedSession { id, issued: false }),
            Err(e) => warn!(error = %e, "Ignoring malformed session cookie"),
        }
    }

    Ok(ResolvedSession {
        id: SessionId::generate(),
        issued: true,
    })
}

fn attach_session(mut response: Response, session: &ResolvedSession) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(session.id.as_str()) {
        headers.insert(SESSION_HEADER, value);
    }
    if session.issued {
        let cookie = format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            session.id
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// GET / - the chat page.
pub async fn index() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

/// POST /get - answer one chat message as plain text.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let session = match resolve_session(form.session_id.as_deref(), &headers) {
        Ok(session) => session,
        Err(e) => return ChatError::from(e).into_response(),
    };
    debug!(session_id = %session.id, issued = session.issued, "Chat request");

    let response = match state.engine.respond(&session.id, &form.msg).await {
        Ok(outcome) => outcome.answer.into_response(),
        Err(e) => ChatError::from(e).into_response(),
    };
    attach_session(response, &session)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.engine.sessions().len().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
