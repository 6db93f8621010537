use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Thread, ThreadSummary};

// -- JWT Claims --

/// JWT claims shared across meridian-api (REST middleware) and
/// meridian-gateway (WebSocket handshake). Canonical definition lives here
/// in meridian-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Threads --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateThreadRequest {
    /// Email of the other participant.
    pub recipient: String,
    pub subject: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreateThreadResponse {
    pub thread: Thread,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AppendMessageResponse {
    pub message: Message,
}

// -- Project events --

/// Posted by the trusted project service after it commits a change.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectEventRequest {
    pub project_id: Uuid,
    pub change_kind: crate::models::ProjectChangeKind,
    pub snapshot: serde_json::Value,
    pub owner_id: Uuid,
}
