use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persistent two-party conversation. The participant pair is fixed at
/// creation and never changes; the same pair may own multiple threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only unit of conversation content. Total order within a thread is
/// `created_at` then `id` as tie-break, and never changes once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Thread-list entry: the thread plus the counterpart participant and the
/// latest activity timestamp, enough for a thread-list UI row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: Uuid,
    pub subject: Option<String>,
    pub counterpart: Participant,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub email: String,
    pub username: String,
}

/// A project lifecycle fact produced by the project REST service. Meridian
/// consumes and relays it; the snapshot is opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectChangeEvent {
    pub project_id: Uuid,
    pub change_kind: ProjectChangeKind,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectChangeKind {
    Created,
    Updated,
}
