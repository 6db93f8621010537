use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, ProjectChangeKind};

/// Events sent over the WebSocket gateway, server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A message was durably appended to a thread. Delivered on the thread
    /// channel (open viewers) and on the recipient's identity channel
    /// (unread counts / toasts), both derived from the same committed row.
    MessageReceived { thread_id: Uuid, message: Message },

    /// Generic user-facing notification on the identity channel.
    Notification { message: String },

    /// A project owned by this user was created.
    ProjectCreated { project: serde_json::Value },

    /// A project owned by this user changed.
    ProjectUpdated { project: serde_json::Value },

    /// Project change relayed to the admin broadcast channel.
    AdminProjectUpdate {
        project: serde_json::Value,
        change_kind: ProjectChangeKind,
        owner_id: Uuid,
    },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the connection. Must be the first frame; the identity it
    /// binds is immutable for the connection's lifetime.
    Identify { token: String },

    /// Subscribe to live events for a thread the user participates in.
    /// Idempotent; silently ignored for threads the user is not part of.
    SubscribeThread { thread_id: Uuid },
}
