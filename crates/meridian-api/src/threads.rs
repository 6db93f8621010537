use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use meridian_db::models::{MessageRow, ThreadSummaryRow};
use meridian_types::api::{
    AppendMessageRequest, AppendMessageResponse, Claims, CreateThreadRequest,
    CreateThreadResponse, MessageListResponse, ThreadListResponse,
};
use meridian_types::models::{Message, Participant, Thread, ThreadSummary};

use crate::auth::AppState;
use crate::error::ApiError;

/// `GET /messages/threads` — every thread the caller participates in,
/// most recent activity first.
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ThreadListResponse>, ApiError> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.list_threads_for_user(&uid))
        .await
        .map_err(join_err)?
        .map_err(ApiError::Internal)?;

    let threads = rows.into_iter().map(summary_from_row).collect();
    Ok(Json(ThreadListResponse { threads }))
}

/// `GET /messages/threads/{id}` — all messages of one thread in the
/// invariant total order (created_at, then id).
pub async fn get_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let db = state.db.clone();
    let tid = thread_id.to_string();

    let (thread, rows) = tokio::task::spawn_blocking(move || {
        let thread = db.get_thread(&tid)?;
        let rows = db.get_thread_messages(&tid)?;
        anyhow::Ok((thread, rows))
    })
    .await
    .map_err(join_err)?
    .map_err(ApiError::Internal)?;

    let thread = thread.ok_or(ApiError::NotFound)?;
    let uid = claims.sub.to_string();
    if thread.participant_a != uid && thread.participant_b != uid {
        return Err(ApiError::Forbidden);
    }

    let messages = rows.into_iter().map(message_from_row).collect();
    Ok(Json(MessageListResponse { messages }))
}

/// `POST /messages/threads` — resolve the recipient, then create the thread
/// and its first message in one transaction: a thread is never observable
/// without a message. Fan-out fires after the commit, server-side.
pub async fn create_thread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<CreateThreadResponse>), ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("message content is empty".into()));
    }

    let db = state.db.clone();
    let email = req.recipient.clone();
    let recipient = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(join_err)?
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;

    let recipient_id: Uuid = recipient
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;
    if recipient_id == claims.sub {
        return Err(ApiError::Validation("cannot open a thread with yourself".into()));
    }

    let thread_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();
    let now = utc_now_micros();
    let created_at = now.to_rfc3339_opts(SecondsFormat::Micros, true);

    let db = state.db.clone();
    let (tid, sid, mid, subject, content, ts) = (
        thread_id.to_string(),
        claims.sub.to_string(),
        message_id.to_string(),
        req.subject.clone(),
        req.content.clone(),
        created_at.clone(),
    );
    tokio::task::spawn_blocking(move || {
        db.create_thread_with_message(
            &tid,
            &sid,
            &recipient.id,
            subject.as_deref(),
            &mid,
            &content,
            &ts,
        )
    })
    .await
    .map_err(join_err)?
    .map_err(ApiError::Internal)?;

    let thread = Thread {
        id: thread_id,
        participants: [claims.sub, recipient_id],
        subject: req.subject,
        created_at: now,
    };
    let message = Message {
        id: message_id,
        thread_id,
        sender_id: claims.sub,
        sender_username: claims.username.clone(),
        content: req.content,
        created_at: now,
    };

    // Push derives from the durable row just committed; the response never
    // waits on delivery.
    state.router.notify_message(&message, recipient_id).await;

    Ok((
        StatusCode::CREATED,
        Json(CreateThreadResponse { thread, message }),
    ))
}

/// `POST /messages/threads/{id}/messages` — append to an existing thread.
/// Persists synchronously, then fans out; appends on one thread are
/// sequenced so pushes go out in commit order.
pub async fn append_message(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AppendMessageRequest>,
) -> Result<(StatusCode, Json<AppendMessageResponse>), ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("message content is empty".into()));
    }

    let db = state.db.clone();
    let tid = thread_id.to_string();
    let thread = tokio::task::spawn_blocking(move || db.get_thread(&tid))
        .await
        .map_err(join_err)?
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound)?;

    let uid = claims.sub.to_string();
    let recipient = if thread.participant_a == uid {
        &thread.participant_b
    } else if thread.participant_b == uid {
        &thread.participant_a
    } else {
        return Err(ApiError::Forbidden);
    };
    let recipient_id: Uuid = recipient
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt participant id: {}", e)))?;

    // Sequence persist + publish per thread so two racing appends can never
    // push out of commit order.
    let _order = state.router.lock_thread(thread_id).await;

    let message_id = Uuid::new_v4();
    let now = utc_now_micros();
    let created_at = now.to_rfc3339_opts(SecondsFormat::Micros, true);

    let db = state.db.clone();
    let (tid, mid, sid, content, ts) = (
        thread_id.to_string(),
        message_id.to_string(),
        uid,
        req.content.clone(),
        created_at.clone(),
    );
    tokio::task::spawn_blocking(move || db.insert_message(&mid, &tid, &sid, &content, &ts))
        .await
        .map_err(join_err)?
        .map_err(ApiError::Internal)?;

    let message = Message {
        id: message_id,
        thread_id,
        sender_id: claims.sub,
        sender_username: claims.username.clone(),
        content: req.content,
        created_at: now,
    };

    state.router.notify_message(&message, recipient_id).await;

    Ok((
        StatusCode::CREATED,
        Json(AppendMessageResponse { message }),
    ))
}

/// Now, truncated to microseconds so the stored RFC3339 string and the
/// in-memory response timestamp round-trip to the same instant.
fn utc_now_micros() -> DateTime<Utc> {
    use chrono::Timelike;
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

fn join_err(e: tokio::task::JoinError) -> ApiError {
    error!("spawn_blocking join error: {}", e);
    ApiError::Internal(anyhow::anyhow!("task join error: {}", e))
}

fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') stores "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", what, raw, e);
            DateTime::default()
        })
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id"),
        thread_id: parse_uuid(&row.thread_id, "thread_id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        sender_username: row.sender_username,
        content: row.content,
        created_at: parse_timestamp(&row.created_at, "message created_at"),
    }
}

fn summary_from_row(row: ThreadSummaryRow) -> ThreadSummary {
    ThreadSummary {
        id: parse_uuid(&row.id, "thread id"),
        subject: row.subject,
        counterpart: Participant {
            id: parse_uuid(&row.counterpart_id, "counterpart id"),
            email: row.counterpart_email,
            username: row.counterpart_username,
        },
        created_at: parse_timestamp(&row.created_at, "thread created_at"),
        last_activity: parse_timestamp(&row.last_activity, "last_activity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use meridian_db::Database;
    use meridian_gateway::registry::Registry;
    use meridian_gateway::router::Router;
    use meridian_types::events::GatewayEvent;

    use crate::auth::AppStateInner;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            router: Router::new(Registry::new()),
        })
    }

    fn seed_user(state: &AppState, email: &str, username: &str) -> Claims {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(&id.to_string(), email, username, "hash", false)
            .unwrap();
        Claims {
            sub: id,
            username: username.to_string(),
            is_admin: false,
            exp: 0,
        }
    }

    async fn open_thread(
        state: &AppState,
        sender: &Claims,
        recipient_email: &str,
        content: &str,
    ) -> CreateThreadResponse {
        let (status, Json(resp)) = create_thread(
            State(state.clone()),
            Extension(sender.clone()),
            Json(CreateThreadRequest {
                recipient: recipient_email.to_string(),
                subject: Some("Project Q".to_string()),
                content: content.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        resp
    }

    #[tokio::test]
    async fn unresolved_recipient_persists_nothing() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");

        let err = create_thread(
            State(state.clone()),
            Extension(a.clone()),
            Json(CreateThreadRequest {
                recipient: "nobody@example.com".to_string(),
                subject: None,
                content: "hello?".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::NotFound));

        // No thread, no message left behind.
        assert!(state.db.list_threads_for_user(&a.sub.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");
        seed_user(&state, "b@example.com", "b");

        let err = create_thread(
            State(state.clone()),
            Extension(a),
            Json(CreateThreadRequest {
                recipient: "b@example.com".to_string(),
                subject: None,
                content: "   ".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn non_participant_append_is_forbidden_and_not_persisted() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");
        seed_user(&state, "b@example.com", "b");
        let outsider = seed_user(&state, "c@example.com", "c");

        let created = open_thread(&state, &a, "b@example.com", "hi").await;

        let err = append_message(
            State(state.clone()),
            Path(created.thread.id),
            Extension(outsider),
            Json(AppendMessageRequest {
                content: "let me in".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden));

        let rows = state
            .db
            .get_thread_messages(&created.thread.id.to_string())
            .unwrap();
        assert_eq!(rows.len(), 1, "forbidden append must not persist");
    }

    #[tokio::test]
    async fn append_to_unknown_thread_is_not_found() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");

        let err = append_message(
            State(state.clone()),
            Path(Uuid::new_v4()),
            Extension(a),
            Json(AppendMessageRequest {
                content: "hello".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn messages_forbidden_for_outsiders() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");
        seed_user(&state, "b@example.com", "b");
        let outsider = seed_user(&state, "c@example.com", "c");

        let created = open_thread(&state, &a, "b@example.com", "hi").await;

        let err = get_messages(
            State(state.clone()),
            Path(created.thread.id),
            Extension(outsider),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn conversation_round_trip_with_live_pushes() {
        let state = test_state();
        let registry = state.router.registry().clone();
        let a = seed_user(&state, "usera@example.com", "userA");
        let b = seed_user(&state, "userb@example.com", "userB");

        // B is online before the thread exists — registered under the
        // identity channel only.
        let (b_conn, mut b_rx) = registry.register(b.sub, false).await;

        let created = open_thread(&state, &a, "userb@example.com", "Hi, starting this up").await;
        assert_eq!(created.thread.participants, [a.sub, b.sub]);
        assert_eq!(created.message.content, "Hi, starting this up");

        // B receives the push on the identity channel.
        match b_rx.recv().await {
            Some(GatewayEvent::MessageReceived { thread_id, message }) => {
                assert_eq!(thread_id, created.thread.id);
                assert_eq!(message.id, created.message.id);
                assert_eq!(message.content, "Hi, starting this up");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // B opens the thread; A is online but not viewing it.
        registry.subscribe(b_conn, created.thread.id).await;
        let (_a_conn, mut a_rx) = registry.register(a.sub, false).await;

        let (_, Json(reply)) = append_message(
            State(state.clone()),
            Path(created.thread.id),
            Extension(b.clone()),
            Json(AppendMessageRequest {
                content: "Got it, thanks".to_string(),
            }),
        )
        .await
        .unwrap();

        match a_rx.recv().await {
            Some(GatewayEvent::MessageReceived { message, .. }) => {
                assert_eq!(message.id, reply.message.id);
                assert_eq!(message.sender_id, b.sub);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Both participants read the same two messages in send order.
        for who in [&a, &b] {
            let Json(listing) = get_messages(
                State(state.clone()),
                Path(created.thread.id),
                Extension(who.clone()),
            )
            .await
            .unwrap();
            let contents: Vec<&str> =
                listing.messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["Hi, starting this up", "Got it, thanks"]);
        }

        // The thread list shows the counterpart and the latest activity.
        let Json(threads) = list_threads(State(state.clone()), Extension(a.clone()))
            .await
            .unwrap();
        assert_eq!(threads.threads.len(), 1);
        assert_eq!(threads.threads[0].counterpart.username, "userB");
        assert_eq!(threads.threads[0].last_activity, reply.message.created_at);
    }

    #[tokio::test]
    async fn self_thread_rejected() {
        let state = test_state();
        let a = seed_user(&state, "a@example.com", "a");

        let err = create_thread(
            State(state.clone()),
            Extension(a),
            Json(CreateThreadRequest {
                recipient: "a@example.com".to_string(),
                subject: None,
                content: "hi me".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
