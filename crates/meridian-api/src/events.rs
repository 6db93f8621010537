use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::debug;

use meridian_types::api::{Claims, ProjectEventRequest};
use meridian_types::models::ProjectChangeEvent;

use crate::auth::AppState;
use crate::error::ApiError;

/// `POST /events/project` — ingest a committed project change from the
/// trusted project service and fan it out to the owner's identity channel
/// and the admin dashboard channel. Fan-out is triggered here, server-side
/// after the authoritative write, never by a client push hint.
pub async fn ingest_project_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProjectEventRequest>,
) -> Result<StatusCode, ApiError> {
    // Only staff-scoped identities may inject project facts.
    if !claims.is_admin {
        return Err(ApiError::Forbidden);
    }

    debug!(
        "project {} {:?} for owner {}",
        req.project_id, req.change_kind, req.owner_id
    );

    let change = ProjectChangeEvent {
        project_id: req.project_id,
        change_kind: req.change_kind,
        snapshot: req.snapshot,
    };
    state.router.notify_project_change(change, req.owner_id).await;

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use meridian_db::Database;
    use meridian_gateway::registry::Registry;
    use meridian_gateway::router::Router;
    use meridian_types::events::GatewayEvent;
    use meridian_types::models::ProjectChangeKind;
    use uuid::Uuid;

    use crate::auth::AppStateInner;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            router: Router::new(Registry::new()),
        })
    }

    fn claims(is_admin: bool) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: "staff".into(),
            is_admin,
            exp: 0,
        }
    }

    fn request(owner: Uuid) -> ProjectEventRequest {
        ProjectEventRequest {
            project_id: Uuid::new_v4(),
            change_kind: ProjectChangeKind::Created,
            snapshot: serde_json::json!({"name": "Website refresh"}),
            owner_id: owner,
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_inject_events() {
        let state = test_state();
        let err = ingest_project_event(
            State(state),
            Extension(claims(false)),
            Json(request(Uuid::new_v4())),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn event_reaches_owner_and_admin_dashboards() {
        let state = test_state();
        let registry = state.router.registry().clone();
        let owner = Uuid::new_v4();

        let (_o, mut owner_rx) = registry.register(owner, false).await;
        let (_d, mut dash_rx) = registry.register(Uuid::new_v4(), true).await;

        let status = ingest_project_event(
            State(state),
            Extension(claims(true)),
            Json(request(owner)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        assert!(matches!(
            owner_rx.recv().await,
            Some(GatewayEvent::ProjectCreated { .. })
        ));
        assert!(matches!(
            dash_rx.recv().await,
            Some(GatewayEvent::AdminProjectUpdate { .. })
        ));
    }
}
