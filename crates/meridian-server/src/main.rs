use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use meridian_api::auth::{self, AppState, AppStateInner};
use meridian_api::events;
use meridian_api::middleware::require_auth;
use meridian_api::threads;
use meridian_db::Database;
use meridian_gateway::connection;
use meridian_gateway::registry::Registry;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    registry: Registry,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meridian=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("MERIDIAN_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("MERIDIAN_DB_PATH").unwrap_or_else(|_| "meridian.db".into());
    let host = std::env::var("MERIDIAN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("MERIDIAN_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let router = meridian_gateway::router::Router::new(registry.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        router,
    });

    let state = ServerState {
        app: app_state.clone(),
        registry,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/messages/threads", get(threads::list_threads))
        .route("/messages/threads", post(threads::create_thread))
        .route("/messages/threads/{thread_id}", get(threads::get_messages))
        .route(
            "/messages/threads/{thread_id}/messages",
            post(threads::append_message),
        )
        .route("/events/project", post(events::ingest_project_event))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Meridian server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.registry,
            state.app.db.clone(),
            state.jwt_secret,
        )
    })
}
