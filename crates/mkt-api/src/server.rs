//! HTTP API Server
//!
//! Starts and manages the axum-based HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mkt_core::{ApiConfig, ChatModel, Config, SessionManager};

use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn ChatModel>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn ChatModel>, sessions: Arc<SessionManager>) -> Self {
        Self {
            config: Arc::new(config),
            model,
            sessions,
        }
    }
}

/// Build the CORS layer. No configured origins means any origin.
fn cors_layer(api: &ApiConfig) -> CorsLayer {
    match &api.allowed_origins {
        None => CorsLayer::permissive(),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin: {}", origin);
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Build the application router: API routes, frontend and middleware
pub fn build_router(state: AppState) -> Router {
    let api = &state.config.api;
    let static_dir = Path::new(&api.static_dir);

    Router::new()
        .merge(routes())
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(api))
        .with_state(state)
}

/// Start the HTTP API server and run until `shutdown` resolves
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let port = state.config.api.port;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP API stopped");
    Ok(())
}
