//! Operator API server.

mod handlers;

pub use handlers::*;

use crate::config::MonitorConfig;
use crate::db::Store;
use crate::monitor::Monitor;
use crate::probe::HttpChecker;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub store: Arc<Store>,
    pub monitor: Monitor,
    /// Used to probe a URL before it is added.
    pub checker: HttpChecker,
}

/// Web server for the operator API.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));

        tracing::info!("Operator API listening on {}", addr);
        if self.state.config.admin_token.is_none() {
            tracing::warn!("UPTIME_ADMIN_TOKEN is not set; every API request will be refused");
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router(self.state.clone())).await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/logs", get(handlers::handle_get_logs))
        .route("/api/targets", get(handlers::handle_get_targets))
        .route("/api/targets", post(handlers::handle_create_target))
        .route("/api/targets/{id}", delete(handlers::handle_delete_target))
        .route("/api/targets/{id}/enabled", put(handlers::handle_set_enabled))
        .route("/api/targets/{id}/channels/{channel}", put(handlers::handle_set_channel))
        .route("/api/config/export", get(handlers::handle_export_config))
        .route("/api/config/import", post(handlers::handle_import_config))
        .route("/api/pass", post(handlers::handle_trigger_pass))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// Reject requests without the configured bearer token.
async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return handlers::error_response(
            StatusCode::FORBIDDEN,
            "forbidden",
            "operator API is disabled: no admin token configured",
        );
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if tokens_match(token, expected) => next.run(req).await,
        Some(_) => handlers::error_response(StatusCode::FORBIDDEN, "forbidden", "invalid admin token"),
        None => handlers::error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing bearer token",
        ),
    }
}

/// Compare tokens without short-circuiting on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
