//! HTTP Gateway
//!
//! Thin request/response mapping over the session manager: validate, admit,
//! start, then poll. All state the handlers touch lives in one context
//! object, constructed at process start and torn down explicitly — nothing
//! hangs off process-wide globals.

pub mod handlers;

use crate::session::{PairingWaiters, SessionDirs, SessionManager, SessionStore};
use axum::Router;
use axum::routing::{get, post};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Everything the HTTP handlers need, injected rather than ambient.
pub struct AppContext {
    pub store: Arc<SessionStore>,
    pub manager: Arc<SessionManager>,
    pub waiters: Arc<PairingWaiters>,
    pub dirs: SessionDirs,
    /// How long `/api/pair` waits for a code before giving up.
    pub pairing_timeout: Duration,
    pub started_at: Instant,
}

pub type AppState = Arc<AppContext>;

/// Build the router. `public_dir` serves the pairing form at `/` when the
/// directory exists.
pub fn router(state: AppState, public_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/api/pair", post(handlers::pair))
        .route("/api/sessions", get(handlers::list_sessions))
        .route(
            "/api/session/:session_id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/health", get(handlers::health))
        .with_state(state);

    if let Some(dir) = public_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http())
}
