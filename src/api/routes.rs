//! API route definitions.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::identity::require_known_peer;
use crate::ws::ws_handler;

use super::handlers;
use super::state::AppState;

/// Create the application router.
///
/// The caller must serve it with `ConnectInfo<SocketAddr>` available.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let identities = state.identities.clone();

    // Everything here requires an allow-listed peer address.
    let mut protected = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/messages", get(handlers::list_messages))
        .route(
            "/api/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/api/files/{file_id}", get(handlers::download_file))
        .route("/api/myname", get(handlers::my_name));

    protected = match &state.static_dir {
        Some(dir) => protected
            .nest_service("/static", ServeDir::new(dir))
            .fallback_service(ServeFile::new(dir.join("index.html"))),
        None => protected.fallback(handlers::not_found),
    };

    let protected = protected
        .layer(middleware::from_fn_with_state(identities, require_known_peer))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(handlers::health))
        .with_state(state);

    public.merge(protected).layer(trace_layer)
}
