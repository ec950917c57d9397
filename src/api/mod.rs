//! HTTP router for slack-connect.
//!
//! - /slack  — OAuth linking, send, schedule, list, cancel
//! - /status — Health check

pub mod routes;

use crate::SharedState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::status))
        .route("/status", get(routes::status))
        .nest("/slack", routes::slack_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
