pub mod deployments;
pub mod info;
pub mod services;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::supervisor::Supervisor;

/// Builds the full control-plane router (§6 "Control plane"), grounded on
/// the teacher's `routes/mod.rs` merge-of-routers shape.
pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/info", get(info::info))
        .merge(deployments::router())
        .merge(services::router())
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}
