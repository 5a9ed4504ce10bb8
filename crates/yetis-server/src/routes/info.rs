use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::supervisor::Supervisor;

#[derive(Serialize)]
pub struct InfoResponse {
    pub version: &'static str,
    pub deployments_count: usize,
    pub services_count: usize,
}

/// `GET /info`, grounded on `server/run.go:Info` (absent from the retrieval
/// pack's function bodies, so the shape is taken directly from §6's table).
pub async fn info(State(supervisor): State<Supervisor>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        deployments_count: supervisor.deployments.len(),
        services_count: supervisor.services.list().len(),
    })
}
