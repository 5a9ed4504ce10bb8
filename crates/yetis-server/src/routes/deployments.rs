//! `/deployments` + `/deployments/{name}` (+ `/restart`), grounded on
//! `server/handlers_deployment.go`'s `ListDeployment`/`GetDeployment`/
//! `PostDeployment`/`DeleteDeployment`/`RestartDeployment`.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use yetis_common::{age_string, root_name, DeploymentSpec};

use crate::error::ApiError;
use crate::supervisor::Supervisor;

#[derive(Serialize)]
pub struct DeploymentListItem {
    pub name: String,
    pub status: String,
    pub pid: u32,
    pub restarts: u32,
    pub age: String,
    pub command: String,
    pub port_info: String,
}

#[derive(Serialize)]
pub struct DeploymentDetail {
    pub name: String,
    pub status: String,
    pub pid: u32,
    pub restarts: u32,
    pub age: String,
    pub log_path: String,
    pub spec: DeploymentSpec,
}

#[derive(Serialize)]
pub struct PostDeploymentResponse {
    pub existed: bool,
}

fn age_of(created_at: chrono::DateTime<Utc>) -> String {
    age_string(
        Utc::now()
            .signed_duration_since(created_at)
            .to_std()
            .unwrap_or_default(),
    )
}

/// Shows the forwarded listen port next to the backend port when the
/// deployment owns an ingress forward, otherwise just its liveness port.
fn port_info(supervisor: &Supervisor, name: &str, liveness_port: u16) -> String {
    match supervisor.forward_registry.get(name) {
        Some(handle) => format!("{}->{}", handle.listen_port(), liveness_port),
        None => liveness_port.to_string(),
    }
}

pub async fn list_deployments(
    State(supervisor): State<Supervisor>,
) -> Json<Vec<DeploymentListItem>> {
    let mut items: Vec<DeploymentListItem> = supervisor
        .deployments
        .list()
        .into_iter()
        .map(|(name, dep)| {
            let port_info = port_info(&supervisor, &name, dep.spec.liveness.tcp_socket.port);
            DeploymentListItem {
                name,
                status: dep.status.to_string(),
                pid: dep.pid,
                restarts: dep.restarts,
                age: age_of(dep.created_at),
                command: dep.spec.cmd,
                port_info,
            }
        })
        .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Json(items)
}

pub async fn get_deployment(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
) -> Result<Json<DeploymentDetail>, ApiError> {
    let dep = supervisor
        .deployments
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("deployment '{name}' doesn't exist")))?;
    Ok(Json(DeploymentDetail {
        name,
        status: dep.status.to_string(),
        pid: dep.pid,
        restarts: dep.restarts,
        age: age_of(dep.created_at),
        log_path: dep.log_path,
        spec: dep.spec,
    }))
}

/// `POST /deployments` doubles as apply: an unseen root name is created
/// fresh, an existing one (possibly live under a rolling-successor `-N`
/// suffix) is restarted in place with the new spec substituted in (§4.F
/// "Apply-restart"), matching §6's `{existed: bool}` response shape.
pub async fn post_deployment(
    State(supervisor): State<Supervisor>,
    Json(spec): Json<DeploymentSpec>,
) -> Result<Json<PostDeploymentResponse>, ApiError> {
    let existing = supervisor.deployments.get_by_root_name(root_name(&spec.name));
    let existed = existing.is_some();
    match existing {
        Some((live_name, _)) => supervisor.restart.apply_restart(&live_name, spec).await?,
        None => supervisor.restart.create(spec).await?,
    }
    Ok(Json(PostDeploymentResponse { existed }))
}

pub async fn delete_deployment(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    supervisor.restart.delete(&name).await?;
    Ok(())
}

pub async fn restart_deployment(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    supervisor.restart.restart(&name).await?;
    Ok(())
}

pub fn router() -> Router<Supervisor> {
    Router::new()
        .route("/deployments", get(list_deployments).post(post_deployment))
        .route(
            "/deployments/{name}",
            get(get_deployment).delete(delete_deployment),
        )
        .route("/deployments/{name}/restart", put(restart_deployment))
}
