//! `/services` + `/services/{name}` (+ `/port`), grounded on
//! `server/handlers_service.go`'s `ListService`/`GetService`/`PostService`/
//! `DeleteService`. The Go original never implements the service's own
//! liveness loop (its `runLiveness()` call is left as a `todo`); we mark a
//! service Running as soon as its forward starts rather than carrying that
//! gap forward.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;

use yetis_common::env::current_yetis_port;
use yetis_common::ServiceSpec;
use yetis_forward::service_forward_key;
use yetis_store::ProcessStatus;

use crate::error::ApiError;
use crate::supervisor::Supervisor;

#[derive(Serialize)]
pub struct ServiceView {
    pub name: String,
    pub port: u16,
    pub selector_name: String,
    pub deployment_port: Option<u16>,
    pub status: String,
}

#[derive(Serialize)]
pub struct PostServiceResponse {
    pub existed: bool,
}

fn to_view(name: String, service: yetis_store::Service) -> ServiceView {
    ServiceView {
        name,
        port: service.spec.port,
        selector_name: service.spec.selector.name,
        deployment_port: service.deployment_port,
        status: service.status.to_string(),
    }
}

pub async fn list_services(State(supervisor): State<Supervisor>) -> Json<Vec<ServiceView>> {
    let mut items: Vec<ServiceView> = supervisor
        .services
        .list()
        .into_iter()
        .map(|(name, s)| to_view(name, s))
        .collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Json(items)
}

pub async fn get_service(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
) -> Result<Json<ServiceView>, ApiError> {
    let service = supervisor
        .services
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("service for '{name}' not found")))?;
    Ok(Json(to_view(name, service)))
}

pub async fn post_service(
    State(supervisor): State<Supervisor>,
    Json(spec): Json<ServiceSpec>,
) -> Result<Json<PostServiceResponse>, ApiError> {
    if spec.selector.name.trim().is_empty() {
        return Err(ApiError::BadRequest("selector.name is required".into()));
    }
    let existed = supervisor.services.get(&spec.selector.name).is_some();
    if existed {
        delete_service_internal(&supervisor, &spec.selector.name).await?;
    }

    let (_, dep) = supervisor
        .deployments
        .get_by_root_name(&spec.selector.name)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "selected deployment '{}' doesn't exist",
                spec.selector.name
            ))
        })?;

    if yetis_netutil::probe(spec.port, Duration::from_millis(100)).await {
        return Err(ApiError::Conflict(format!(
            "service port {} already occupied",
            spec.port
        )));
    }

    let target_port =
        current_yetis_port(&dep.spec.env).unwrap_or(dep.spec.liveness.tcp_socket.port);

    supervisor.services.first_save(spec.clone()).await?;

    let handle = supervisor
        .forward_backend
        .start(spec.port, target_port)
        .await
        .map_err(|e| {
            ApiError::Internal(format!("failed to start service forward: {e}"))
        })?;
    supervisor
        .forward_registry
        .insert(&service_forward_key(&spec.selector.name), handle);

    supervisor
        .services
        .update(&spec, ProcessStatus::Running, Some(target_port))
        .await?;

    Ok(Json(PostServiceResponse { existed }))
}

async fn delete_service_internal(supervisor: &Supervisor, name: &str) -> Result<(), ApiError> {
    supervisor
        .services
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("service for '{name}' not found")))?;
    let key = service_forward_key(name);
    if let Some(handle) = supervisor.forward_registry.remove(&key) {
        let _ = supervisor.forward_backend.stop(handle).await;
    }
    supervisor.services.delete(name).await;
    Ok(())
}

pub async fn delete_service(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    delete_service_internal(&supervisor, &name).await
}

/// `PUT /services/{name}/port`: retargets a running service's forward at a
/// new backend port without tearing it down, grounded on
/// `store_service.go:updateService`'s reuse path.
pub async fn update_service_port(
    State(supervisor): State<Supervisor>,
    Path(name): Path<String>,
    Json(new_port): Json<u16>,
) -> Result<(), ApiError> {
    let service = supervisor
        .services
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("service for '{name}' not found")))?;

    let key = service_forward_key(&name);
    let handle = supervisor
        .forward_registry
        .retarget(&key, new_port)
        .ok_or_else(|| ApiError::Internal(format!("service '{name}' has no active forward")))?;
    supervisor
        .forward_backend
        .update_target(&handle, new_port)
        .await?;
    supervisor
        .services
        .update(&service.spec, service.status, Some(new_port))
        .await?;
    Ok(())
}

pub fn router() -> Router<Supervisor> {
    Router::new()
        .route("/services", get(list_services).post(post_service))
        .route("/services/{name}", get(get_service).delete(delete_service))
        .route("/services/{name}/port", put(update_service_port))
}
