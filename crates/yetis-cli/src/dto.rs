//! Response shapes mirrored from `yetis-server`'s route DTOs (§6). Kept as
//! independent definitions rather than a shared dependency, since the CLI is
//! an external collaborator that only knows the HTTP contract, not the
//! daemon's internals.

use serde::{Deserialize, Serialize};
use yetis_common::DeploymentSpec;

#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub deployments_count: usize,
    pub services_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentListItem {
    pub name: String,
    pub status: String,
    pub pid: u32,
    pub restarts: u32,
    pub age: String,
    pub command: String,
    pub port_info: String,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentDetail {
    pub name: String,
    pub status: String,
    pub pid: u32,
    pub restarts: u32,
    pub age: String,
    pub log_path: String,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub port: u16,
    pub selector_name: String,
    pub deployment_port: Option<u16>,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub existed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
