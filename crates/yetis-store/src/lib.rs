//! In-memory deployment/service tables (§4.C "Store").
//!
//! Grounded on `server/store_deployment.go` and `server/store_service.go`.
//! Both stores use the same shape as the teacher's `Approvals` service:
//! an `Arc<DashMap<..>>` for lock-free reads, with a dedicated mutex
//! serializing multi-step writes.

mod deployment;
mod service;
mod status;

pub use deployment::{Deployment, DeploymentStore, DeploymentStoreError};
pub use service::{Service, ServiceStore, ServiceStoreError};
pub use status::ProcessStatus;
