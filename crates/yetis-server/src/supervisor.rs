//! Wires the store, process adapter, forward plane, liveness controller and
//! restart engine into one shared `axum` app state, grounded on the
//! teacher's `DeploymentImpl` (one struct holding every subsystem, cloned
//! cheaply into each handler via `State`).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use yetis_alerting::Alerter;
use yetis_common::config::ServerConfig;
use yetis_forward::{service_forward_key, ForwardBackend, ForwardRegistry, KernelForward, UserspaceForward};
use yetis_liveness::LivenessController;
use yetis_restart::RestartEngine;
use yetis_store::{DeploymentStore, ServiceStore};

pub const YETIS_SERVER_PORT: u16 = 54129;

#[derive(Clone)]
pub struct Supervisor {
    pub deployments: DeploymentStore,
    pub services: ServiceStore,
    pub forward_registry: Arc<ForwardRegistry>,
    pub forward_backend: Arc<dyn ForwardBackend>,
    pub alerter: Alerter,
    pub liveness: LivenessController,
    pub restart: RestartEngine,
}

impl Supervisor {
    pub fn new(config: ServerConfig) -> Self {
        let deployments = DeploymentStore::new();
        let services = ServiceStore::new();
        let forward_registry = Arc::new(ForwardRegistry::new());
        let forward_backend: Arc<dyn ForwardBackend> = match std::env::var("YETIS_FORWARD_BACKEND").as_deref() {
            Ok("kernel") => Arc::new(KernelForward::default()),
            _ => Arc::new(UserspaceForward::new()),
        };
        let alerter = match config.alerting.mail {
            Some(mail) => match mail.validate() {
                Ok(()) => Alerter::new(Some(mail)),
                Err(e) => {
                    warn!(error = e, "mail alerting config is invalid, alerting disabled");
                    Alerter::disabled()
                }
            },
            None => Alerter::disabled(),
        };
        let liveness = LivenessController::new(
            deployments.clone(),
            services.clone(),
            forward_registry.clone(),
            forward_backend.clone(),
            alerter.clone(),
        );
        let restart = RestartEngine::new(
            deployments.clone(),
            services.clone(),
            forward_registry.clone(),
            forward_backend.clone(),
            liveness.clone(),
        );
        Self {
            deployments,
            services,
            forward_registry,
            forward_backend,
            alerter,
            liveness,
            restart,
        }
    }

    /// Deletes every deployment with a per-item budget, then every service,
    /// grounded on `server/server.go`'s `deleteDeploymentsGracefully` /
    /// `deleteServicesGracefully`.
    pub async fn shutdown_gracefully(&self) {
        for (name, _) in self.deployments.list() {
            let outcome = tokio::time::timeout(Duration::from_secs(10), self.restart.delete(&name)).await;
            match outcome {
                Ok(Ok(())) => info!(name, "deleted deployment"),
                Ok(Err(e)) => warn!(name, error = %e, "failed to delete deployment"),
                Err(_) => warn!(name, "timed out deleting deployment"),
            }
        }
        for (name, service) in self.services.list() {
            let key = service_forward_key(&name);
            if let Some(handle) = self.forward_registry.remove(&key) {
                let _ = self.forward_backend.stop(handle).await;
            }
            self.services.delete(&name).await;
            let _ = service;
            info!(name, "deleted service");
        }
    }
}
