//! Restart engine (§4.F "Restart engine").
//!
//! Grounded on `server/handlers_deployment.go`'s `startDeploymentWithEnv`/
//! `RestartDeployment` for the Create/Recreate shape, generalized to the
//! full RollingUpdate successor-and-cutover flow the specification adds:
//! the retrieved Go revision only ever terminates-then-relaunches in place,
//! it never actually creates a separate successor deployment to wait on
//! before cutting the port-forward over, so that part is built from the
//! prose description directly rather than a literal translation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use yetis_common::env::{current_yetis_port, inject_yetis_port};
use yetis_common::{root_name, upgrade_name, DeploymentSpec, StrategyType, ValidationError};
use yetis_forward::{service_forward_key, ForwardBackend, ForwardError, ForwardRegistry};
use yetis_liveness::LivenessController;
use yetis_netutil::NetutilError;
use yetis_process::{launch, terminate_process_group, ProcessError, TerminateError};
use yetis_store::{DeploymentStore, DeploymentStoreError, ProcessStatus, ServiceStore};

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("deployment spec is invalid: {0}")]
    Validation(#[source] ValidationError),
    #[error("deployment '{0}' already exists")]
    AlreadyExists(String),
    #[error("deployment '{0}' doesn't exist")]
    NotFound(String),
    #[error("liveness port {0} is already in use")]
    FixedPortInUse(u16),
    #[error("failed to allocate a backend port: {0}")]
    Netutil(#[source] NetutilError),
    #[error(transparent)]
    Store(#[from] DeploymentStoreError),
    #[error("failed to launch process: {0}")]
    Launch(#[source] ProcessError),
    #[error("failed to terminate process: {0}")]
    Terminate(#[source] TerminateError),
    #[error("port-forward operation failed: {0}")]
    Forward(#[source] ForwardError),
    #[error("'{0}' changed strategy type or proxy port; delete and recreate instead")]
    IncompatibleApply(String),
    #[error("rolling-update successor '{0}' never reached Running")]
    SuccessorNeverBecameRunning(String),
}

/// Coordinates the store, process adapter, port-forward plane and liveness
/// controller to implement the four restart flows (§4.F): Create, Recreate,
/// RollingUpdate, and Apply-restart.
#[derive(Clone)]
pub struct RestartEngine {
    store: DeploymentStore,
    services: ServiceStore,
    forward_registry: Arc<ForwardRegistry>,
    forward_backend: Arc<dyn ForwardBackend>,
    liveness: LivenessController,
}

impl RestartEngine {
    pub fn new(
        store: DeploymentStore,
        services: ServiceStore,
        forward_registry: Arc<ForwardRegistry>,
        forward_backend: Arc<dyn ForwardBackend>,
        liveness: LivenessController,
    ) -> Self {
        Self {
            store,
            services,
            forward_registry,
            forward_backend,
            liveness,
        }
    }

    /// Retargets every Service whose selector matches `deployment_root`, so
    /// a Service's backend port tracks its selected deployment across a
    /// restart/rolling-update cutover, the same way the deployment's own
    /// forward is retargeted.
    async fn retarget_selecting_services(&self, deployment_root: &str, new_backend_port: u16) {
        for (service_name, service) in self.services.list_selecting_root(deployment_root) {
            let key = service_forward_key(&service_name);
            if let Some(handle) = self.forward_registry.retarget(&key, new_backend_port) {
                if let Err(e) = self.forward_backend.update_target(&handle, new_backend_port).await {
                    warn!(service_name, error = %e, "failed to update service port-forward after restart");
                    continue;
                }
            }
            if let Err(e) = self
                .services
                .update(&service.spec, service.status, Some(new_backend_port))
                .await
            {
                warn!(service_name, error = %e, "failed to update service store after restart");
            }
        }
    }

    /// Create path (§4.F, steps 1-8). If the root name already exists
    /// (possibly as a rolling successor), delegates to the restart path
    /// instead of failing. Refuses if a fixed liveness port is reachable,
    /// then allocates a backend port, launches, and (if the spec carries an
    /// ingress port) stands up its port-forward before starting the
    /// liveness loop.
    pub async fn create(&self, spec: DeploymentSpec) -> Result<(), RestartError> {
        if let Some((live_name, _)) = self.store.get_by_root_name(root_name(&spec.name)) {
            return self.apply_restart(&live_name, spec).await;
        }
        if spec.liveness.tcp_socket.port != 0
            && yetis_netutil::probe(spec.liveness.tcp_socket.port, Duration::from_millis(100)).await
        {
            return Err(RestartError::FixedPortInUse(spec.liveness.tcp_socket.port));
        }

        let name = spec.name.clone();
        let proxy = spec.proxy;
        let launched = self.launch_new_deployment(spec).await?;

        if let Some(proxy) = proxy {
            if let Err(e) = self
                .forward_backend
                .start(proxy.port, launched.liveness.tcp_socket.port)
                .await
                .map(|handle| self.forward_registry.insert(&name, handle))
            {
                warn!(name, error = %e, "failed to start port-forward for new deployment, rolling back");
                if let Some(dep) = self.store.get(&name) {
                    let _ = terminate_process_group(dep.pid, dep.spec.liveness.period_duration()).await;
                }
                self.store.delete(&name).await;
                return Err(RestartError::Forward(e));
            }
        }

        self.liveness
            .start(&name, launched.liveness.initial_delay_duration(), launched.liveness.period_duration());
        Ok(())
    }

    /// Recreate restart (§4.F): terminate then relaunch in place, without
    /// ever running two instances at once.
    pub async fn restart_recreate(&self, name: &str) -> Result<(), RestartError> {
        self.liveness.cancel(name);
        let dep = self
            .store
            .get(name)
            .ok_or_else(|| RestartError::NotFound(name.to_string()))?;

        terminate_process_group(dep.pid, dep.spec.liveness.period_duration())
            .await
            .map_err(RestartError::Terminate)?;

        let new_spec = self.prepare_spec_for_launch(dep.spec.clone()).await?;
        self.store.update_launch(&new_spec, 0, String::new(), false).await?;
        let outcome = launch(&new_spec).await.map_err(RestartError::Launch)?;
        self.store
            .update_launch(&new_spec, outcome.pid, outcome.log_path, true)
            .await?;

        if let Some(handle) = self.forward_registry.retarget(name, new_spec.liveness.tcp_socket.port) {
            self.forward_backend
                .update_target(&handle, new_spec.liveness.tcp_socket.port)
                .await
                .map_err(RestartError::Forward)?;
        }
        self.retarget_selecting_services(root_name(name), new_spec.liveness.tcp_socket.port).await;

        self.liveness
            .start(name, new_spec.liveness.initial_delay_duration(), new_spec.liveness.period_duration());
        Ok(())
    }

    /// RollingUpdate restart (§4.F): brings up a `-N`-suffixed successor,
    /// waits for it to report Running, cuts the port-forward over to it,
    /// then tears down the predecessor.
    pub async fn restart_rolling_update(&self, name: &str) -> Result<(), RestartError> {
        let old_dep = self
            .store
            .get(name)
            .ok_or_else(|| RestartError::NotFound(name.to_string()))?;
        self.liveness.cancel(name);

        let successor_name = upgrade_name(name);
        if self.store.get(&successor_name).is_some() {
            return Err(RestartError::AlreadyExists(successor_name));
        }
        let mut successor_spec = old_dep.spec.clone();
        successor_spec.name = successor_name.clone();

        let successor = self.launch_new_deployment(successor_spec).await?;
        self.liveness.start(
            &successor_name,
            successor.liveness.initial_delay_duration(),
            successor.liveness.period_duration(),
        );

        let wait_budget = successor.liveness.initial_delay_duration()
            + successor.liveness.period_duration() * successor.liveness.failure_threshold
            + Duration::from_secs(10);
        if !self.wait_for_running(&successor_name, wait_budget).await {
            warn!(name, successor_name, "successor never reached Running, leaving it for inspection");
            return Err(RestartError::SuccessorNeverBecameRunning(successor_name));
        }

        if old_dep.spec.proxy.is_some() {
            if let Some(handle) = self.forward_registry.retarget(name, successor.liveness.tcp_socket.port) {
                self.forward_backend
                    .update_target(&handle, successor.liveness.tcp_socket.port)
                    .await
                    .map_err(RestartError::Forward)?;
                if let Some(handle) = self.forward_registry.remove(name) {
                    self.forward_registry.insert(&successor_name, handle);
                }
            }
        }
        self.retarget_selecting_services(root_name(name), successor.liveness.tcp_socket.port).await;

        // Let in-flight connections on the predecessor drain before it's killed.
        tokio::time::sleep(Duration::from_millis(50)).await;

        if let Err(e) = terminate_process_group(old_dep.pid, old_dep.spec.liveness.period_duration()).await {
            warn!(name, error = %e, "failed to terminate predecessor after rolling update");
        }
        self.store.delete(name).await;
        info!(name, successor_name, "rolling update complete");
        Ok(())
    }

    /// Dispatches to the Recreate or RollingUpdate flow per the
    /// deployment's own strategy, for the `PUT /deployments/{name}/restart`
    /// handler.
    pub async fn restart(&self, name: &str) -> Result<(), RestartError> {
        let dep = self
            .store
            .get(name)
            .ok_or_else(|| RestartError::NotFound(name.to_string()))?;
        match dep.spec.strategy.r#type {
            StrategyType::RollingUpdate => self.restart_rolling_update(name).await,
            StrategyType::Recreate => self.restart_recreate(name).await,
        }
    }

    /// Apply-restart (§4.F): re-applying an existing spec restarts it with
    /// the new spec substituted in, unless the strategy type or proxy port
    /// changed, which requires delete+recreate instead. `name` is the live
    /// store key, which may carry a rolling-successor `-N` suffix the
    /// incoming spec doesn't know about (e.g. re-applying the root name
    /// after a completed RollingUpdate), so the spec's name is pinned to it.
    pub async fn apply_restart(&self, name: &str, mut new_spec: DeploymentSpec) -> Result<(), RestartError> {
        let dep = self
            .store
            .get(name)
            .ok_or_else(|| RestartError::NotFound(name.to_string()))?;
        if dep.spec.incompatible_for_apply_restart(&new_spec) {
            return Err(RestartError::IncompatibleApply(name.to_string()));
        }
        new_spec.name = name.to_string();
        self.store
            .update_launch(&new_spec, dep.pid, dep.log_path.clone(), false)
            .await?;
        match new_spec.strategy.r#type {
            StrategyType::RollingUpdate => self.restart_rolling_update(name).await,
            StrategyType::Recreate => self.restart_recreate(name).await,
        }
    }

    /// Deletes a deployment: cancels its liveness loop, terminates its
    /// process, tears down its port-forward if any, and removes the store
    /// entry. Used both by the `DELETE` handler and graceful shutdown.
    pub async fn delete(&self, name: &str) -> Result<(), RestartError> {
        let dep = self
            .store
            .get(name)
            .ok_or_else(|| RestartError::NotFound(name.to_string()))?;
        self.liveness.cancel(name);
        terminate_process_group(dep.pid, dep.spec.liveness.period_duration())
            .await
            .map_err(RestartError::Terminate)?;
        if let Some(handle) = self.forward_registry.remove(name) {
            let _ = self.forward_backend.stop(handle).await;
        }
        self.store.delete(name).await;
        Ok(())
    }

    async fn launch_new_deployment(&self, spec: DeploymentSpec) -> Result<DeploymentSpec, RestartError> {
        spec.validate().map_err(RestartError::Validation)?;
        let spec = self.prepare_spec_for_launch(spec).await?;
        self.store.save(spec.clone(), false).await?;
        match launch(&spec).await {
            Ok(outcome) => {
                self.store
                    .update_launch(&spec, outcome.pid, outcome.log_path, false)
                    .await?;
                Ok(spec)
            }
            Err(e) => {
                self.store.delete(&spec.name).await;
                Err(RestartError::Launch(e))
            }
        }
    }

    /// Allocates a fresh backend port, injects `YETIS_PORT`, and points the
    /// liveness probe at it when the probe port was auto-assigned or was
    /// tracking the previous launch port (§3 "Entities", §6 "Environment
    /// substitution").
    async fn prepare_spec_for_launch(&self, mut spec: DeploymentSpec) -> Result<DeploymentSpec, RestartError> {
        let port = yetis_netutil::allocate_free_port()
            .await
            .map_err(RestartError::Netutil)?;
        let replaces_probe_port = spec.liveness.tcp_socket.port == 0
            || current_yetis_port(&spec.env) == Some(spec.liveness.tcp_socket.port);
        spec.env = inject_yetis_port(&spec.env, port);
        if replaces_probe_port {
            spec.liveness.tcp_socket.port = port;
        }
        Ok(spec)
    }

    async fn wait_for_running(&self, name: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.store.status(name) == Some(ProcessStatus::Running) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use yetis_common::{EnvVar, LivenessProbe, ProxySpec, TcpSocket};
    use yetis_forward::ForwardHandle;

    use super::*;

    struct NoopForward;

    #[async_trait]
    impl ForwardBackend for NoopForward {
        async fn start(&self, listen_port: u16, target_port: u16) -> Result<ForwardHandle, ForwardError> {
            Ok(ForwardHandle::Kernel {
                listen_port,
                target_port,
            })
        }
        async fn update_target(&self, _handle: &ForwardHandle, _new_target_port: u16) -> Result<(), ForwardError> {
            Ok(())
        }
        async fn stop(&self, _handle: ForwardHandle) -> Result<(), ForwardError> {
            Ok(())
        }
    }

    fn engine() -> RestartEngine {
        let store = DeploymentStore::new();
        let services = yetis_store::ServiceStore::new();
        let registry = Arc::new(ForwardRegistry::new());
        let forward = Arc::new(NoopForward);
        let liveness = LivenessController::new(
            store.clone(),
            services.clone(),
            registry.clone(),
            forward.clone(),
            yetis_alerting::Alerter::disabled(),
        );
        RestartEngine::new(store, services, registry, forward, liveness)
    }

    fn spec(name: &str) -> DeploymentSpec {
        DeploymentSpec {
            name: name.to_string(),
            cmd: "true".into(),
            pre_cmd: None,
            workdir: None,
            logdir: Some("stdout".into()),
            liveness: LivenessProbe {
                tcp_socket: TcpSocket { port: 0 },
                initial_delay_seconds: 0.01,
                period_seconds: 0.05,
                failure_threshold: 3,
                success_threshold: 1,
            },
            env: vec![EnvVar {
                name: "PORT".into(),
                value: "$YETIS_PORT".into(),
            }],
            strategy: Default::default(),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn create_delegates_to_restart_for_existing_root_name() {
        let engine = engine();
        engine.create(spec("web")).await.unwrap();
        engine.create(spec("web")).await.unwrap();
        assert_eq!(engine.store.len(), 1);
    }

    #[tokio::test]
    async fn restart_recreate_retargets_selecting_service() {
        use yetis_common::{ServiceSelector, ServiceSpec};

        let engine = engine();
        engine.create(spec("web")).await.unwrap();
        let old_port = engine.store.get("web").unwrap().spec.liveness.tcp_socket.port;

        let svc_spec = ServiceSpec {
            port: 9000,
            selector: ServiceSelector { name: "web".into() },
            logdir: None,
        };
        engine.services.first_save(svc_spec.clone()).await.unwrap();
        engine
            .services
            .update(&svc_spec, ProcessStatus::Running, Some(old_port))
            .await
            .unwrap();
        engine.forward_registry.insert(
            &service_forward_key("web"),
            ForwardHandle::Kernel {
                listen_port: 9000,
                target_port: old_port,
            },
        );

        engine.restart_recreate("web").await.unwrap();

        let new_port = engine.store.get("web").unwrap().spec.liveness.tcp_socket.port;
        let service = engine.services.get("web").unwrap();
        assert_eq!(service.deployment_port, Some(new_port));
        assert_ne!(new_port, old_port);
    }

    #[tokio::test]
    async fn create_delegates_to_restart_for_rolling_successor() {
        // Simulates re-applying `web` after an earlier rolling update already
        // left `web-1` as the live entry: the root name resolves to the
        // successor, so create() must restart it in place rather than stand
        // up a second "web" deployment alongside it.
        let engine = engine();
        engine.create(spec("web-1")).await.unwrap();
        engine.create(spec("web")).await.unwrap();
        assert!(engine.store.get("web").is_none());
        assert!(engine.store.get("web-1").is_some());
        assert_eq!(engine.store.len(), 1);
    }

    #[tokio::test]
    async fn delete_requires_existing_deployment() {
        let engine = engine();
        let err = engine.delete("ghost").await.unwrap_err();
        assert!(matches!(err, RestartError::NotFound(_)));
    }

    #[tokio::test]
    async fn apply_restart_refuses_strategy_change() {
        let engine = engine();
        engine.create(spec("web")).await.unwrap();
        let mut new_spec = spec("web");
        new_spec.strategy.r#type = StrategyType::RollingUpdate;
        new_spec.proxy = Some(ProxySpec { port: 9000 });
        let err = engine.apply_restart("web", new_spec).await.unwrap_err();
        assert!(matches!(err, RestartError::IncompatibleApply(_)));
    }
}
