//! Per-deployment liveness control loop (§4.D "Liveness controller").
//!
//! Grounded on `server/liveness.go`: `startLivenessCheck`/`runLivenessCheck`
//! for the loop shape, `heartbeat` for the per-tick decision, and
//! `deleteLivenessCheck` for cancellation. Goroutines become tokio tasks,
//! the Go `chan bool` stop signal becomes a `oneshot::Sender<()>`, and the
//! two `common.Map`s (threshold, liveness) become `DashMap`s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

use yetis_alerting::{AlertInfo, Alerter};
use yetis_common::age_string;
use yetis_common::env::{current_yetis_port, inject_yetis_port};
use yetis_common::root_name;
use yetis_forward::{service_forward_key, ForwardBackend, ForwardRegistry};
use yetis_process::{is_alive, launch, terminate_process_group, LaunchOutcome};
use yetis_store::{Deployment, DeploymentStore, ProcessStatus, ServiceStore};

const DEFAULT_RESTART_LIMIT: u32 = 2;

#[derive(Debug, Default, Clone, Copy)]
struct Threshold {
    success_count: u32,
    failure_count: u32,
}

enum HeartbeatResult {
    Dead,
    TryAgain,
    Alive,
}

/// Owns the per-deployment probe loops. One instance is shared by the whole
/// daemon; `start`/`cancel` are the only entry points external callers need.
#[derive(Clone)]
pub struct LivenessController {
    store: DeploymentStore,
    services: ServiceStore,
    forward_registry: Arc<ForwardRegistry>,
    forward_backend: Arc<dyn ForwardBackend>,
    alerter: Alerter,
    stops: Arc<DashMap<String, oneshot::Sender<()>>>,
    thresholds: Arc<DashMap<String, Threshold>>,
}

impl LivenessController {
    pub fn new(
        store: DeploymentStore,
        services: ServiceStore,
        forward_registry: Arc<ForwardRegistry>,
        forward_backend: Arc<dyn ForwardBackend>,
        alerter: Alerter,
    ) -> Self {
        Self {
            store,
            services,
            forward_registry,
            forward_backend,
            alerter,
            stops: Arc::new(DashMap::new()),
            thresholds: Arc::new(DashMap::new()),
        }
    }

    /// Starts a liveness loop for `name`. Non-blocking: returns once the
    /// loop's task has been spawned, per `startLivenessCheck`.
    pub fn start(&self, name: &str, initial_delay: Duration, period: Duration) {
        self.run(name.to_string(), initial_delay, period, DEFAULT_RESTART_LIMIT);
    }

    /// Cancels `name`'s loop if one is running, returning whether it was
    /// found. Mirrors `deleteLivenessCheck`; unlike the original this never
    /// blocks, since sending on a `oneshot` can't deadlock a live receiver.
    pub fn cancel(&self, name: &str) -> bool {
        match self.stops.remove(name) {
            Some((_, tx)) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    fn run(&self, name: String, initial_delay: Duration, period: Duration, restart_limit: u32) {
        let (tx, mut rx) = oneshot::channel();
        self.stops.insert(name.clone(), tx);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut rx => {
                    this.clean_up(&name);
                    return;
                }
                _ = sleep(initial_delay) => {}
            }

            if matches!(this.heartbeat(&name, restart_limit).await, HeartbeatResult::Dead) {
                this.clean_up(&name);
                return;
            }

            let mut ticker = interval(period);
            ticker.tick().await; // first tick fires immediately, already consumed above

            loop {
                tokio::select! {
                    _ = &mut rx => {
                        this.clean_up(&name);
                        return;
                    }
                    _ = ticker.tick() => {
                        match this.heartbeat(&name, restart_limit).await {
                            HeartbeatResult::Dead => {
                                this.clean_up(&name);
                                return;
                            }
                            HeartbeatResult::TryAgain => {
                                let backoff = Duration::from_secs((restart_limit as u64 / 2) * 60);
                                tokio::select! {
                                    _ = &mut rx => {
                                        this.clean_up(&name);
                                        return;
                                    }
                                    _ = sleep(backoff) => {}
                                }
                                this.run(name.clone(), initial_delay, period, restart_limit * 2);
                                return;
                            }
                            HeartbeatResult::Alive => {}
                        }
                    }
                }
            }
        });
    }

    fn clean_up(&self, name: &str) {
        self.stops.remove(name);
        self.thresholds.remove(name);
    }

    async fn heartbeat(&self, name: &str, restart_limit: u32) -> HeartbeatResult {
        let Some(dep) = self.store.get(name) else {
            return HeartbeatResult::Dead;
        };
        if dep.status == ProcessStatus::Terminating {
            return HeartbeatResult::Alive;
        }

        let port = dep.spec.liveness.tcp_socket.port;
        let port_open = yetis_netutil::probe(port, dep.spec.liveness.probe_timeout()).await;

        let (success_count, failure_count) = {
            let mut threshold = self.thresholds.entry(name.to_string()).or_default();
            if port_open {
                threshold.failure_count = 0;
                threshold.success_count += 1;
            } else {
                threshold.failure_count += 1;
                threshold.success_count = 0;
            }
            (threshold.success_count, threshold.failure_count)
        };

        if failure_count >= dep.spec.liveness.failure_threshold {
            return self.handle_failure_threshold(name, dep, restart_limit).await;
        }

        if success_count >= dep.spec.liveness.success_threshold {
            self.store.update_status(name, ProcessStatus::Running).await;
            if dep.status != ProcessStatus::Running {
                // Status could be Pending after Failed; the threshold could have
                // been cleared after Failed too. Gate on the previous status so
                // a process that starts Pending->Running doesn't spam a
                // recovery alert for a failure that was never reported.
                if let Some(info) = self.alert_info(name, ProcessStatus::Running) {
                    if let Err(e) = self.alerter.alert_recovery(info) {
                        tracing::debug!(name, error = %e, "recovery alert was not triggered");
                    }
                }
            }
        }
        HeartbeatResult::Alive
    }

    async fn handle_failure_threshold(&self, name: &str, dep: Deployment, restart_limit: u32) -> HeartbeatResult {
        if dep.restarts >= restart_limit {
            self.store.update_status(name, ProcessStatus::Failed).await;
            self.thresholds.remove(name);
            if let Some(info) = self.alert_info(name, ProcessStatus::Failed) {
                if let Err(e) = self.alerter.alert_fail(info) {
                    warn!(name, error = %e, "fail alert was not sent");
                }
            }
            return HeartbeatResult::TryAgain;
        }

        info!(name, "restarting deployment, failure threshold was reached");
        self.store.update_status(name, ProcessStatus::Terminating).await;
        let old_spec = dep.spec.clone();
        if let Err(e) = terminate_process_group(dep.pid, old_spec.liveness.period_duration()).await {
            warn!(name, pid = dep.pid, error = %e, "failed to terminate process");
        } else {
            info!(name, pid = dep.pid, "terminated deployment");
        }
        self.store.update_status(name, ProcessStatus::Pending).await;

        let new_port = match yetis_netutil::allocate_free_port().await {
            Ok(p) => p,
            Err(e) => {
                warn!(name, error = %e, "failed to allocate a port for restart");
                return HeartbeatResult::Alive;
            }
        };
        let mut new_spec = old_spec.clone();
        let replaces_launch_port = new_spec.liveness.tcp_socket.port == 0
            || Some(new_spec.liveness.tcp_socket.port) == current_yetis_port(&old_spec.env);
        new_spec.env = inject_yetis_port(&new_spec.env, new_port);
        if replaces_launch_port {
            new_spec.liveness.tcp_socket.port = new_port;
        }

        let _ = self.store.update_launch(&new_spec, 0, String::new(), false).await;
        match launch(&new_spec).await {
            Ok(LaunchOutcome { pid, log_path }) => {
                let _ = self.store.update_launch(&new_spec, pid, log_path, true).await;
            }
            Err(e) => {
                warn!(name, error = %e, "liveness failed to restart deployment");
            }
        }
        self.thresholds.remove(name);

        if let Some(handle) = self.forward_registry.retarget(name, new_spec.liveness.tcp_socket.port) {
            match self
                .forward_backend
                .update_target(&handle, new_spec.liveness.tcp_socket.port)
                .await
            {
                Ok(()) => info!(name, port = new_spec.liveness.tcp_socket.port, "retargeted port-forward"),
                Err(e) => warn!(name, error = %e, "liveness restarted deployment, but failed to update its port-forward"),
            }
        }
        self.retarget_selecting_services(name, new_spec.liveness.tcp_socket.port).await;

        sleep(new_spec.liveness.initial_delay_duration()).await;
        HeartbeatResult::Alive
    }

    /// Retargets every Service whose selector matches `name`'s root, so a
    /// Service's backend port tracks its selected deployment across a
    /// liveness-triggered restart.
    async fn retarget_selecting_services(&self, name: &str, new_backend_port: u16) {
        let root = root_name(name);
        for (service_name, service) in self.services.list_selecting_root(root) {
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

    fn alert_info(&self, name: &str, status: ProcessStatus) -> Option<AlertInfo> {
        let dep = self.store.get(name)?;
        let age = Utc::now()
            .signed_duration_since(dep.created_at)
            .to_std()
            .unwrap_or_default();
        Some(AlertInfo {
            name: name.to_string(),
            status: status.to_string(),
            pid: dep.pid,
            restarts: dep.restarts,
            age: age_string(age),
            spec: dep.spec,
        })
    }
}

/// Returns whether `pid` still looks alive, a thin re-export so callers that
/// only need this one check don't have to add a direct dependency on
/// `yetis-process` for it.
pub fn process_alive(pid: u32) -> bool {
    is_alive(pid)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use yetis_common::{DeploymentSpec, EnvVar, LivenessProbe, TcpSocket};
    use yetis_forward::{ForwardError, ForwardHandle};

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

    fn controller() -> LivenessController {
        LivenessController::new(
            DeploymentStore::new(),
            ServiceStore::new(),
            Arc::new(ForwardRegistry::new()),
            Arc::new(NoopForward),
            Alerter::disabled(),
        )
    }

    fn spec(name: &str, port: u16) -> DeploymentSpec {
        DeploymentSpec {
            name: name.to_string(),
            cmd: "true".into(),
            pre_cmd: None,
            workdir: None,
            logdir: None,
            liveness: LivenessProbe {
                tcp_socket: TcpSocket { port },
                initial_delay_seconds: 0.01,
                period_seconds: 0.05,
                failure_threshold: 1,
                success_threshold: 1,
            },
            env: vec![EnvVar {
                name: "YETIS_PORT".into(),
                value: port.to_string(),
            }],
            strategy: Default::default(),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn heartbeat_marks_dead_process_as_failed_after_restart_cap() {
        let ctl = controller();
        let port = yetis_netutil::allocate_free_port().await.unwrap();
        let dep_spec = spec("web", port);
        ctl.store.save(dep_spec.clone(), false).await.unwrap();
        ctl.store.update_launch(&dep_spec, 1, "x".into(), false).await.unwrap();
        // Pretend we're already at the restart cap so the next failure marks Failed.
        ctl.store
            .update_launch(&dep_spec, 1, "x".into(), true)
            .await
            .unwrap();
        ctl.store
            .update_launch(&dep_spec, 1, "x".into(), true)
            .await
            .unwrap();

        let result = ctl.heartbeat("web", 2).await;
        assert!(matches!(result, HeartbeatResult::TryAgain));
        assert_eq!(ctl.store.status("web"), Some(ProcessStatus::Failed));
    }

    #[tokio::test]
    async fn cancel_returns_false_when_not_running() {
        let ctl = controller();
        assert!(!ctl.cancel("ghost"));
    }

    #[tokio::test]
    async fn failure_threshold_restart_retargets_selecting_service() {
        use yetis_common::{ServiceSelector, ServiceSpec};

        let ctl = controller();
        let port = yetis_netutil::allocate_free_port().await.unwrap();
        let dep_spec = spec("web", port);
        ctl.store.save(dep_spec.clone(), false).await.unwrap();
        ctl.store.update_launch(&dep_spec, 1, "x".into(), false).await.unwrap();

        let svc_spec = ServiceSpec {
            port: 9000,
            selector: ServiceSelector { name: "web".into() },
            logdir: None,
        };
        ctl.services.first_save(svc_spec.clone()).await.unwrap();
        ctl.services
            .update(&svc_spec, ProcessStatus::Running, Some(port))
            .await
            .unwrap();
        ctl.forward_registry.insert(
            &yetis_forward::service_forward_key("web"),
            ForwardHandle::Kernel {
                listen_port: 9000,
                target_port: port,
            },
        );

        let dep = ctl.store.get("web").unwrap();
        let result = ctl.handle_failure_threshold("web", dep, 2).await;
        assert!(matches!(result, HeartbeatResult::Alive));

        let service = ctl.services.get("web").unwrap();
        let new_port = ctl.store.get("web").unwrap().spec.liveness.tcp_socket.port;
        assert_eq!(service.deployment_port, Some(new_port));
        assert_ne!(new_port, port);
    }

    #[tokio::test]
    async fn start_and_cancel_round_trip() {
        let ctl = controller();
        let port = yetis_netutil::allocate_free_port().await.unwrap();
        let dep_spec = spec("web", port);
        ctl.store.save(dep_spec.clone(), false).await.unwrap();
        ctl.store.update_launch(&dep_spec, 1, "x".into(), false).await.unwrap();
        ctl.start("web", Duration::from_secs(5), Duration::from_secs(5));
        assert!(ctl.cancel("web"));
    }
}
