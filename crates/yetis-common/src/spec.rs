//! Deployment and Service spec types (§3 of the specification).
//!
//! These mirror `common.Config`/`common.Spec` in the Go original
//! (`examples/original_source/common/config.go`), adapted to serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Document kind in an applied YAML file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Deployment,
    Service,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Deployment
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StrategyType {
    Recreate,
    RollingUpdate,
}

impl Default for StrategyType {
    fn default() -> Self {
        StrategyType::Recreate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeploymentStrategy {
    #[serde(rename = "type", default)]
    pub r#type: StrategyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TcpSocket {
    /// 0 means auto-assign.
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessProbe {
    #[serde(rename = "tcpSocket", default)]
    pub tcp_socket: TcpSocket,
    #[serde(rename = "initialDelaySeconds", default = "default_initial_delay")]
    pub initial_delay_seconds: f64,
    #[serde(rename = "periodSeconds", default = "default_period")]
    pub period_seconds: f64,
    #[serde(rename = "failureThreshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(rename = "successThreshold", default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_initial_delay() -> f64 {
    10.0
}
fn default_period() -> f64 {
    10.0
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_success_threshold() -> u32 {
    1
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self {
            tcp_socket: TcpSocket::default(),
            initial_delay_seconds: default_initial_delay(),
            period_seconds: default_period(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl LivenessProbe {
    pub fn initial_delay_duration(&self) -> Duration {
        Duration::from_millis((self.initial_delay_seconds * 1000.0) as u64)
    }

    pub fn period_duration(&self) -> Duration {
        Duration::from_millis((self.period_seconds * 1000.0) as u64)
    }

    /// Probe timeout is the period minus a small slack so a slow probe never
    /// causes a missed tick (§4.D, §8 boundary: period=100ms -> timeout=90ms).
    pub fn probe_timeout(&self) -> Duration {
        self.period_duration()
            .saturating_sub(Duration::from_millis(10))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,
    pub cmd: String,
    #[serde(rename = "preCmd", default, skip_serializing_if = "Option::is_none")]
    pub pre_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logdir: Option<String>,
    #[serde(rename = "livenessProbe", default)]
    pub liveness: LivenessProbe,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("cmd is required")]
    MissingCmd,
    #[error("RollingUpdate strategy requires proxy.port")]
    RollingUpdateRequiresProxyPort,
    #[error("proxy.port can't be set alongside a fixed liveness.tcpSocket.port")]
    ProxyPortConflictsWithFixedLivenessPort,
}

impl DeploymentSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.cmd.trim().is_empty() {
            return Err(ValidationError::MissingCmd);
        }
        let fixed_liveness_port = self.liveness.tcp_socket.port != 0;
        if self.proxy.is_some() && fixed_liveness_port {
            return Err(ValidationError::ProxyPortConflictsWithFixedLivenessPort);
        }
        if self.strategy.r#type == StrategyType::RollingUpdate && self.proxy.is_none() {
            return Err(ValidationError::RollingUpdateRequiresProxyPort);
        }
        Ok(())
    }

    /// True if an apply of `other` onto `self` would require delete+recreate
    /// rather than an in-place restart (§4.F "Apply-restart").
    pub fn incompatible_for_apply_restart(&self, other: &DeploymentSpec) -> bool {
        self.strategy.r#type != other.strategy.r#type || self.proxy.map(|p| p.port) != other.proxy.map(|p| p.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelector {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub port: u16,
    pub selector: ServiceSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logdir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> DeploymentSpec {
        DeploymentSpec {
            name: "hello".into(),
            cmd: "nc -lk 27000".into(),
            pre_cmd: None,
            workdir: None,
            logdir: None,
            liveness: LivenessProbe::default(),
            env: vec![],
            strategy: DeploymentStrategy::default(),
            proxy: None,
        }
    }

    #[test]
    fn rejects_missing_name() {
        let mut s = base_spec();
        s.name = "".into();
        assert_eq!(s.validate(), Err(ValidationError::MissingName));
    }

    #[test]
    fn rejects_missing_cmd() {
        let mut s = base_spec();
        s.cmd = "  ".into();
        assert_eq!(s.validate(), Err(ValidationError::MissingCmd));
    }

    #[test]
    fn rolling_update_requires_proxy_port() {
        let mut s = base_spec();
        s.strategy.r#type = StrategyType::RollingUpdate;
        assert_eq!(
            s.validate(),
            Err(ValidationError::RollingUpdateRequiresProxyPort)
        );
        s.proxy = Some(ProxySpec { port: 27000 });
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn proxy_port_conflicts_with_fixed_liveness_port() {
        let mut s = base_spec();
        s.liveness.tcp_socket.port = 9000;
        s.proxy = Some(ProxySpec { port: 27000 });
        assert_eq!(
            s.validate(),
            Err(ValidationError::ProxyPortConflictsWithFixedLivenessPort)
        );
    }

    #[test]
    fn probe_timeout_is_period_minus_10ms() {
        let mut p = LivenessProbe::default();
        p.period_seconds = 0.1;
        assert_eq!(p.probe_timeout(), Duration::from_millis(90));
    }

    #[test]
    fn apply_restart_incompatible_on_strategy_change() {
        let a = base_spec();
        let mut b = base_spec();
        b.strategy.r#type = StrategyType::RollingUpdate;
        b.proxy = Some(ProxySpec { port: 1 });
        assert!(a.incompatible_for_apply_restart(&b));
    }
}
