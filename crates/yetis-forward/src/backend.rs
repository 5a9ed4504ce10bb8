use async_trait::async_trait;
use thiserror::Error;

/// A live port-forward, opaque to callers beyond what's needed to update or
/// tear it down. Variants carry whatever each backend needs to track.
#[derive(Debug, Clone)]
pub enum ForwardHandle {
    Userspace {
        pid: u32,
        control_port: u16,
        listen_port: u16,
    },
    Kernel {
        listen_port: u16,
        target_port: u16,
    },
}

impl ForwardHandle {
    pub fn listen_port(&self) -> u16 {
        match self {
            ForwardHandle::Userspace { listen_port, .. } => *listen_port,
            ForwardHandle::Kernel { listen_port, .. } => *listen_port,
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to find the yetis-proxy companion binary: {0}")]
    BinaryNotFound(String),
    #[error("failed to start proxy process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("proxy's control port never came up")]
    ControlPortNotReady,
    #[error("failed to reach proxy control endpoint: {0}")]
    Control(#[source] reqwest::Error),
    #[error("iptables command failed: {0}")]
    Iptables(#[source] std::io::Error),
    #[error("iptables exited with non-zero status: {0}")]
    IptablesFailed(std::process::ExitStatus),
    #[error("wrong forward handle variant for this backend: {0}")]
    WrongHandle(String),
}

/// Keeps a stable `proxy.port` pointed at a deployment's backend port across
/// restarts (§4.E "Port-forwarding plane"), with two interchangeable
/// implementations selected per deployment by `ProxySpec`.
#[async_trait]
pub trait ForwardBackend: Send + Sync {
    async fn start(&self, listen_port: u16, target_port: u16) -> Result<ForwardHandle, ForwardError>;

    /// Repoints an already-running forward at a new backend port, used
    /// after a liveness restart or a RollingUpdate cutover so the stable
    /// `proxy.port` never has to be closed and reopened.
    async fn update_target(&self, handle: &ForwardHandle, new_target_port: u16) -> Result<(), ForwardError>;

    async fn stop(&self, handle: ForwardHandle) -> Result<(), ForwardError>;
}
