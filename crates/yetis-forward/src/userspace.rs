use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{ForwardBackend, ForwardError, ForwardHandle};

/// Spawns the `yetis-proxy` companion binary as a byte-copying TCP forwarder
/// with its own small HTTP control endpoint, grounded on
/// `proxy/start_bin.go:Exec` (companion process + allocated control port)
/// and `proxy/cmd/main.go`'s `listen target http` argument order. Unlike the
/// original's `go:embed`, the binary ships alongside this one in the same
/// install rather than being extracted from an embedded blob at runtime.
pub struct UserspaceForward {
    client: reqwest::Client,
}

impl Default for UserspaceForward {
    fn default() -> Self {
        Self::new()
    }
}

impl UserspaceForward {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn proxy_binary_path(&self) -> Result<std::path::PathBuf, ForwardError> {
        let exe = std::env::current_exe().map_err(|e| ForwardError::BinaryNotFound(e.to_string()))?;
        let dir = exe
            .parent()
            .ok_or_else(|| ForwardError::BinaryNotFound("daemon binary has no parent dir".into()))?;
        let candidate = dir.join("yetis-proxy");
        if candidate.exists() {
            return Ok(candidate);
        }
        Ok(std::path::PathBuf::from("yetis-proxy"))
    }
}

#[async_trait]
impl ForwardBackend for UserspaceForward {
    async fn start(&self, listen_port: u16, target_port: u16) -> Result<ForwardHandle, ForwardError> {
        let control_port = yetis_netutil::allocate_free_port()
            .await
            .map_err(|e| ForwardError::Spawn(std::io::Error::other(e)))?;
        let binary = self.proxy_binary_path()?;
        let child = Command::new(binary)
            .arg(listen_port.to_string())
            .arg(target_port.to_string())
            .arg(control_port.to_string())
            .kill_on_drop(false)
            .spawn()
            .map_err(ForwardError::Spawn)?;
        let mut child = child;
        let pid = child.id().ok_or(ForwardError::ControlPortNotReady)?;
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        if !yetis_netutil::wait_open(control_port, Duration::from_secs(2), Duration::from_millis(20)).await {
            return Err(ForwardError::ControlPortNotReady);
        }

        Ok(ForwardHandle::Userspace {
            pid,
            control_port,
            listen_port,
        })
    }

    async fn update_target(&self, handle: &ForwardHandle, new_target_port: u16) -> Result<(), ForwardError> {
        let ForwardHandle::Userspace { control_port, .. } = handle else {
            return Err(ForwardError::BinaryNotFound(
                "update_target called with a non-userspace handle".into(),
            ));
        };
        self.client
            .post(format!("http://127.0.0.1:{control_port}/update"))
            .body(new_target_port.to_string())
            .send()
            .await
            .map_err(ForwardError::Control)?
            .error_for_status()
            .map_err(ForwardError::Control)?;
        Ok(())
    }

    async fn stop(&self, handle: ForwardHandle) -> Result<(), ForwardError> {
        let ForwardHandle::Userspace { pid, .. } = handle else {
            return Ok(());
        };
        if let Err(e) = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        ) {
            tracing::warn!(pid, error = %e, "failed to terminate proxy process");
        }
        Ok(())
    }
}
