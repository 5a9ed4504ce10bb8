use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{ForwardBackend, ForwardError, ForwardHandle};

/// Forwards via an `iptables` NAT `REDIRECT` rule instead of a userspace
/// proxy process, grounded on `proxy/exec.go:CreatePortForwarding` /
/// `DeletePortForwarding` / `UpdatePortForwarding`. The original tracks a
/// rule by looking up its line number in `iptables -L` output (left as a
/// stub there, `getLine` always returns an error); we track the
/// `(listen_port, target_port)` pair we created instead and delete/replace
/// by full rule spec, which `iptables -D`/`-R` both accept directly.
pub struct KernelForward;

impl Default for KernelForward {
    fn default() -> Self {
        Self
    }
}

fn rule_args(listen_port: u16, target_port: u16) -> Vec<String> {
    vec![
        "-o".into(),
        "lo".into(),
        "-p".into(),
        "tcp".into(),
        "--dport".into(),
        listen_port.to_string(),
        "-j".into(),
        "REDIRECT".into(),
        "--to-port".into(),
        target_port.to_string(),
    ]
}

async fn run_iptables(args: Vec<String>) -> Result<(), ForwardError> {
    let status = Command::new("iptables")
        .args(&args)
        .status()
        .await
        .map_err(ForwardError::Iptables)?;
    if !status.success() {
        return Err(ForwardError::IptablesFailed(status));
    }
    Ok(())
}

#[async_trait]
impl ForwardBackend for KernelForward {
    async fn start(&self, listen_port: u16, target_port: u16) -> Result<ForwardHandle, ForwardError> {
        let mut args = vec!["-t".into(), "nat".into(), "-A".into(), "OUTPUT".into()];
        args.extend(rule_args(listen_port, target_port));
        run_iptables(args).await?;
        Ok(ForwardHandle::Kernel {
            listen_port,
            target_port,
        })
    }

    async fn update_target(&self, handle: &ForwardHandle, new_target_port: u16) -> Result<(), ForwardError> {
        let ForwardHandle::Kernel {
            listen_port,
            target_port,
        } = handle
        else {
            return Err(ForwardError::WrongHandle(
                "update_target called with a non-kernel handle".into(),
            ));
        };
        let mut delete = vec!["-t".into(), "nat".into(), "-D".into(), "OUTPUT".into()];
        delete.extend(rule_args(*listen_port, *target_port));
        run_iptables(delete).await?;

        let mut add = vec!["-t".into(), "nat".into(), "-A".into(), "OUTPUT".into()];
        add.extend(rule_args(*listen_port, new_target_port));
        run_iptables(add).await
    }

    async fn stop(&self, handle: ForwardHandle) -> Result<(), ForwardError> {
        let ForwardHandle::Kernel {
            listen_port,
            target_port,
        } = handle
        else {
            return Ok(());
        };
        let mut args = vec!["-t".into(), "nat".into(), "-D".into(), "OUTPUT".into()];
        args.extend(rule_args(listen_port, target_port));
        run_iptables(args).await
    }
}
