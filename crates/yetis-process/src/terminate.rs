use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgid, Pid};
use thiserror::Error;
use tokio::time::sleep;

use crate::liveness_check::is_alive;

#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("couldn't resolve process group for pid {pid}: {source}")]
    Pgid {
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Sends SIGTERM to `pid`'s process group, polling for exit, then escalates
/// to SIGKILL once `timeout` elapses. Grounded on
/// `common/unix/commands.go:TerminateProcess`, targeting the whole group
/// (not just the direct child) the way `kill_process_group` does.
pub async fn terminate_process_group(pid: u32, timeout: Duration) -> Result<(), TerminateError> {
    let pid = Pid::from_raw(pid as i32);
    let pgid = match getpgid(Some(pid)) {
        Ok(pgid) => pgid,
        Err(nix::errno::Errno::ESRCH) => return Ok(()),
        Err(source) => {
            return Err(TerminateError::Pgid {
                pid: pid.as_raw(),
                source,
            })
        }
    };

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to send SIGTERM to process group");
    }

    let poll_interval = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_alive(pid.as_raw() as u32) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to send SIGKILL to process group");
            }
            return Ok(());
        }
        sleep(poll_interval).await;
    }
}

#[derive(Debug, Error)]
pub enum KillByPortError {
    #[error("port {0} is closed")]
    PortClosed(u16),
    #[error("searching for port {port}: {source}")]
    Lookup {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to kill pid {pid} found on port {port}: {source}")]
    Kill {
        port: u16,
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Looks up the listening pid on `port` via `lsof` and sends it SIGKILL,
/// grounded on `common/unix/commands.go:GetPidByPort`/`KillByPort` (used
/// when a deployment's prior liveness port is stuck in use at apply time).
pub fn kill_by_port(port: u16) -> Result<(), KillByPortError> {
    let output = std::process::Command::new("lsof")
        .args(["-i", &format!(":{port}"), "-sTCP:LISTEN", "-t"])
        .output()
        .map_err(|source| KillByPortError::Lookup { port, source })?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(KillByPortError::PortClosed(port));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let pid: i32 = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().parse().ok())
        .ok_or(KillByPortError::PortClosed(port))?;

    nix::sys::signal::kill(Pid::from_raw(pid), Signal::SIGKILL)
        .map_err(|source| KillByPortError::Kill { port, pid, source })?;
    Ok(())
}
