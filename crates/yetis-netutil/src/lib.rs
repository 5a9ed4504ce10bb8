//! TCP port utilities (§4.A "Port utilities").
//!
//! Grounded on `common/util.go:IsPortOpen`/`GetFreePort` from the original
//! implementation, translated to async probes so the liveness controller and
//! restart engine can run many of them concurrently without blocking threads.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum NetutilError {
    #[error("failed to bind an ephemeral port: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to read local address of bound socket: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Binds to port 0 on loopback, reads back the OS-assigned port, then drops
/// the listener. There's an inherent TOCTOU gap between this returning and
/// the caller's process binding the port; the liveness probe tolerates that
/// by retrying (§4.D).
pub async fn allocate_free_port() -> Result<u16, NetutilError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .map_err(NetutilError::Bind)?;
    let addr = listener.local_addr().map_err(NetutilError::LocalAddr)?;
    Ok(addr.port())
}

/// Tries to open a TCP connection to `127.0.0.1:port`, per `IsPortOpen`.
/// Returns `false` on any connect error or timeout, never propagating one —
/// callers treat "can't connect" and "connect failed" identically.
pub async fn probe(port: u16, probe_timeout: Duration) -> bool {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    matches!(
        timeout(probe_timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Polls `probe` until it succeeds or `overall_timeout` elapses.
pub async fn wait_open(port: u16, overall_timeout: Duration, poll_interval: Duration) -> bool {
    wait_for(port, overall_timeout, poll_interval, true).await
}

/// Polls `probe` until it fails (port closed) or `overall_timeout` elapses.
pub async fn wait_closed(port: u16, overall_timeout: Duration, poll_interval: Duration) -> bool {
    wait_for(port, overall_timeout, poll_interval, false).await
}

async fn wait_for(
    port: u16,
    overall_timeout: Duration,
    poll_interval: Duration,
    want_open: bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + overall_timeout;
    loop {
        if probe(port, poll_interval).await == want_open {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_ports() {
        let a = allocate_free_port().await.unwrap();
        let b = allocate_free_port().await.unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }

    #[tokio::test]
    async fn probe_detects_listening_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });
        assert!(probe(port, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn probe_fails_on_closed_port() {
        let port = allocate_free_port().await.unwrap();
        assert!(!probe(port, Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn wait_open_times_out_on_closed_port() {
        let port = allocate_free_port().await.unwrap();
        let ok = wait_open(port, Duration::from_millis(150), Duration::from_millis(30)).await;
        assert!(!ok);
    }
}
