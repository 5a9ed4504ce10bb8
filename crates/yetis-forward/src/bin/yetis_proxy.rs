//! Companion binary spawned by `UserspaceForward`. Copies bytes between a
//! stable listen port and a backend target port, with a tiny HTTP control
//! server on a third port that lets the parent daemon repoint the target
//! without closing the listen socket, grounded on `proxy/start.go:Start`/
//! `proxyTo` plus the `POST /update` contract exercised by
//! `proxy/cmd/start_test.go:TestProxyingUpdatePort`.

use std::{
    net::Ipv4Addr,
    sync::atomic::{AtomicU16, Ordering},
    sync::Arc,
};

use axum::{Router, extract::State, routing::post};
use tokio::net::{TcpListener, TcpStream};

struct ProxyState {
    target_port: AtomicU16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: yetis-proxy <listen-port> <target-port> <http-port>");
        std::process::exit(1);
    }
    let listen_port: u16 = args[1].parse().expect("listen port must be a number");
    let target_port: u16 = args[2].parse().expect("target port must be a number");
    let http_port: u16 = args[3].parse().expect("http port must be a number");

    let state = Arc::new(ProxyState {
        target_port: AtomicU16::new(target_port),
    });

    let control_state = state.clone();
    tokio::spawn(async move {
        let app = Router::new()
            .route("/update", post(update_target))
            .with_state(control_state);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, http_port))
            .await
            .expect("failed to bind proxy control port");
        axum::serve(listener, app)
            .await
            .expect("proxy control server failed");
    });

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, listen_port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind listen port {listen_port}: {e}"));

    loop {
        match listener.accept().await {
            Ok((conn, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = proxy_to(conn, &state).await {
                        tracing::debug!(error = %e, "proxy connection ended");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept error");
                break;
            }
        }
    }
}

async fn update_target(State(state): State<Arc<ProxyState>>, body: String) -> &'static str {
    match body.trim().parse::<u16>() {
        Ok(port) => {
            state.target_port.store(port, Ordering::SeqCst);
            "ok"
        }
        Err(_) => "invalid port",
    }
}

async fn proxy_to(mut inbound: TcpStream, state: &ProxyState) -> std::io::Result<()> {
    let target_port = state.target_port.load(Ordering::SeqCst);
    let mut outbound = TcpStream::connect((Ipv4Addr::LOCALHOST, target_port)).await?;
    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    Ok(())
}
