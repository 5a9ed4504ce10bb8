//! HTTP-level integration tests against a locally-bound instance of the
//! control plane, in the spirit of `examples/original_source/itests/server_test.go`
//! (apply a spec over HTTP, then poll status transitions) but driven with
//! `reqwest` against an ephemeral port instead of the fixed daemon port, so
//! tests can run in parallel.

use serde_json::json;
use yetis_common::config::ServerConfig;
use yetis_server::{routes, Supervisor};

async fn spawn_test_server() -> (String, Supervisor) {
    let supervisor = Supervisor::new(ServerConfig::default());
    let app = routes::router(supervisor.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), supervisor)
}

#[tokio::test]
async fn info_reports_empty_counts_on_a_fresh_daemon() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/info")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["deployments_count"], 0);
    assert_eq!(body["services_count"], 0);
}

#[tokio::test]
async fn get_unknown_deployment_is_404() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/deployments/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn post_rejects_invalid_spec() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/deployments"))
        .json(&json!({
            "name": "bad",
            "cmd": "",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn create_list_and_delete_round_trip() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/deployments"))
        .json(&json!({
            "name": "web",
            "cmd": "true",
            "logdir": "stdout",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["existed"], false);

    let list: serde_json::Value = client
        .get(format!("{base}/deployments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "web");

    let resp = client
        .delete(format!("{base}/deployments/web"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let list: serde_json::Value = client
        .get(format!("{base}/deployments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn service_requires_existing_deployment() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/services"))
        .json(&json!({
            "port": 9999,
            "selector": {"name": "nonexistent"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

/// Simulates re-applying `web` after an earlier RollingUpdate already left
/// `web-1` as the live successor (predecessor deleted). The re-apply must
/// resolve by root name and restart the successor in place, not 409.
#[tokio::test]
async fn reapplying_root_name_after_rolling_update_restarts_the_successor() {
    let (base, supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let spec: yetis_common::DeploymentSpec = serde_json::from_value(json!({
        "name": "web-1",
        "cmd": "true",
        "logdir": "stdout",
    }))
    .unwrap();
    supervisor.deployments.save(spec.clone(), false).await.unwrap();
    supervisor
        .deployments
        .update_launch(&spec, 999_999, "stdout".into(), false)
        .await
        .unwrap();

    let resp = client
        .post(format!("{base}/deployments"))
        .json(&json!({
            "name": "web",
            "cmd": "true",
            "logdir": "stdout",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["existed"], true);

    let list: serde_json::Value = client
        .get(format!("{base}/deployments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "web-1");
}

#[tokio::test]
async fn restart_of_unknown_deployment_is_404() {
    let (base, _supervisor) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .put(format!("{base}/deployments/ghost/restart"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
