//! Thin HTTP client fixed to the control plane's shape (§6), grounded on
//! `client/commands.go`'s use of `fetch.Get`/`fetch.Post`/`fetch.Put`/
//! `fetch.Delete` against a base URL pinned to the daemon's port.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dto::ErrorBody;

/// Must match `yetis_server::YETIS_SERVER_PORT`. Duplicated rather than
/// depended on, since the CLI only ever talks to the daemon over HTTP.
pub const YETIS_SERVER_PORT: u16 = 54129;

pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://127.0.0.1:{YETIS_SERVER_PORT}"),
        }
    }

    async fn unwrap_response<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json::<T>().await?)
        } else {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            anyhow::bail!("{message}")
        }
    }

    async fn unwrap_empty(resp: reqwest::Response) -> anyhow::Result<()> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            anyhow::bail!("{message}")
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.http.get(format!("{}{path}", self.base)).send().await?;
        Self::unwrap_response(resp).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        Self::unwrap_response(resp).await
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        let resp = self
            .http
            .put(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        Self::unwrap_empty(resp).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .delete(format!("{}{path}", self.base))
            .send()
            .await?;
        Self::unwrap_empty(resp).await
    }

    pub async fn is_server_running(&self) -> bool {
        yetis_netutil::probe(YETIS_SERVER_PORT, std::time::Duration::from_millis(200)).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
