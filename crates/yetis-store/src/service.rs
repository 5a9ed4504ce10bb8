use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use yetis_common::{root_name, ServiceSpec};

use crate::status::ProcessStatus;

#[derive(Debug, Clone)]
pub struct Service {
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub spec: ServiceSpec,
    /// Currently forwarded-to backend port, resolved from the matched
    /// deployment's liveness/proxy port.
    pub deployment_port: Option<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceStoreError {
    #[error("service for '{0}' already exists")]
    AlreadyExists(String),
    #[error("service for '{0}' not found")]
    NotFound(String),
}

/// Grounded on `server/store_service.go`. Keyed by the selector's
/// deployment name, same as the original.
#[derive(Clone)]
pub struct ServiceStore {
    inner: Arc<DashMap<String, Service>>,
    write_lock: Arc<Mutex<()>>,
}

impl Default for ServiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn first_save(&self, spec: ServiceSpec) -> Result<(), ServiceStoreError> {
        let _guard = self.write_lock.lock().await;
        let key = spec.selector.name.clone();
        if self.inner.contains_key(&key) {
            return Err(ServiceStoreError::AlreadyExists(key));
        }
        self.inner.insert(
            key,
            Service {
                status: ProcessStatus::Pending,
                created_at: Utc::now(),
                spec,
                deployment_port: None,
            },
        );
        Ok(())
    }

    pub async fn update(
        &self,
        spec: &ServiceSpec,
        status: ProcessStatus,
        deployment_port: Option<u16>,
    ) -> Result<(), ServiceStoreError> {
        let _guard = self.write_lock.lock().await;
        let key = &spec.selector.name;
        let mut entry = self
            .inner
            .get_mut(key)
            .ok_or_else(|| ServiceStoreError::NotFound(key.clone()))?;
        entry.status = status;
        entry.deployment_port = deployment_port;
        entry.spec = spec.clone();
        Ok(())
    }

    pub fn get(&self, selector_name: &str) -> Option<Service> {
        self.inner.get(selector_name).map(|e| e.clone())
    }

    pub async fn delete(&self, selector_name: &str) {
        let _guard = self.write_lock.lock().await;
        self.inner.remove(selector_name);
    }

    pub fn list(&self) -> Vec<(String, Service)> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Services whose selector names the same deployment root, so a restart
    /// or rolling-update cutover can find every Service that needs its
    /// forward retargeted alongside the deployment's own.
    pub fn list_selecting_root(&self, deployment_root: &str) -> Vec<(String, Service)> {
        self.inner
            .iter()
            .filter(|e| root_name(&e.value().spec.selector.name) == deployment_root)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yetis_common::ServiceSelector;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            port: 8080,
            selector: ServiceSelector { name: name.into() },
            logdir: None,
        }
    }

    #[tokio::test]
    async fn first_save_rejects_duplicate() {
        let store = ServiceStore::new();
        store.first_save(spec("web")).await.unwrap();
        let err = store.first_save(spec("web")).await.unwrap_err();
        assert_eq!(err, ServiceStoreError::AlreadyExists("web".into()));
    }

    #[tokio::test]
    async fn update_sets_deployment_port() {
        let store = ServiceStore::new();
        store.first_save(spec("web")).await.unwrap();
        store
            .update(&spec("web"), ProcessStatus::Running, Some(27000))
            .await
            .unwrap();
        assert_eq!(store.get("web").unwrap().deployment_port, Some(27000));
    }

    #[tokio::test]
    async fn list_selecting_root_matches_rolling_successor_selector() {
        let store = ServiceStore::new();
        store.first_save(spec("web")).await.unwrap();
        store.first_save(spec("web-1")).await.unwrap();
        store.first_save(spec("other")).await.unwrap();
        let matches = store.list_selecting_root("web");
        let mut names: Vec<_> = matches.into_iter().map(|(n, _)| n).collect();
        names.sort();
        assert_eq!(names, vec!["web", "web-1"]);
    }
}
