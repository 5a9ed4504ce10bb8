use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use yetis_common::{root_name, DeploymentSpec};

use crate::status::ProcessStatus;

#[derive(Debug, Clone)]
pub struct Deployment {
    pub pid: u32,
    pub log_path: String,
    pub restarts: u32,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeploymentStoreError {
    #[error("deployment '{0}' already exists")]
    AlreadyExists(String),
    #[error("deployment '{0}' doesn't exist")]
    NotFound(String),
}

/// Concurrent deployment table, grounded on
/// `server/store_deployment.go:deploymentStore`. Reads go straight to the
/// `DashMap` (lock-free); compound read-modify-write operations (save,
/// update, delete) serialize through `write_lock` the way the original's
/// `writeLock sync.Mutex` does, so two concurrent applies for the same name
/// can't race each other into an inconsistent entry.
#[derive(Clone)]
pub struct DeploymentStore {
    inner: Arc<DashMap<String, Deployment>>,
    write_lock: Arc<Mutex<()>>,
}

impl Default for DeploymentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Inserts a brand-new, not-yet-launched entry. Returns an error if
    /// `upsert` is false and the name is already taken, matching
    /// `saveDeployment`.
    pub async fn save(
        &self,
        spec: DeploymentSpec,
        upsert: bool,
    ) -> Result<(), DeploymentStoreError> {
        let _guard = self.write_lock.lock().await;
        if !upsert && self.inner.contains_key(&spec.name) {
            return Err(DeploymentStoreError::AlreadyExists(spec.name));
        }
        self.inner.insert(
            spec.name.clone(),
            Deployment {
                pid: 0,
                log_path: String::new(),
                restarts: 0,
                status: ProcessStatus::Pending,
                created_at: Utc::now(),
                spec,
            },
        );
        Ok(())
    }

    /// Records a freshly launched process's pid/log path, bumping restarts
    /// when this is a restart rather than the initial launch.
    pub async fn update_launch(
        &self,
        spec: &DeploymentSpec,
        pid: u32,
        log_path: String,
        inc_restarts: bool,
    ) -> Result<(), DeploymentStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entry = self
            .inner
            .get_mut(&spec.name)
            .ok_or_else(|| DeploymentStoreError::NotFound(spec.name.clone()))?;
        entry.pid = pid;
        entry.log_path = log_path;
        if inc_restarts {
            entry.restarts += 1;
        }
        entry.spec = spec.clone();
        Ok(())
    }

    pub async fn update_status(&self, name: &str, status: ProcessStatus) {
        let _guard = self.write_lock.lock().await;
        match self.inner.get_mut(name) {
            Some(mut entry) => entry.status = status,
            None => tracing::warn!(name, "tried to update status but deployment doesn't exist"),
        }
    }

    pub fn get(&self, name: &str) -> Option<Deployment> {
        self.inner.get(name).map(|e| e.clone())
    }

    /// Looks up by exact name first, then falls back to scanning for any
    /// entry whose root name (suffix stripped) matches, mirroring
    /// `getDeploymentByRootName` — used so a client can address a
    /// RollingUpdate deployment by its stable root name.
    pub fn get_by_root_name(&self, root: &str) -> Option<(String, Deployment)> {
        if let Some(dep) = self.get(root) {
            return Some((root.to_string(), dep));
        }
        self.inner
            .iter()
            .find(|e| root_name(e.key()) == root)
            .map(|e| (e.key().clone(), e.value().clone()))
    }

    pub fn status(&self, name: &str) -> Option<ProcessStatus> {
        self.inner.get(name).map(|e| e.status)
    }

    pub async fn delete(&self, name: &str) {
        let _guard = self.write_lock.lock().await;
        self.inner.remove(name);
    }

    pub fn list(&self) -> Vec<(String, Deployment)> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yetis_common::LivenessProbe;

    fn spec(name: &str) -> DeploymentSpec {
        DeploymentSpec {
            name: name.to_string(),
            cmd: "true".into(),
            pre_cmd: None,
            workdir: None,
            logdir: None,
            liveness: LivenessProbe::default(),
            env: vec![],
            strategy: Default::default(),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn save_rejects_duplicate_without_upsert() {
        let store = DeploymentStore::new();
        store.save(spec("web"), false).await.unwrap();
        let err = store.save(spec("web"), false).await.unwrap_err();
        assert_eq!(err, DeploymentStoreError::AlreadyExists("web".into()));
    }

    #[tokio::test]
    async fn save_upsert_overwrites() {
        let store = DeploymentStore::new();
        store.save(spec("web"), false).await.unwrap();
        store.save(spec("web"), true).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_launch_requires_existing_entry() {
        let store = DeploymentStore::new();
        let err = store
            .update_launch(&spec("ghost"), 1, "log".into(), false)
            .await
            .unwrap_err();
        assert_eq!(err, DeploymentStoreError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn get_by_root_name_finds_suffixed_entry() {
        let store = DeploymentStore::new();
        store.save(spec("web-1"), false).await.unwrap();
        let (name, dep) = store.get_by_root_name("web").unwrap();
        assert_eq!(name, "web-1");
        assert_eq!(dep.spec.name, "web-1");
    }
}
