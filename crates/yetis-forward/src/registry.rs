use dashmap::DashMap;

use crate::backend::ForwardHandle;

/// Namespaces a service's forward under its own key so it can't collide
/// with a deployment's own ingress forward in the same registry.
pub fn service_forward_key(name: &str) -> String {
    format!("service:{name}")
}

/// Tracks the live `ForwardHandle` for each deployment that owns an ingress
/// port, so the restart engine (which creates forwards) and the liveness
/// controller (which retargets them after a restart) can share ownership
/// without depending on each other.
#[derive(Default)]
pub struct ForwardRegistry {
    inner: DashMap<String, ForwardHandle>,
}

impl ForwardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, handle: ForwardHandle) {
        self.inner.insert(name.to_string(), handle);
    }

    pub fn get(&self, name: &str) -> Option<ForwardHandle> {
        self.inner.get(name).map(|e| e.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<ForwardHandle> {
        self.inner.remove(name).map(|(_, h)| h)
    }

    /// Swaps the stored handle's target port in place, returning the handle
    /// as it was before the swap so the caller can still issue
    /// `ForwardBackend::update_target` against it.
    pub fn retarget(&self, name: &str, new_target_port: u16) -> Option<ForwardHandle> {
        let mut entry = self.inner.get_mut(name)?;
        let old = entry.clone();
        *entry = match *entry {
            ForwardHandle::Userspace {
                pid,
                control_port,
                listen_port,
            } => ForwardHandle::Userspace {
                pid,
                control_port,
                listen_port,
            },
            ForwardHandle::Kernel { listen_port, .. } => ForwardHandle::Kernel {
                listen_port,
                target_port: new_target_port,
            },
        };
        Some(old)
    }
}
