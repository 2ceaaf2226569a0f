//! Gateway routing state: backend connection counts and the client-id counter

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{ClientId, Error, Result};

struct Backend {
    addr: String,
    active: usize,
}

struct Inner {
    /// In registration order; ties in selection go to the earliest entry
    backends: Vec<Backend>,
    next_id: ClientId,
}

/// Node registry and id counter, guarded by one lock
pub struct NodeRegistry {
    inner: Mutex<Inner>,
}

impl NodeRegistry {
    pub fn new<I, S>(backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backends = backends
            .into_iter()
            .map(|addr| Backend {
                addr: addr.into(),
                active: 0,
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                backends,
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next client id; strictly increasing for the life of the registry
    pub fn assign_client_id(&self) -> ClientId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Least-connected backend. No count is taken.
    pub fn select_backend(&self) -> Result<String> {
        let inner = self.lock();
        least_connected(&inner.backends)
            .map(|idx| inner.backends[idx].addr.clone())
            .ok_or(Error::NoBackends)
    }

    /// Select a backend and count a connection against it until the lease drops
    pub fn acquire_backend(self: &Arc<Self>) -> Result<BackendLease> {
        let mut inner = self.lock();
        let idx = least_connected(&inner.backends).ok_or(Error::NoBackends)?;
        let backend = &mut inner.backends[idx];
        backend.active += 1;
        tracing::debug!(backend = %backend.addr, active = backend.active, "backend acquired");
        Ok(BackendLease {
            registry: Arc::clone(self),
            index: idx,
            addr: backend.addr.clone(),
        })
    }

    /// `(address, active connections)` in registration order
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.lock()
            .backends
            .iter()
            .map(|b| (b.addr.clone(), b.active))
            .collect()
    }

    fn release(&self, index: usize) {
        let mut inner = self.lock();
        if let Some(backend) = inner.backends.get_mut(index) {
            backend.active = backend.active.saturating_sub(1);
            tracing::debug!(backend = %backend.addr, active = backend.active, "backend released");
        }
    }
}

fn least_connected(backends: &[Backend]) -> Option<usize> {
    // min_by_key keeps the first of equal minima
    backends
        .iter()
        .enumerate()
        .min_by_key(|(_, b)| b.active)
        .map(|(idx, _)| idx)
}

/// One counted connection to a backend, released on drop
#[must_use]
pub struct BackendLease {
    registry: Arc<NodeRegistry>,
    index: usize,
    addr: String,
}

impl BackendLease {
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.registry.release(self.index);
    }
}

impl std::fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLease").field("addr", &self.addr).finish()
    }
}
