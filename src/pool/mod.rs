mod backend;

pub use backend::{normalize_url, Backend, BackendError, BackendSnapshot, ConnectionGuard};

use parking_lot::RwLock;
use std::sync::Arc;
use url::Url;

/// Ordered registry of backends.
///
/// Membership is guarded by a single read/write lock. Per-backend state
/// (liveness, connection count) is mutated through the backend itself, so
/// status updates only ever take the pool lock shared.
#[derive(Debug, Default)]
pub struct ServerPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backends(backends: impl IntoIterator<Item = Backend>) -> Self {
        Self {
            backends: RwLock::new(backends.into_iter().map(Arc::new).collect()),
        }
    }

    /// Append a backend. Duplicate URLs are accepted.
    pub fn add(&self, backend: Arc<Backend>) {
        self.backends.write().push(backend);
    }

    /// Remove the first backend with this URL. Returns whether one was removed.
    pub fn remove(&self, url: &Url) -> bool {
        let mut backends = self.backends.write();
        match backends.iter().position(|b| b.url() == url) {
            Some(idx) => {
                backends.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Update liveness of every backend registered under this URL.
    pub fn set_status(&self, url: &Url, alive: bool) {
        let backends = self.backends.read();
        for backend in backends.iter().filter(|b| b.url() == url) {
            backend.set_alive(alive);
        }
    }

    /// Snapshot of the current membership, in insertion order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    /// Run `f` against the live membership while holding the shared lock.
    #[inline]
    pub fn read<T>(&self, f: impl FnOnce(&[Arc<Backend>]) -> T) -> T {
        let backends = self.backends.read();
        f(backends.as_slice())
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }
}
