mod least_conn;
mod round_robin;

pub use least_conn::LeastConnBalancer;
pub use round_robin::RoundRobinBalancer;

use crate::config::LoadBalancerStrategy;
use crate::pool::{normalize_url, Backend, BackendError, ServerPool};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("pool doesn't contain any backend servers")]
    EmptyPool,

    #[error("no backend server in the pool is alive")]
    NoHealthyBackend,
}

impl SelectError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SelectError::EmptyPool => "empty_pool",
            SelectError::NoHealthyBackend => "no_healthy_backend",
        }
    }
}

/// Picks the next backend out of a membership snapshot.
pub trait Balancer: Send + Sync {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError>;
}

/// The closed set of selection policies, chosen once from configuration.
pub enum Strategy {
    RoundRobin(RoundRobinBalancer),
    LeastConn(LeastConnBalancer),
}

impl Strategy {
    pub fn new(kind: LoadBalancerStrategy) -> Self {
        match kind {
            LoadBalancerStrategy::RoundRobin => Strategy::RoundRobin(RoundRobinBalancer::new()),
            LoadBalancerStrategy::LeastConnection => Strategy::LeastConn(LeastConnBalancer::new()),
        }
    }

    pub fn kind(&self) -> LoadBalancerStrategy {
        match self {
            Strategy::RoundRobin(_) => LoadBalancerStrategy::RoundRobin,
            Strategy::LeastConn(_) => LoadBalancerStrategy::LeastConnection,
        }
    }
}

impl Balancer for Strategy {
    #[inline]
    fn next_server(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        match self {
            Strategy::RoundRobin(rr) => rr.next_server(backends),
            Strategy::LeastConn(lc) => lc.next_server(backends),
        }
    }
}

/// A server pool paired with its selection strategy.
///
/// This is the whole surface the dispatcher, the health checker and the
/// admin API work against.
pub struct LoadBalancer {
    pool: Arc<ServerPool>,
    strategy: Strategy,
}

impl LoadBalancer {
    pub fn new(pool: Arc<ServerPool>, kind: LoadBalancerStrategy) -> Self {
        Self {
            pool,
            strategy: Strategy::new(kind),
        }
    }

    pub fn kind(&self) -> LoadBalancerStrategy {
        self.strategy.kind()
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Select the next alive backend, reading the live membership.
    #[inline]
    pub fn next_peer(&self) -> Result<Arc<Backend>, SelectError> {
        self.pool.read(|backends| self.strategy.next_server(backends))
    }

    /// Register a new backend. It starts alive until a probe says otherwise.
    pub fn add_backend(&self, raw_url: &str) -> Result<Arc<Backend>, BackendError> {
        let backend = Arc::new(Backend::parse(raw_url)?);
        self.pool.add(Arc::clone(&backend));
        info!("Added backend {}", backend);
        Ok(backend)
    }

    pub fn remove_backend(&self, raw_url: &str) -> Result<bool, BackendError> {
        let url = normalize_url(raw_url)?;
        let removed = self.pool.remove(&url);
        if removed {
            info!("Removed backend {}", url.origin().ascii_serialization());
        }
        Ok(removed)
    }

    #[inline]
    pub fn set_backend_status(&self, url: &Url, alive: bool) {
        self.pool.set_status(url, alive);
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.pool.backends()
    }
}
