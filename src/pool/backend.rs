use crate::metrics::Metrics;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid backend URL '{0}'")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}', only http backends are supported")]
    UnsupportedScheme(String),

    #[error("backend URL '{0}' has no host")]
    MissingHost(String),
}

/// Normalize a backend URL down to scheme, host and port.
///
/// A bare `host:port` is treated as `http://host:port`. Credentials, path,
/// query and fragment are dropped so that two spellings of the same upstream
/// compare equal.
pub fn normalize_url(raw: &str) -> Result<Url, BackendError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BackendError::InvalidUrl(raw.to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let mut url = Url::parse(&candidate).map_err(|_| BackendError::InvalidUrl(raw.to_string()))?;

    if url.scheme() != "http" {
        return Err(BackendError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(BackendError::MissingHost(raw.to_string()));
    }

    // Setters only fail for cannot-be-a-base URLs, which http URLs never are.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// A single upstream server.
///
/// The URL is fixed at creation. Liveness sits behind its own lock, the
/// connection counter is a plain atomic so the request path never contends
/// with health-check writes.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    alive: RwLock<bool>,
    active_connections: AtomicUsize,
}

impl Backend {
    /// Create a backend from an already-normalized URL. New backends start alive.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BackendError> {
        normalize_url(raw).map(Self::new)
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `scheme://host[:port]` without the trailing slash.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        *self.alive.read()
    }

    /// Store the new liveness and return the previous one.
    pub fn set_alive(&self, alive: bool) -> bool {
        std::mem::replace(&mut *self.alive.write(), alive)
    }

    #[inline]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count one in-flight request against this backend until the guard drops.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        let current = self.active_connections.fetch_add(1, Ordering::AcqRel) + 1;
        Metrics::set_active_connections(&self.origin(), current);
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            url: self.origin(),
            alive: self.is_alive(),
            current_connections: self.active_connections(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin())
    }
}

/// Point-in-time view of a backend, as served by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub url: String,
    pub alive: bool,
    pub current_connections: usize,
}

/// Decrements the owning backend's connection count exactly once, on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.backend.active_connections.fetch_sub(1, Ordering::AcqRel) - 1;
        Metrics::set_active_connections(&self.backend.origin(), remaining);
    }
}
