use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

/// One reachability check against a backend.
///
/// A probe never errors: anything other than a clean success within the
/// timeout is reported as `false`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &Url, timeout: Duration) -> bool;
}

/// Opens a TCP connection to the backend and closes it straight away.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, url: &Url, limit: Duration) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let target = format!("{}:{}", host, port);

        match timeout(limit, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", target, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out after {:?}", target, limit);
                false
            }
        }
    }
}
