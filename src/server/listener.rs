use crate::proxy::ProxyHandler;
use anyhow::{Context, Result};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Inbound accept loop feeding every request to the proxy handler.
pub struct Listener {
    listener: TcpListener,
    proxy: Arc<ProxyHandler>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, proxy: Arc<ProxyHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        Ok(Self { listener, proxy })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown. Connections already accepted keep
    /// being served by their own tasks.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Load balancer listening on http://{}", addr);
        }

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Listener stopped accepting connections");
                    break;
                }
            };

            let proxy = Arc::clone(&self.proxy);
            tokio::spawn(Self::serve_connection(TokioIo::new(stream), remote_addr, proxy));
        }
    }

    async fn serve_connection<I>(io: I, remote_addr: SocketAddr, proxy: Arc<ProxyHandler>)
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let proxy = Arc::clone(&proxy);
            async move { proxy.handle(req, remote_addr).await }
        });

        // Auto-detect HTTP/1 or HTTP/2 (h2c prior knowledge)
        let builder = AutoBuilder::new(TokioExecutor::new());
        if let Err(e) = builder.serve_connection(io, service).await {
            debug!("Connection error from {}: {}", remote_addr, e);
        }
    }
}
