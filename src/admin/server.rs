use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::AdminApi;

/// Admin server for serving the admin API
pub struct AdminServer {
    api: Arc<AdminApi>,
    listener: TcpListener,
}

impl AdminServer {
    pub async fn bind(api: AdminApi, address: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind admin API to {}", address))?;

        Ok(Self {
            api: Arc::new(api),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve admin requests until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Admin API listening on http://{}", addr);
        }

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept admin connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Admin API shutting down");
                    break;
                }
            };

            let io = TokioIo::new(stream);
            let api = Arc::clone(&self.api);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let api = Arc::clone(&api);
                    async move {
                        debug!("Admin request: {} {}", req.method(), req.uri().path());
                        Ok::<_, hyper::Error>(api.handle(req).await)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Admin connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }
}
