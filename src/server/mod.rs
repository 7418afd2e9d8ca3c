mod listener;

pub use listener::Listener;

use crate::admin::{AdminApi, AdminServer};
use crate::balancer::LoadBalancer;
use crate::config::Config;
use crate::health::HealthChecker;
use crate::pool::{Backend, ServerPool};
use crate::proxy::ProxyHandler;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Owns the single pool and strategy instance and wires every task to them.
pub struct Server {
    config: Config,
    balancer: Arc<LoadBalancer>,
}

/// Handles of a started server.
pub struct RunningServer {
    proxy_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Task failed during shutdown: {}", e);
            }
        }
    }
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let backends = config
            .backends
            .iter()
            .map(|raw| Backend::parse(raw).with_context(|| format!("Invalid backend '{}'", raw)))
            .collect::<Result<Vec<_>>>()?;

        let pool = Arc::new(ServerPool::with_backends(backends));
        let balancer = Arc::new(LoadBalancer::new(pool, config.strategy));

        Ok(Self { config, balancer })
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Bind the listeners and spawn the health loop, admin API and proxy.
    pub async fn start(&self) -> Result<RunningServer> {
        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        let proxy = Arc::new(ProxyHandler::new(Arc::clone(&self.balancer), &self.config.proxy));
        let listener = Listener::bind(self.config.listen_addr()?, proxy).await?;
        let proxy_addr = listener.local_addr()?;

        let admin_addr = if self.config.admin.enabled {
            let admin = AdminServer::bind(
                AdminApi::new(Arc::clone(&self.balancer)),
                self.config.admin_addr()?,
            )
            .await?;
            let addr = admin.local_addr()?;
            tasks.push(tokio::spawn(admin.run(shutdown.subscribe())));
            Some(addr)
        } else {
            None
        };

        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&self.balancer),
            &self.config.health_check,
        ));
        tasks.push(tokio::spawn(checker.run(shutdown.subscribe())));

        tasks.push(tokio::spawn(listener.serve(shutdown.subscribe())));

        info!(
            listen = %proxy_addr,
            strategy = %self.balancer.kind(),
            backends = self.balancer.backends().len(),
            "Load balancer started"
        );

        Ok(RunningServer {
            proxy_addr,
            admin_addr,
            shutdown,
            tasks,
        })
    }

    /// Run until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let running = self.start().await?;

        shutdown_signal().await;
        info!("Shutdown signal received, stopping server");

        running.shutdown().await;
        info!("Server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
