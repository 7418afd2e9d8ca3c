use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rotor::{config::Config, metrics, server::Server};

#[derive(Parser, Debug)]
#[command(name = "rotor")]
#[command(about = "HTTP load balancer with health checking and a runtime admin API")]
#[command(version)]
struct Args {
    /// Path to configuration file (.yaml/.yml or .json)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Loading configuration from {:?}", args.config);

    let config = Config::load(&args.config)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    if let Some(ref metrics_config) = config.metrics {
        info!("Starting Prometheus metrics server on {}", metrics_config.address);
        if let Err(e) = metrics::start_metrics_server(&metrics_config.address) {
            warn!("Failed to start metrics server: {}. Continuing without metrics.", e);
        }
    }

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
