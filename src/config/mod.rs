pub mod duration;
mod types;

pub use duration::Duration;
pub use types::*;

use crate::pool::normalize_url;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use tracing::warn;

impl Config {
    /// Load a config file. `.yaml`/`.yml` files are read as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let config = if is_yaml {
            Self::from_yaml(&content)?
        } else {
            Self::from_json(&content)?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yml::from_str(content).with_context(|| "Failed to parse YAML config")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).with_context(|| "Failed to parse JSON config")
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen))
    }

    pub fn admin_addr(&self) -> Result<SocketAddr> {
        self.admin
            .address
            .parse()
            .with_context(|| format!("Invalid admin address: {}", self.admin.address))
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.admin.enabled {
            self.admin_addr()?;
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .address
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid metrics address: {}", metrics.address))?;
        }

        if self.health_check.interval.is_zero() {
            anyhow::bail!("health_check.interval must be greater than zero");
        }
        if self.health_check.timeout.is_zero() {
            anyhow::bail!("health_check.timeout must be greater than zero");
        }

        let mut seen = HashSet::new();
        for raw in &self.backends {
            let url = normalize_url(raw).with_context(|| format!("Invalid backend '{}'", raw))?;
            if !seen.insert(url) {
                warn!("Backend '{}' is listed more than once", raw);
            }
        }

        Ok(())
    }
}
