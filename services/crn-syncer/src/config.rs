//! Syncer configuration file.
//!
//! ```yaml
//! remote:
//!   host: ftp.ncdc.noaa.gov
//!   port: 21
//!   timeout_secs: 100
//!   root: /pub/data/uscrn/products
//! products: [stations, monthly01]
//! ```
//!
//! Every key is optional. Command-line flags override the file.

use std::path::Path;

use anyhow::{Context, Result};
use crn_sync::{Product, RemoteConfig};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    pub remote: RemoteConfig,
    /// Products to synchronize, in order. Empty means all of them.
    pub products: Vec<Product>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub root: Option<String>,
    pub products: Vec<Product>,
}

impl SyncerConfig {
    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: SyncerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(
            path = %path.display(),
            host = %config.remote.host,
            products = config.products.len(),
            "Loaded syncer config"
        );
        Ok(config)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.remote.host = host;
        }
        if let Some(port) = overrides.port {
            self.remote.port = port;
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            self.remote.timeout_secs = timeout_secs;
        }
        if let Some(root) = overrides.root {
            self.remote.root = root;
        }
        if !overrides.products.is_empty() {
            self.products = overrides.products;
        }
        self
    }

    /// Products to run, falling back to the default order.
    pub fn selected_products(&self) -> Vec<Product> {
        if self.products.is_empty() {
            Product::ALL.to_vec()
        } else {
            self.products.clone()
        }
    }
}
