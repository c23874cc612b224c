//! USCRN archive syncer.
//!
//! Mirrors the USCRN product files published on the NOAA FTP archive into
//! a local SQLite database. Only files whose remote modification time
//! changed since the previous run are fetched again. One JSON report per
//! product is written to stdout; logs go to stderr.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crn_sync::{FtpConnector, Product, SyncStore, Synchronizer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::{Overrides, SyncerConfig};

#[derive(Parser, Debug)]
#[command(name = "crn-syncer")]
#[command(about = "Incrementally mirror the USCRN archive into SQLite")]
struct Args {
    /// SQLite database file (created if missing)
    database: PathBuf,

    /// Product to synchronize; repeat for several (default: all, in
    /// stations, hourly02, daily01, monthly01, subhourly01 order)
    #[arg(short, long = "product", value_name = "PRODUCT")]
    products: Vec<Product>,

    /// YAML configuration file
    #[arg(long, env = "CRN_CONFIG")]
    config: Option<PathBuf>,

    /// FTP host
    #[arg(long, env = "CRN_HOST")]
    host: Option<String>,

    /// FTP port
    #[arg(long, env = "CRN_PORT")]
    port: Option<u16>,

    /// Inactivity timeout for remote reads, in seconds
    #[arg(long, env = "CRN_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Products root directory on the remote archive
    #[arg(long, env = "CRN_ROOT")]
    root: Option<String>,

    /// Only report which files would be imported
    #[arg(long)]
    dry_run: bool,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            timeout_secs: self.timeout_secs,
            root: self.root.clone(),
            products: self.products.clone(),
        }
    }
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args);

    let config = match &args.config {
        Some(path) => SyncerConfig::load(path)?,
        None => SyncerConfig::default(),
    }
    .apply(args.overrides());
    let products = config.selected_products();

    info!(
        database = %args.database.display(),
        host = %config.remote.host,
        products = ?products,
        dry_run = args.dry_run,
        "Starting USCRN syncer"
    );

    let store = SyncStore::open(&args.database)
        .await
        .with_context(|| format!("Failed to open database: {}", args.database.display()))?;

    let root = config.remote.root.clone();
    let synchronizer = Synchronizer::new(FtpConnector::new(config.remote), store).with_root(root);

    let mut failed_files = 0;
    for product in products {
        if args.dry_run {
            let plan = synchronizer
                .plan(product)
                .await
                .with_context(|| format!("Failed to plan {}", product))?;
            println!("{}", serde_json::to_string(&plan)?);
        } else {
            let report = synchronizer
                .sync_product(product)
                .await
                .with_context(|| format!("Failed to synchronize {}", product))?;
            failed_files += report.failures.len();
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    if failed_files > 0 {
        warn!(
            failed_files,
            "Some files could not be imported and will be retried on the next run"
        );
    }

    info!("USCRN syncer finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "crn-syncer",
            "crn.db",
            "--product",
            "monthly01",
            "-p",
            "Stations",
            "--port",
            "2121",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(args.database, PathBuf::from("crn.db"));
        assert_eq!(args.products, vec![Product::Monthly01, Product::Stations]);
        assert_eq!(args.port, Some(2121));
        assert!(args.dry_run);
        assert!(!args.log_json);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_unknown_product_is_rejected() {
        let result = Args::try_parse_from(["crn-syncer", "crn.db", "--product", "weekly"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_database_is_required() {
        assert!(Args::try_parse_from(["crn-syncer"]).is_err());
    }
}
