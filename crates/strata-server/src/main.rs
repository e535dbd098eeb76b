//! `stratad` — the Strata storage server daemon.
//!
//! ```text
//! stratad                        # listen on the default port
//! stratad -c strata.toml         # with a config file
//! stratad -p 4712                # override the port
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use strata_backend::{KvStore, ObjectStore};
use strata_server::{Server, ServerConfig};
use strata_types::BackendSpec;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stratad", version, about = "Strata storage server daemon")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured TCP port.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Initialise the tracing subscriber: `RUST_LOG` wins over the configured
/// level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stratad={level},strata_server={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.log.level);

    let object_store: Option<Arc<dyn ObjectStore>> = Some(
        strata_backend::object_store_from_spec(&BackendSpec {
            name: config.object.backend.clone(),
            component: "server".to_string(),
            path: config.object_path(),
        })
        .context("initialising object backend")?,
    );
    let kv_store: Option<Arc<KvStore>> = Some(
        strata_backend::kv_store_from_spec(&BackendSpec {
            name: config.kv.backend.clone(),
            component: "server".to_string(),
            path: config.kv_path(),
        })
        .context("initialising kv backend")?,
    );

    let port = cli.port.unwrap_or(config.server.port);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;

    info!(
        port,
        object_backend = %config.object.backend,
        kv_backend = %config.kv.backend,
        stripe_size = config.stripe_size(),
        "starting stratad"
    );

    let server = Server::new(object_store, kv_store, config.stripe_size());

    tokio::select! {
        result = server.serve(listener) => result.context("serving")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
