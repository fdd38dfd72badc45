//! Servio gateway server binary.

use clap::Parser;
use servio::config::ServioConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "servio-server")]
#[command(about = "Servio model serving gateway")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SERVIO_CONFIG")]
    config: Option<PathBuf>,

    /// Model root directory
    #[arg(long, env = "SERVIO_MODEL_ROOT", default_value = "/var/lib/servio/models")]
    model_root: PathBuf,

    /// Serving API bind address
    #[arg(long, env = "SERVIO_BIND_ADDR", default_value = "0.0.0.0:5500")]
    bind_addr: String,

    /// Metrics bind address
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Disable the metrics server
    #[arg(long)]
    no_metrics: bool,

    /// Enable dynamic batching
    #[arg(long)]
    batching: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let mut config = if let Some(config_path) = args.config {
        ServioConfig::from_file(&config_path)?
    } else {
        ServioConfig::default()
    };

    // Override with CLI args
    config.registry.model_root = args.model_root;
    config.server.bind_addr = args.bind_addr.parse()?;
    config.observability.metrics_addr = args.metrics_addr.parse()?;
    if args.no_metrics {
        config.observability.metrics_enabled = false;
    }
    if args.batching {
        config.runtime.batching.enabled = true;
    }

    config.validate()?;

    // Run the gateway
    servio::run(config).await?;

    Ok(())
}
