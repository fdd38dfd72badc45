//! Servio CLI - Command-line interface for the Servio model serving gateway

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod output;

use commands::{admin, infer, model};
use servio::client::ServingClient;

/// Servio CLI - model serving gateway management
#[derive(Parser)]
#[command(name = "servio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SERVIO_CONFIG")]
    config: Option<String>,

    /// Gateway endpoint (host:port)
    #[arg(short, long, env = "SERVIO_ENDPOINT")]
    endpoint: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Model operations
    #[command(alias = "m")]
    Model(model::ModelArgs),

    /// Run inference against a model method
    #[command(alias = "i")]
    Infer(infer::InferArgs),

    /// Check gateway health
    Health,

    /// Show gateway statistics
    Stats,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        console::set_colors_enabled(false);
    }

    // Load configuration
    let cfg = config::Config::load(cli.config.as_deref())?;
    let endpoint = cli.endpoint.unwrap_or_else(|| cfg.endpoint.clone());

    // Create client
    let client = ServingClient::from_addr(&endpoint)
        .map_err(|e| anyhow::anyhow!("Invalid endpoint {}: {}", endpoint, e))?;

    // Execute command
    let result = match cli.command {
        Commands::Model(args) => model::execute(args, &client, cli.output).await,
        Commands::Infer(args) => infer::execute(args, &client, cli.output).await,
        Commands::Health => admin::health(&client).await,
        Commands::Stats => admin::stats(&client, cli.output).await,
        Commands::Completion { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            clap_complete::generate(shell, &mut cmd, "servio", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        if cli.verbose {
            eprintln!("{:?}", e);
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}
