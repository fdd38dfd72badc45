//! Model operations

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use servio::client::ServingClient;
use tabled::Tabled;

#[derive(Args)]
pub struct ModelArgs {
    #[command(subcommand)]
    command: ModelCommands,
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List registered models
    #[command(alias = "ls")]
    List,

    /// Describe a model: format, methods, versions
    Describe {
        /// Model name
        name: String,
    },

    /// List versions of a model
    Versions {
        /// Model name
        name: String,
    },
}

#[derive(Serialize, Tabled)]
struct ModelRow {
    name: String,
    latest: String,
    deployed: String,
    methods: String,
}

#[derive(Serialize, Tabled)]
struct VersionRow {
    version: u32,
    status: String,
    size_bytes: u64,
    created_at: u64,
}

pub async fn execute(args: ModelArgs, client: &ServingClient, format: OutputFormat) -> Result<()> {
    match args.command {
        ModelCommands::List => {
            let models = client.list_models().await.context("Failed to list models")?;
            let rows: Vec<ModelRow> = models
                .into_iter()
                .map(|m| ModelRow {
                    name: m.name,
                    latest: m
                        .latest_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    deployed: m
                        .deployed_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    methods: m.methods.join(", "),
                })
                .collect();
            output::print_output(&rows, format);
        }
        ModelCommands::Describe { name } => {
            let detail = client
                .describe_model(&name)
                .await
                .with_context(|| format!("Failed to describe model {}", name))?;
            output::print_single(&detail, format);
        }
        ModelCommands::Versions { name } => {
            let detail = client
                .describe_model(&name)
                .await
                .with_context(|| format!("Failed to describe model {}", name))?;
            let rows: Vec<VersionRow> = detail
                .versions
                .into_iter()
                .map(|v| VersionRow {
                    version: v.version,
                    status: format!("{:?}", v.status).to_lowercase(),
                    size_bytes: v.size_bytes,
                    created_at: v.created_at,
                })
                .collect();
            output::print_output(&rows, format);
        }
    }

    Ok(())
}
