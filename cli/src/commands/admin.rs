//! Health and statistics commands

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use servio::client::ServingClient;

pub async fn health(client: &ServingClient) -> Result<()> {
    let healthy = client.health().await.context("Health check failed")?;
    if healthy {
        output::success("Gateway is healthy");
    } else {
        output::error("Gateway is unhealthy");
        std::process::exit(1);
    }
    Ok(())
}

pub async fn stats(client: &ServingClient, format: OutputFormat) -> Result<()> {
    let stats = client.stats().await.context("Failed to fetch statistics")?;
    output::print_single(&stats, format);
    Ok(())
}
