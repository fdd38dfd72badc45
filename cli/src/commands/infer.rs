//! Inference command

use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use clap::Args;
use servio::client::{Instance, ServingClient};
use servio::runtime::engine::InferenceParameters;
use std::path::PathBuf;

#[derive(Args)]
pub struct InferArgs {
    /// Model name
    model: String,

    /// Method name
    #[arg(short, long, default_value = "predict")]
    method: String,

    /// Instances as inline JSON (a list of objects)
    #[arg(short, long, conflicts_with = "file")]
    instances: Option<String>,

    /// Read instances from a JSON file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Pin a model version
    #[arg(long)]
    version: Option<u32>,

    /// Request timeout override in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

pub async fn execute(args: InferArgs, client: &ServingClient, format: OutputFormat) -> Result<()> {
    let raw = match (&args.instances, &args.file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => bail!("Provide instances with --instances or --file"),
    };

    let instances: Vec<Instance> =
        serde_json::from_str(&raw).context("Instances must be a JSON list of objects")?;

    let parameters = InferenceParameters {
        timeout_ms: args.timeout_ms,
        output_names: None,
    };

    let result = client
        .infer_request(&args.model, &args.method, &instances, args.version, parameters)
        .await
        .with_context(|| format!("Inference failed for {}.{}", args.model, args.method))?;

    output::print_single(&result, format);
    output::success(format!(
        "{} instance(s) served by {} v{} in {}us",
        result.predictions.len(),
        result.model,
        result.version,
        result.inference_time_us
    ));

    Ok(())
}
