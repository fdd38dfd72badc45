//! Observability for Servio.
//!
//! Logging initialization, Prometheus metrics, and recording helpers.

use crate::config::ObservabilityConfig;
use crate::error::{Result, ServioError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ServioError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ServioError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| ServioError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ServioError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    // Registry metrics
    gauge!("servio_registry_models_total").set(0.0);
    gauge!("servio_registry_versions_total").set(0.0);
    gauge!("servio_registry_deployed_total").set(0.0);

    // Runtime metrics
    gauge!("servio_runtime_models_loaded").set(0.0);
    counter!("servio_inference_requests_total").absolute(0);
    counter!("servio_inference_errors_total").absolute(0);
    counter!("servio_inference_timeouts_total").absolute(0);
    counter!("servio_instances_total").absolute(0);

    // Server metrics
    counter!("servio_http_requests_total").absolute(0);
    counter!("servio_http_errors_total").absolute(0);
    counter!("servio_rate_limited_total").absolute(0);
}

/// Record an inference request outcome.
pub fn record_inference(model: &str, method: &str, status: u16, instances: usize, latency_us: u64) {
    counter!(
        "servio_inference_requests_total",
        "model" => model.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    counter!("servio_instances_total").increment(instances as u64);
    histogram!("servio_inference_latency_us", "model" => model.to_string())
        .record(latency_us as f64);

    if status >= 400 {
        counter!("servio_inference_errors_total").increment(1);
    }
    if status == 504 {
        counter!("servio_inference_timeouts_total").increment(1);
    }
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, status: u16) {
    counter!(
        "servio_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if status >= 400 {
        counter!("servio_http_errors_total").increment(1);
    }
}

/// Record a rate-limited request.
pub fn record_rate_limited() {
    counter!("servio_rate_limited_total").increment(1);
}

/// Update registry gauges.
pub fn update_registry_metrics(models: u64, versions: u64, deployed: u64) {
    gauge!("servio_registry_models_total").set(models as f64);
    gauge!("servio_registry_versions_total").set(versions as f64);
    gauge!("servio_registry_deployed_total").set(deployed as f64);
}

/// Update runtime gauges.
pub fn update_runtime_metrics(models_loaded: usize) {
    gauge!("servio_runtime_models_loaded").set(models_loaded as f64);
}
