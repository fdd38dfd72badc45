//! Request server: the HTTP serving API.
//!
//! Exposes registered methods over axum. Requests carry batches of
//! instances (named input → array-like value); responses carry one
//! prediction per instance (named output → value).

use crate::config::ServerConfig;
use crate::error::{Result, ServioError};
use crate::observability;
use crate::ratelimit::RateLimiter;
use crate::runtime::engine::InferenceParameters;
use crate::serving::{GatewayHealth, ModelGateway, Prediction};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared server state for axum handlers.
#[derive(Clone)]
struct ServerState {
    gateway: Arc<ModelGateway>,
    limiter: Option<Arc<RateLimiter>>,
}

/// API error envelope: a mapped status code and a JSON `error` body.
struct ApiError(ServioError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.to_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<ServioError> for ApiError {
    fn from(e: ServioError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Build the serving router.
pub fn router(gateway: Arc<ModelGateway>, config: &ServerConfig) -> Router {
    let limiter = config
        .rate_limit
        .as_ref()
        .map(|settings| Arc::new(RateLimiter::new(settings.clone())));

    let state = ServerState { gateway, limiter };

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/v1/models", get(handle_list_models))
        .route("/v1/models/{model}", get(handle_describe_model))
        .route(
            "/v1/models/{model}/methods/{method}/infer",
            post(handle_infer),
        )
        .layer(DefaultBodyLimit::max(config.max_request_size))
        .with_state(state)
}

/// Run the serving API.
pub async fn run_server(gateway: Arc<ModelGateway>, config: ServerConfig) -> Result<()> {
    let app = router(gateway, &config);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Serving API listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ServioError::Network(e.to_string()))?;

    Ok(())
}

// API Handlers

async fn handle_health(State(state): State<ServerState>) -> Response {
    let health = state.gateway.health().await;
    let status = StatusCode::from_u16(health.status.to_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    observability::record_http_request("health", status.as_u16());
    (status, Json(HealthResponse { health })).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    #[serde(flatten)]
    health: GatewayHealth,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsResponse {
    gateway: crate::serving::GatewayStatsSnapshot,
    engine: crate::runtime::engine::InferenceStatsSnapshot,
    registry: crate::servable::registry::RegistryStatsSnapshot,
}

async fn handle_stats(State(state): State<ServerState>) -> Json<StatsResponse> {
    observability::record_http_request("stats", 200);
    Json(StatsResponse {
        gateway: state.gateway.stats(),
        engine: state.gateway.engine().stats(),
        registry: state.gateway.registry().stats(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct ListModelsResponse {
    models: Vec<ModelSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelSummary {
    name: String,
    latest_version: Option<u32>,
    deployed_version: Option<u32>,
    methods: Vec<String>,
}

async fn handle_list_models(State(state): State<ServerState>) -> Json<ListModelsResponse> {
    let registry = state.gateway.registry();
    let mut models = Vec::new();

    for name in registry.list_models().await {
        let latest = registry.get_latest(&name).await;
        let deployed = registry.get_deployed(&name).await;
        let methods = latest
            .as_ref()
            .map(|v| {
                v.manifest
                    .methods
                    .iter()
                    .map(|m| m.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        models.push(ModelSummary {
            name,
            latest_version: latest.map(|v| v.version),
            deployed_version: deployed.map(|v| v.version),
            methods,
        });
    }

    observability::record_http_request("list_models", 200);
    Json(ListModelsResponse { models })
}

#[derive(Debug, Serialize, Deserialize)]
struct DescribeModelResponse {
    name: String,
    format: crate::servable::model::ModelFormat,
    methods: Vec<crate::servable::manifest::MethodSpec>,
    versions: Vec<VersionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionSummary {
    version: u32,
    status: crate::servable::registry::ServableStatus,
    size_bytes: u64,
    created_at: u64,
    deployed_at: Option<u64>,
}

async fn handle_describe_model(
    State(state): State<ServerState>,
    Path(model): Path<String>,
) -> std::result::Result<Json<DescribeModelResponse>, ApiError> {
    let registry = state.gateway.registry();

    let latest = registry
        .get_latest(&model)
        .await
        .ok_or_else(|| ServioError::ModelNotFound(model.clone()))?;

    let versions = registry
        .list_versions(&model)
        .await
        .into_iter()
        .map(|v| VersionSummary {
            version: v.version,
            status: v.status,
            size_bytes: v.metadata.size_bytes,
            created_at: v.created_at,
            deployed_at: v.deployed_at,
        })
        .collect();

    observability::record_http_request("describe_model", 200);
    Ok(Json(DescribeModelResponse {
        name: model,
        format: latest.manifest.format,
        methods: latest.manifest.methods,
        versions,
    }))
}

/// Inference request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct InferApiRequest {
    /// Batch of instances: named input → array-like value.
    pub instances: Vec<HashMap<String, Value>>,
    /// Pin a model version (defaults to the routed version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Request parameters.
    #[serde(default)]
    pub parameters: InferenceParameters,
}

/// Inference response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct InferApiResponse {
    /// Model name.
    pub model: String,
    /// Model version used.
    pub version: u32,
    /// Method invoked.
    pub method: String,
    /// One prediction per instance, in request order.
    pub predictions: Vec<Prediction>,
    /// Summed graph execution time (us).
    pub inference_time_us: u64,
}

async fn handle_infer(
    State(state): State<ServerState>,
    Path((model, method)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<InferApiRequest>,
) -> std::result::Result<Json<InferApiResponse>, ApiError> {
    if let Some(ref limiter) = state.limiter {
        let client = headers
            .get("x-client-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        if !limiter.try_acquire(client) {
            observability::record_rate_limited();
            return Err(ServioError::RateLimited(client.to_string()).into());
        }
    }

    let start = std::time::Instant::now();
    let instance_count = request.instances.len();

    let result = state
        .gateway
        .infer(
            &model,
            &method,
            request.version,
            request.instances,
            request.parameters,
        )
        .await;

    let latency_us = start.elapsed().as_micros() as u64;
    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.to_status_code(),
    };
    observability::record_inference(&model, &method, status, instance_count, latency_us);

    let outcome = result?;
    Ok(Json(InferApiResponse {
        model: outcome.model,
        version: outcome.version,
        method: outcome.method,
        predictions: outcome.predictions,
        inference_time_us: outcome.inference_time_us,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitSettings, ServioConfig};
    use crate::servable::manifest::{ServableManifest, MethodSpec, MANIFEST_FILE};
    use crate::servable::model::{DataType, ModelFormat, TensorSpec};
    use serde_json::json;
    use std::time::Duration;

    fn write_echo_servable(root: &std::path::Path) {
        let model_dir = root.join("echo");
        std::fs::create_dir_all(model_dir.join("1")).unwrap();

        let manifest = ServableManifest {
            model_file: "model.mindir".to_string(),
            format: ModelFormat::MindIr,
            labels_file: None,
            methods: vec![MethodSpec::new("predict")
                .input(TensorSpec::new("x", DataType::Float32, vec![-1, 2]))
                .output(TensorSpec::new("x", DataType::Float32, vec![-1, 2]))],
        };
        std::fs::write(
            model_dir.join(MANIFEST_FILE),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(model_dir.join("1").join("model.mindir"), b"graph").unwrap();
    }

    async fn started_gateway(root: &std::path::Path) -> Arc<ModelGateway> {
        let mut config = ServioConfig::development();
        config.registry.model_root = root.to_path_buf();
        let gateway = Arc::new(ModelGateway::new(config));
        gateway.registry().scan().await.unwrap();
        gateway.start().await.unwrap();
        gateway
    }

    async fn serve(app: Router) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_infer_over_http() {
        let dir = tempfile::tempdir().unwrap();
        write_echo_servable(dir.path());
        let gateway = started_gateway(dir.path()).await;

        let addr = serve(router(gateway, &ServerConfig::default())).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!(
                "http://{}/v1/models/echo/methods/predict/infer",
                addr
            ))
            .json(&json!({"instances": [{"x": [[1.0, 2.0]]}, {"x": [[3.0, 4.0]]}]}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: InferApiResponse = response.json().await.unwrap();
        assert_eq!(body.model, "echo");
        assert_eq!(body.version, 1);
        assert_eq!(body.predictions.len(), 2);
        assert_eq!(body.predictions[0]["x"], json!([[1.0, 2.0]]));
        assert_eq!(body.predictions[1]["x"], json!([[3.0, 4.0]]));
    }

    #[tokio::test]
    async fn test_error_mapping_over_http() {
        let dir = tempfile::tempdir().unwrap();
        write_echo_servable(dir.path());
        let gateway = started_gateway(dir.path()).await;

        let addr = serve(router(gateway, &ServerConfig::default())).await;
        let client = reqwest::Client::new();

        // Unknown model → 404
        let response = client
            .post(format!(
                "http://{}/v1/models/missing/methods/predict/infer",
                addr
            ))
            .json(&json!({"instances": [{"x": [[1.0, 2.0]]}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Missing input → 400
        let response = client
            .post(format!(
                "http://{}/v1/models/echo/methods/predict/infer",
                addr
            ))
            .json(&json!({"instances": [{"wrong": [[1.0, 2.0]]}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: ErrorResponse = response.json().await.unwrap();
        assert!(body.error.contains("x"));
    }

    #[tokio::test]
    async fn test_list_and_describe_over_http() {
        let dir = tempfile::tempdir().unwrap();
        write_echo_servable(dir.path());
        let gateway = started_gateway(dir.path()).await;

        let addr = serve(router(gateway, &ServerConfig::default())).await;
        let client = reqwest::Client::new();

        let body: ListModelsResponse = client
            .get(format!("http://{}/v1/models", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.models.len(), 1);
        assert_eq!(body.models[0].name, "echo");
        assert_eq!(body.models[0].methods, vec!["predict".to_string()]);

        let body: DescribeModelResponse = client
            .get(format!("http://{}/v1/models/echo", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.name, "echo");
        assert_eq!(body.versions.len(), 1);

        let response = client
            .get(format!("http://{}/v1/models/missing", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_health_over_http() {
        let dir = tempfile::tempdir().unwrap();
        write_echo_servable(dir.path());
        let gateway = started_gateway(dir.path()).await;

        let addr = serve(router(Arc::clone(&gateway), &ServerConfig::default())).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        gateway.stop().await.unwrap();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_rate_limit_over_http() {
        let dir = tempfile::tempdir().unwrap();
        write_echo_servable(dir.path());
        let gateway = started_gateway(dir.path()).await;

        let config = ServerConfig {
            rate_limit: Some(RateLimitSettings {
                max_requests: 1,
                window: Duration::from_secs(60),
                burst: 0,
                per_client: false,
            }),
            ..ServerConfig::default()
        };
        let addr = serve(router(gateway, &config)).await;
        let client = reqwest::Client::new();

        let body = json!({"instances": [{"x": [[1.0, 2.0]]}]});
        let url = format!("http://{}/v1/models/echo/methods/predict/infer", addr);

        let first = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(first.status(), 200);

        let second = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(second.status(), 429);
    }
}
