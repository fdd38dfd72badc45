// Serving gateway: endpoint routing and instance dispatch

use crate::config::ServioConfig;
use crate::error::{Result, ServioError};
use crate::health::{ComponentHealth, HealthStatus};
use crate::runtime::batch::{BatchQueue, Batcher};
use crate::runtime::engine::{InferenceEngine, InferenceParameters, InferenceRequest};
use crate::runtime::tensor::TensorData;
use crate::servable::model::epoch_millis;
use crate::servable::registry::{ServableRegistry, ServableStatus, ServableVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A named serving endpoint binding a model version to a traffic weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingEndpoint {
    /// Endpoint name
    pub name: String,
    /// Model name
    pub model: String,
    /// Model version (None for the registry-resolved version)
    pub version: Option<u32>,
    /// Traffic weight among active endpoints of the same model
    pub weight: f32,
    /// Is active
    pub active: bool,
    /// Created timestamp
    pub created_at: u64,
    /// Updated timestamp
    pub updated_at: u64,
}

impl ServingEndpoint {
    /// Creates an active endpoint with full weight.
    pub fn new(name: &str, model: &str, version: Option<u32>) -> Self {
        let now = epoch_millis();
        Self {
            name: name.to_string(),
            model: model.to_string(),
            version,
            weight: 1.0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial endpoint update.
#[derive(Debug, Clone, Default)]
pub struct EndpointUpdate {
    pub weight: Option<f32>,
    pub active: Option<bool>,
    pub version: Option<Option<u32>>,
}

/// One instance prediction: named outputs to array-like values.
pub type Prediction = HashMap<String, Value>;

/// Outcome of an instances request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferOutcome {
    /// Model name
    pub model: String,
    /// Model version used
    pub version: u32,
    /// Method invoked
    pub method: String,
    /// One prediction per instance, in request order
    pub predictions: Vec<Prediction>,
    /// Summed graph execution time (us)
    pub inference_time_us: u64,
}

/// Gateway statistics.
#[derive(Default)]
pub struct GatewayStats {
    /// Total requests
    pub total_requests: AtomicU64,
    /// Successful requests
    pub successful_requests: AtomicU64,
    /// Failed requests
    pub failed_requests: AtomicU64,
    /// Total instances served
    pub instances_served: AtomicU64,
    /// Total latency (us)
    pub total_latency_us: AtomicU64,
}

/// Model gateway: owns the registry, the engine, and the endpoint table, and
/// dispatches instance batches.
pub struct ModelGateway {
    config: ServioConfig,
    registry: Arc<ServableRegistry>,
    engine: Arc<InferenceEngine>,
    batch_queue: RwLock<Option<BatchQueue>>,
    batcher: RwLock<Option<Batcher>>,
    endpoints: Arc<RwLock<HashMap<String, ServingEndpoint>>>,
    stats: Arc<GatewayStats>,
    started_at: u64,
    running: Arc<RwLock<bool>>,
}

impl ModelGateway {
    /// Creates a gateway from configuration.
    pub fn new(config: ServioConfig) -> Self {
        let registry = Arc::new(ServableRegistry::new(config.registry.clone()));
        let engine = Arc::new(InferenceEngine::new(config.runtime.clone()));
        Self::with_components(config, registry, engine)
    }

    /// Creates a gateway with existing components.
    pub fn with_components(
        config: ServioConfig,
        registry: Arc<ServableRegistry>,
        engine: Arc<InferenceEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            batch_queue: RwLock::new(None),
            batcher: RwLock::new(None),
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(GatewayStats::default()),
            started_at: epoch_millis(),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Starts the gateway: engine, batcher, and endpoints for every model
    /// the registry resolves a servable version for.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        self.engine.start().await?;

        if self.config.runtime.batching.enabled {
            let batcher = Batcher::spawn(
                Arc::clone(&self.engine),
                self.config.runtime.batching.clone(),
            );
            *self.batch_queue.write().await = Some(batcher.queue());
            *self.batcher.write().await = Some(batcher);
        }

        self.load_servables().await?;

        Ok(())
    }

    /// Stops the gateway.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        *self.batch_queue.write().await = None;
        if let Some(batcher) = self.batcher.write().await.take() {
            batcher.shutdown().await;
        }

        self.engine.stop().await?;
        Ok(())
    }

    /// Loads every resolvable servable into the engine and creates its
    /// default endpoint.
    async fn load_servables(&self) -> Result<()> {
        for name in self.registry.list_models().await {
            let version = match self.registry.resolve(&name, None).await {
                Ok(v) => v,
                Err(_) => continue,
            };

            self.engine.load_version(&name, &version).await?;

            let endpoint = ServingEndpoint::new(
                &format!("{}-v{}", name, version.version),
                &name,
                Some(version.version),
            );
            let mut endpoints = self.endpoints.write().await;
            endpoints.insert(endpoint.name.clone(), endpoint);

            info!(model = %name, version = version.version, "Serving endpoint created");
        }
        Ok(())
    }

    /// Handles an instances request: method lookup, instance decoding,
    /// per-instance dispatch, and prediction encoding.
    pub async fn infer(
        &self,
        model: &str,
        method_name: &str,
        version: Option<u32>,
        instances: Vec<HashMap<String, Value>>,
        parameters: InferenceParameters,
    ) -> Result<InferOutcome> {
        let start = std::time::Instant::now();
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let result = self
            .infer_inner(model, method_name, version, instances, parameters)
            .await;

        let latency = start.elapsed().as_micros() as u64;
        self.stats.total_latency_us.fetch_add(latency, Ordering::Relaxed);
        match &result {
            Ok(outcome) => {
                self.stats.successful_requests.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .instances_served
                    .fetch_add(outcome.predictions.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
        }

        result
    }

    async fn infer_inner(
        &self,
        model: &str,
        method_name: &str,
        version: Option<u32>,
        instances: Vec<HashMap<String, Value>>,
        parameters: InferenceParameters,
    ) -> Result<InferOutcome> {
        if instances.is_empty() {
            return Err(ServioError::InvalidArgument(
                "Request contains no instances".to_string(),
            ));
        }

        let servable = self.route(model, version).await?;
        let method = servable
            .manifest
            .method(method_name)
            .ok_or_else(|| ServioError::MethodNotFound {
                model: model.to_string(),
                method: method_name.to_string(),
            })?
            .clone();

        // Lazy-load versions that were registered after start
        if !self.engine.is_loaded(model, servable.version).await {
            self.engine.load_version(model, &servable).await?;
        }

        // Decode instances into tensors up front so every instance either
        // dispatches or the whole request fails with a validation error
        let mut requests = Vec::with_capacity(instances.len());
        for instance in &instances {
            let mut request = InferenceRequest::new(model, servable.version, method_name)
                .with_parameters(parameters.clone());
            for spec in &method.inputs {
                let value = instance
                    .get(&spec.name)
                    .ok_or_else(|| ServioError::MissingInput(spec.name.clone()))?;
                request
                    .inputs
                    .insert(spec.name.clone(), TensorData::from_json(value, spec)?);
            }
            requests.push(request);
        }

        let batch_queue = self.batch_queue.read().await.clone();
        let responses = futures::future::join_all(requests.into_iter().map(|request| {
            let engine = Arc::clone(&self.engine);
            let batch_queue = batch_queue.clone();
            async move {
                match batch_queue {
                    Some(queue) => queue.submit(request).await,
                    None => engine.infer(request).await,
                }
            }
        }))
        .await;

        let mut predictions = Vec::with_capacity(responses.len());
        let mut inference_time_us = 0;
        for response in responses {
            let response = response?;
            inference_time_us += response.inference_time_us;

            let mut prediction = Prediction::new();
            for (name, tensor) in response.outputs {
                prediction.insert(name, tensor.to_json()?);
            }
            predictions.push(prediction);
        }

        Ok(InferOutcome {
            model: model.to_string(),
            version: servable.version,
            method: method_name.to_string(),
            predictions,
            inference_time_us,
        })
    }

    /// Resolve which servable version a request targets: a pinned version
    /// wins; otherwise a weighted pick across the model's active endpoints;
    /// otherwise the registry's resolution.
    async fn route(&self, model: &str, version: Option<u32>) -> Result<ServableVersion> {
        if version.is_some() {
            return self.registry.resolve(model, version).await;
        }

        let endpoints = self.endpoints.read().await;
        let matching: Vec<&ServingEndpoint> = endpoints
            .values()
            .filter(|e| e.model == model && e.active && e.weight > 0.0)
            .collect();

        let selected_version = match matching.len() {
            0 => None,
            1 => matching[0].version,
            _ => {
                let total_weight: f32 = matching.iter().map(|e| e.weight).sum();
                let roll: f32 = rand::random::<f32>() * total_weight;
                let mut cumulative = 0.0;
                let mut picked = matching[0];
                for endpoint in &matching {
                    cumulative += endpoint.weight;
                    if roll <= cumulative {
                        picked = endpoint;
                        break;
                    }
                }
                picked.version
            }
        };
        drop(endpoints);

        self.registry.resolve(model, selected_version).await
    }

    /// Creates an endpoint after checking the target version is servable.
    pub async fn create_endpoint(&self, endpoint: ServingEndpoint) -> Result<()> {
        let servable = self
            .registry
            .resolve(&endpoint.model, endpoint.version)
            .await?;

        if servable.status != ServableStatus::Ready && servable.status != ServableStatus::Deployed {
            return Err(ServioError::InvalidOperation(format!(
                "Version {} of {} is not servable",
                servable.version, endpoint.model
            )));
        }

        if !self.engine.is_loaded(&endpoint.model, servable.version).await {
            self.engine.load_version(&endpoint.model, &servable).await?;
        }

        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(endpoint.name.clone(), endpoint);
        Ok(())
    }

    /// Updates an endpoint.
    pub async fn update_endpoint(&self, name: &str, updates: EndpointUpdate) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(name)
            .ok_or_else(|| ServioError::NotFound(format!("Endpoint {} not found", name)))?;

        if let Some(weight) = updates.weight {
            endpoint.weight = weight;
        }
        if let Some(active) = updates.active {
            endpoint.active = active;
        }
        if let Some(version) = updates.version {
            endpoint.version = version;
        }
        endpoint.updated_at = epoch_millis();
        Ok(())
    }

    /// Deletes an endpoint. Returns whether it existed.
    pub async fn delete_endpoint(&self, name: &str) -> Result<bool> {
        let mut endpoints = self.endpoints.write().await;
        Ok(endpoints.remove(name).is_some())
    }

    /// Lists endpoints.
    pub async fn list_endpoints(&self) -> Vec<ServingEndpoint> {
        let endpoints = self.endpoints.read().await;
        let mut list: Vec<ServingEndpoint> = endpoints.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Gets an endpoint by name.
    pub async fn get_endpoint(&self, name: &str) -> Option<ServingEndpoint> {
        let endpoints = self.endpoints.read().await;
        endpoints.get(name).cloned()
    }

    /// Creates a canary endpoint taking `initial_percentage` of the model's
    /// traffic, rebalancing the production endpoint.
    pub async fn create_canary(
        &self,
        model: &str,
        new_version: u32,
        initial_percentage: f32,
    ) -> Result<()> {
        let canary = ServingEndpoint {
            weight: initial_percentage / 100.0,
            ..ServingEndpoint::new(&format!("{}-canary", model), model, Some(new_version))
        };
        self.create_endpoint(canary).await?;

        let production = self.production_endpoint(model).await;
        if let Some(production) = production {
            self.update_endpoint(
                &production.name,
                EndpointUpdate {
                    weight: Some((100.0 - initial_percentage) / 100.0),
                    ..Default::default()
                },
            )
            .await?;
        }

        info!(model = %model, version = new_version, percentage = initial_percentage, "Canary created");
        Ok(())
    }

    /// Promotes the canary: production takes the canary version and full
    /// weight; the canary is deactivated.
    pub async fn promote_canary(&self, model: &str) -> Result<()> {
        let canary_name = format!("{}-canary", model);
        let canary = self
            .get_endpoint(&canary_name)
            .await
            .ok_or_else(|| ServioError::NotFound(format!("No canary for {}", model)))?;

        if let Some(production) = self.production_endpoint(model).await {
            self.update_endpoint(
                &production.name,
                EndpointUpdate {
                    weight: Some(1.0),
                    active: Some(true),
                    version: Some(canary.version),
                },
            )
            .await?;
        }

        self.update_endpoint(
            &canary_name,
            EndpointUpdate {
                weight: Some(0.0),
                active: Some(false),
                ..Default::default()
            },
        )
        .await?;

        info!(model = %model, version = ?canary.version, "Canary promoted");
        Ok(())
    }

    /// Rolls the canary back: production returns to full weight.
    pub async fn rollback_canary(&self, model: &str) -> Result<()> {
        let canary_name = format!("{}-canary", model);
        if self.get_endpoint(&canary_name).await.is_none() {
            return Err(ServioError::NotFound(format!("No canary for {}", model)));
        }

        if let Some(production) = self.production_endpoint(model).await {
            self.update_endpoint(
                &production.name,
                EndpointUpdate {
                    weight: Some(1.0),
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        }

        self.update_endpoint(
            &canary_name,
            EndpointUpdate {
                weight: Some(0.0),
                active: Some(false),
                ..Default::default()
            },
        )
        .await?;

        info!(model = %model, "Canary rolled back");
        Ok(())
    }

    /// The model's non-canary endpoint, if any.
    async fn production_endpoint(&self, model: &str) -> Option<ServingEndpoint> {
        let canary_name = format!("{}-canary", model);
        let endpoints = self.endpoints.read().await;
        endpoints
            .values()
            .find(|e| e.model == model && e.name != canary_name)
            .cloned()
    }

    /// Gets gateway statistics.
    pub fn stats(&self) -> GatewayStatsSnapshot {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        let successful = self.stats.successful_requests.load(Ordering::Relaxed);
        let total_latency = self.stats.total_latency_us.load(Ordering::Relaxed);

        GatewayStatsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            instances_served: self.stats.instances_served.load(Ordering::Relaxed),
            avg_latency_us: if total > 0 { total_latency / total } else { 0 },
        }
    }

    /// Gets gateway health.
    pub async fn health(&self) -> GatewayHealth {
        let running = *self.running.read().await;
        let loaded = self.engine.list_loaded().await;
        let endpoints = self.endpoints.read().await;
        let active_endpoints = endpoints.values().filter(|e| e.active).count();

        let status = if !running {
            HealthStatus::Unhealthy
        } else if loaded.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        GatewayHealth {
            status,
            components: vec![
                ComponentHealth::new("engine", if running { HealthStatus::Healthy } else { HealthStatus::Unhealthy }),
                ComponentHealth::new(
                    "registry",
                    if self.registry.stats().total_versions > 0 {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Degraded
                    },
                ),
            ],
            models_loaded: loaded.len(),
            active_endpoints,
            total_endpoints: endpoints.len(),
            uptime_seconds: (epoch_millis().saturating_sub(self.started_at)) / 1000,
        }
    }

    /// Gets the registry.
    pub fn registry(&self) -> Arc<ServableRegistry> {
        Arc::clone(&self.registry)
    }

    /// Gets the engine.
    pub fn engine(&self) -> Arc<InferenceEngine> {
        Arc::clone(&self.engine)
    }

    /// Gateway configuration.
    pub fn config(&self) -> &ServioConfig {
        &self.config
    }
}

/// Gateway statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub instances_served: u64,
    pub avg_latency_us: u64,
}

/// Gateway health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub models_loaded: usize,
    pub active_endpoints: usize,
    pub total_endpoints: usize,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servable::manifest::{ServableManifest, MethodSpec, MANIFEST_FILE};
    use crate::servable::model::{DataType, ModelFormat, PostprocessStep, TensorSpec};
    use serde_json::json;

    fn write_servable(root: &std::path::Path, name: &str, versions: &[u32]) {
        let model_dir = root.join(name);
        std::fs::create_dir_all(&model_dir).unwrap();

        let manifest = ServableManifest {
            model_file: "model.mindir".to_string(),
            format: ModelFormat::MindIr,
            labels_file: Some("labels.txt".to_string()),
            methods: vec![
                MethodSpec::new("classify")
                    .input(TensorSpec::new("score", DataType::Float32, vec![-1, 3]))
                    .output(TensorSpec::new("score", DataType::Float32, vec![-1, 3]))
                    .postprocess(PostprocessStep::Argmax { axis: -1 })
                    .postprocess(PostprocessStep::DecodeLabels),
                MethodSpec::new("echo")
                    .input(TensorSpec::new("x", DataType::Float32, vec![-1, 2]))
                    .output(TensorSpec::new("x", DataType::Float32, vec![-1, 2])),
            ],
        };
        std::fs::write(
            model_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(model_dir.join("labels.txt"), "cat\ndog\nbird\n").unwrap();

        for v in versions {
            let version_dir = model_dir.join(v.to_string());
            std::fs::create_dir_all(&version_dir).unwrap();
            std::fs::write(version_dir.join("model.mindir"), format!("graph-v{}", v)).unwrap();
        }
    }

    async fn gateway(root: &std::path::Path) -> ModelGateway {
        let mut config = ServioConfig::development();
        config.registry.model_root = root.to_path_buf();
        let gateway = ModelGateway::new(config);
        gateway.registry().scan().await.unwrap();
        gateway.start().await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_gateway_start_creates_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1, 2]);

        let gateway = gateway(dir.path()).await;

        let endpoints = gateway.list_endpoints().await;
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].model, "classifier");
        assert_eq!(endpoints[0].version, Some(2));

        gateway.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gateway_infer_instances() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1]);

        let gateway = gateway(dir.path()).await;

        let instances = vec![
            HashMap::from([("score".to_string(), json!([[0.0, 1.0, 0.0]]))]),
            HashMap::from([("score".to_string(), json!([[1.0, 0.0, 0.0]]))]),
        ];

        let outcome = gateway
            .infer("classifier", "classify", None, instances, Default::default())
            .await
            .unwrap();

        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.predictions.len(), 2);
        assert_eq!(outcome.predictions[0]["score"], json!(["dog"]));
        assert_eq!(outcome.predictions[1]["score"], json!(["cat"]));

        let stats = gateway.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.instances_served, 2);

        gateway.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gateway_infer_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1]);

        let gateway = gateway(dir.path()).await;

        // Unknown model
        let err = gateway
            .infer("missing", "classify", None, vec![HashMap::new()], Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServioError::ModelNotFound(_)));

        // Unknown method
        let err = gateway
            .infer("classifier", "segment", None, vec![HashMap::new()], Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServioError::MethodNotFound { .. }));

        // Empty instances
        let err = gateway
            .infer("classifier", "classify", None, vec![], Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServioError::InvalidArgument(_)));

        // Missing named input
        let err = gateway
            .infer(
                "classifier",
                "classify",
                None,
                vec![HashMap::from([("wrong".to_string(), json!([1.0]))])],
                Default::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServioError::MissingInput(_)));

        gateway.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gateway_pinned_version() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1, 2]);

        let gateway = gateway(dir.path()).await;

        let instances = vec![HashMap::from([("x".to_string(), json!([[1.5, 2.5]]))])];
        let outcome = gateway
            .infer("classifier", "echo", Some(1), instances, Default::default())
            .await
            .unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.predictions[0]["x"], json!([[1.5, 2.5]]));

        gateway.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_canary_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1, 2]);

        let mut config = ServioConfig::development();
        config.registry.model_root = dir.path().to_path_buf();
        let gateway = ModelGateway::new(config);
        gateway.registry().scan().await.unwrap();
        gateway.registry().deploy("classifier", 1).await.unwrap();
        gateway.start().await.unwrap();

        gateway.create_canary("classifier", 2, 10.0).await.unwrap();

        let canary = gateway.get_endpoint("classifier-canary").await.unwrap();
        assert!((canary.weight - 0.1).abs() < 1e-6);
        let production = gateway.get_endpoint("classifier-v1").await.unwrap();
        assert!((production.weight - 0.9).abs() < 1e-6);

        gateway.promote_canary("classifier").await.unwrap();
        let production = gateway.get_endpoint("classifier-v1").await.unwrap();
        assert_eq!(production.version, Some(2));
        assert!((production.weight - 1.0).abs() < 1e-6);
        let canary = gateway.get_endpoint("classifier-canary").await.unwrap();
        assert!(!canary.active);

        gateway.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gateway_health() {
        let dir = tempfile::tempdir().unwrap();
        write_servable(dir.path(), "classifier", &[1]);

        let gateway = gateway(dir.path()).await;
        let health = gateway.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.models_loaded, 1);

        gateway.stop().await.unwrap();
        let health = gateway.health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
