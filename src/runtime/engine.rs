// Inference engine: model loading, validation, and execution

use super::backend::{load_labels, GraphBackend, LoadedArtifact};
use super::pipeline;
use super::tensor::TensorData;
use crate::config::RuntimeConfig;
use crate::error::{Result, ServioError};
use crate::servable::model::{epoch_millis, Model, ModelFormat};
use crate::servable::registry::ServableVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

/// Inference request against a loaded model version.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Request ID
    pub id: String,
    /// Model name
    pub model: String,
    /// Model version
    pub version: u32,
    /// Method to invoke
    pub method: String,
    /// Input tensors by name
    pub inputs: HashMap<String, TensorData>,
    /// Parameters
    pub parameters: InferenceParameters,
    /// Timestamp (epoch millis)
    pub timestamp: u64,
}

impl InferenceRequest {
    /// Creates a new request
    pub fn new(model: &str, version: u32, method: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.to_string(),
            version,
            method: method.to_string(),
            inputs: HashMap::new(),
            parameters: InferenceParameters::default(),
            timestamp: epoch_millis(),
        }
    }

    /// Adds an input tensor
    pub fn with_input(mut self, name: &str, data: TensorData) -> Self {
        self.inputs.insert(name.to_string(), data);
        self
    }

    /// Sets parameters
    pub fn with_parameters(mut self, parameters: InferenceParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Inference parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceParameters {
    /// Timeout override in milliseconds
    pub timeout_ms: Option<u64>,
    /// Restrict which output tensors are returned
    pub output_names: Option<Vec<String>>,
}

/// Inference response.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    /// Request ID
    pub request_id: String,
    /// Model name
    pub model: String,
    /// Model version
    pub version: u32,
    /// Method invoked
    pub method: String,
    /// Output tensors by name
    pub outputs: HashMap<String, TensorData>,
    /// Graph execution time in microseconds
    pub inference_time_us: u64,
    /// Total time including pre/postprocessing
    pub total_time_us: u64,
}

/// A model version loaded into the engine.
struct LoadedModel {
    /// Servable model
    model: Model,
    /// Version
    version: u32,
    /// Execution backend
    backend: GraphBackend,
    /// Artifact the backend was built from
    artifact: LoadedArtifact,
    /// Labels for decode_labels, if declared
    labels: Option<Vec<String>>,
    /// Load time (epoch millis)
    loaded_at: u64,
    /// Inference count
    inference_count: AtomicU64,
}

/// Inference engine.
pub struct InferenceEngine {
    /// Configuration
    config: RuntimeConfig,
    /// Loaded models keyed by `name:vN`
    models: Arc<RwLock<HashMap<String, LoadedModel>>>,
    /// Concurrency limiter
    semaphore: Arc<Semaphore>,
    /// Statistics
    stats: Arc<InferenceStats>,
    /// Running flag
    running: Arc<RwLock<bool>>,
}

/// Inference statistics.
#[derive(Default)]
pub struct InferenceStats {
    /// Total requests
    pub total_requests: AtomicU64,
    /// Successful requests
    pub successful_requests: AtomicU64,
    /// Failed requests
    pub failed_requests: AtomicU64,
    /// Timed-out requests
    pub timeout_requests: AtomicU64,
    /// Total graph execution time (us)
    pub total_inference_time_us: AtomicU64,
}

fn model_key(name: &str, version: u32) -> String {
    format!("{}:v{}", name, version)
}

impl InferenceEngine {
    /// Creates a new inference engine
    pub fn new(config: RuntimeConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            models: Arc::new(RwLock::new(HashMap::new())),
            semaphore,
            stats: Arc::new(InferenceStats::default()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Starts the engine.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        *running = true;
        Ok(())
    }

    /// Stops the engine.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        *running = false;
        Ok(())
    }

    /// Whether the engine accepts requests.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Engine configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Loads a model version: reads and fingerprints the artifact, builds
    /// the format backend, and resolves the labels file if declared.
    pub async fn load_model(&self, model: Model, version: u32) -> Result<()> {
        let name = model.metadata.name.clone();

        let artifact_path = model.artifact_path.clone().ok_or_else(|| {
            ServioError::Artifact(format!("Model {} has no artifact path", name))
        })?;
        let artifact = LoadedArtifact::read(&artifact_path).await?;

        // The labels file lives next to the manifest, one level above the
        // version directory.
        let labels = match &model.manifest.labels_file {
            Some(file) => {
                let model_dir = artifact_path
                    .parent()
                    .and_then(|p| p.parent())
                    .ok_or_else(|| {
                        ServioError::Artifact(format!(
                            "Cannot resolve model directory for {}",
                            artifact_path.display()
                        ))
                    })?;
                Some(load_labels(&model_dir.join(file)).await?)
            }
            None => None,
        };

        let backend = GraphBackend::for_format(model.format(), &self.config.device);

        info!(
            model = %name,
            version,
            format = %model.format(),
            size_bytes = artifact.size_bytes,
            fingerprint = %artifact.fingerprint,
            "Model loaded"
        );

        let loaded = LoadedModel {
            model,
            version,
            backend,
            artifact,
            labels,
            loaded_at: epoch_millis(),
            inference_count: AtomicU64::new(0),
        };

        let mut models = self.models.write().await;
        models.insert(model_key(&name, version), loaded);

        Ok(())
    }

    /// Loads a registered servable version.
    pub async fn load_version(&self, name: &str, version: &ServableVersion) -> Result<()> {
        let mut metadata = version.metadata.clone();
        metadata.name = name.to_string();
        let model = Model::with_artifact(
            version.manifest.clone(),
            metadata,
            version.artifact_path.clone(),
        );
        self.load_model(model, version.version).await
    }

    /// Unloads a model version. Returns whether it was loaded.
    pub async fn unload_model(&self, name: &str, version: u32) -> Result<bool> {
        let mut models = self.models.write().await;
        let removed = models.remove(&model_key(name, version)).is_some();
        if removed {
            info!(model = %name, version, "Model unloaded");
        }
        Ok(removed)
    }

    /// Whether a model version is loaded.
    pub async fn is_loaded(&self, name: &str, version: u32) -> bool {
        let models = self.models.read().await;
        models.contains_key(&model_key(name, version))
    }

    /// Runs inference for a request.
    pub async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let start = std::time::Instant::now();
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.is_running().await {
            self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
            return Err(ServioError::Unavailable("Engine is not running".to_string()));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ServioError::Unavailable("Engine shutting down".to_string()))?;

        let timeout = std::time::Duration::from_millis(
            request
                .parameters
                .timeout_ms
                .unwrap_or(self.config.request_timeout.as_millis() as u64),
        );

        let result = tokio::time::timeout(timeout, self.execute(&request)).await;

        match result {
            Ok(Ok(mut response)) => {
                response.total_time_us = start.elapsed().as_micros() as u64;
                self.stats.successful_requests.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .total_inference_time_us
                    .fetch_add(response.inference_time_us, Ordering::Relaxed);
                Ok(response)
            }
            Ok(Err(e)) => {
                self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                self.stats.timeout_requests.fetch_add(1, Ordering::Relaxed);
                Err(ServioError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Executes a request against its loaded model.
    async fn execute(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let models = self.models.read().await;
        let loaded = models
            .get(&model_key(&request.model, request.version))
            .ok_or_else(|| ServioError::ModelNotLoaded {
                model: request.model.clone(),
                version: request.version,
            })?;

        let method = loaded
            .model
            .method(&request.method)
            .ok_or_else(|| ServioError::MethodNotFound {
                model: request.model.clone(),
                method: request.method.clone(),
            })?
            .clone();

        let inputs = normalize_batch_dims(request.inputs.clone(), &method);
        validate_inputs(&inputs, &method)?;

        let inputs = pipeline::apply_preprocess(inputs, &method.preprocess)?;

        let inference_start = std::time::Instant::now();
        let raw_outputs = loaded.backend.execute(&method, &inputs)?;
        let inference_time_us = inference_start.elapsed().as_micros() as u64;

        let mut outputs =
            pipeline::apply_postprocess(raw_outputs, &method.postprocess, loaded.labels.as_deref())?;

        if let Some(ref names) = request.parameters.output_names {
            outputs.retain(|name, _| names.iter().any(|n| n == name));
        }

        loaded.inference_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            model = %request.model,
            version = request.version,
            method = %request.method,
            inference_time_us,
            "Inference complete"
        );

        Ok(InferenceResponse {
            request_id: request.id.clone(),
            model: request.model.clone(),
            version: request.version,
            method: request.method.clone(),
            outputs,
            inference_time_us,
            total_time_us: 0, // set by the caller once the permit is released
        })
    }

    /// Gets a statistics snapshot.
    pub fn stats(&self) -> InferenceStatsSnapshot {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        let successful = self.stats.successful_requests.load(Ordering::Relaxed);
        let total_time = self.stats.total_inference_time_us.load(Ordering::Relaxed);

        InferenceStatsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            timeout_requests: self.stats.timeout_requests.load(Ordering::Relaxed),
            avg_inference_time_us: if successful > 0 { total_time / successful } else { 0 },
        }
    }

    /// Lists loaded models.
    pub async fn list_loaded(&self) -> Vec<LoadedModelInfo> {
        let models = self.models.read().await;
        let mut infos: Vec<LoadedModelInfo> = models
            .iter()
            .map(|(key, loaded)| LoadedModelInfo {
                key: key.clone(),
                name: loaded.model.metadata.name.clone(),
                version: loaded.version,
                format: loaded.model.format(),
                device: loaded.backend.device().map(|d| d.to_string()),
                fingerprint: loaded.artifact.fingerprint.clone(),
                loaded_at: loaded.loaded_at,
                inference_count: loaded.inference_count.load(Ordering::Relaxed),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}

/// Insert a leading batch dimension of 1 where an instance tensor arrives
/// without one and the method declares a dynamic batch dimension.
fn normalize_batch_dims(
    mut inputs: HashMap<String, TensorData>,
    method: &crate::servable::manifest::MethodSpec,
) -> HashMap<String, TensorData> {
    for spec in &method.inputs {
        if let Some(tensor) = inputs.get_mut(&spec.name) {
            if spec.shape.first() == Some(&-1) && tensor.shape.len() + 1 == spec.shape.len() {
                tensor.shape.insert(0, 1);
            }
        }
    }
    inputs
}

/// Validate request inputs against the method signature.
fn validate_inputs(
    inputs: &HashMap<String, TensorData>,
    method: &crate::servable::manifest::MethodSpec,
) -> Result<()> {
    for input_spec in &method.inputs {
        let tensor = inputs
            .get(&input_spec.name)
            .ok_or_else(|| ServioError::MissingInput(input_spec.name.clone()))?;

        if tensor.dtype != input_spec.dtype {
            return Err(ServioError::DtypeMismatch {
                input: input_spec.name.clone(),
                expected: input_spec.dtype.to_string(),
                actual: tensor.dtype.to_string(),
            });
        }

        if tensor.shape.len() != input_spec.shape.len() {
            return Err(ServioError::RankMismatch {
                input: input_spec.name.clone(),
                expected: input_spec.shape.len(),
                actual: tensor.shape.len(),
            });
        }

        for (i, (&expected, &actual)) in input_spec
            .shape
            .iter()
            .zip(tensor.shape.iter())
            .enumerate()
        {
            if expected != -1 && expected != actual {
                return Err(ServioError::DimensionMismatch {
                    input: input_spec.name.clone(),
                    dim: i,
                    expected,
                    actual,
                });
            }
        }
    }

    Ok(())
}

/// Statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub avg_inference_time_us: u64,
}

/// Loaded model info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedModelInfo {
    pub key: String,
    pub name: String,
    pub version: u32,
    pub format: ModelFormat,
    pub device: Option<String>,
    pub fingerprint: String,
    pub loaded_at: u64,
    pub inference_count: u64,
}
