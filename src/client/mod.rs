//! Client library for communicating with a Servio gateway.

use crate::error::{Result, ServioError};
use crate::runtime::engine::InferenceParameters;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One instance: named input → array-like value.
pub type Instance = HashMap<String, Value>;

/// One prediction: named output → value.
pub type Prediction = HashMap<String, Value>;

/// Client for the Servio serving API.
#[derive(Clone)]
pub struct ServingClient {
    base_url: String,
    client: Client,
}

impl ServingClient {
    /// Create a new client with default timeouts.
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeouts(addr, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new client with custom timeouts.
    pub fn with_timeouts(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: format!("http://{}", addr),
            client,
        }
    }

    /// Create from an address string like `127.0.0.1:5500`.
    pub fn from_addr(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ServioError::InvalidArgument(format!("Invalid address: {}", e)))?;
        Ok(Self::new(addr))
    }

    /// Check server health.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServioError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    /// List registered models.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServioError::Network(e.to_string()))?;

        let result: ListModelsResponse = decode(response).await?;
        Ok(result.models)
    }

    /// Describe a model: format, methods, and versions.
    pub async fn describe_model(&self, model: &str) -> Result<ModelDetail> {
        let url = format!("{}/v1/models/{}", self.base_url, model);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServioError::Network(e.to_string()))?;

        decode(response).await
    }

    /// Run inference: serialize instances, post them, return predictions.
    pub async fn infer(
        &self,
        model: &str,
        method: &str,
        instances: &[Instance],
    ) -> Result<Vec<Prediction>> {
        let result = self
            .infer_request(model, method, instances, None, InferenceParameters::default())
            .await?;
        Ok(result.predictions)
    }

    /// Run inference with full control over version pinning and parameters.
    pub async fn infer_request(
        &self,
        model: &str,
        method: &str,
        instances: &[Instance],
        version: Option<u32>,
        parameters: InferenceParameters,
    ) -> Result<InferResult> {
        let url = format!(
            "{}/v1/models/{}/methods/{}/infer",
            self.base_url, model, method
        );
        let request = InferWireRequest {
            instances: instances.to_vec(),
            version,
            parameters,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServioError::Network(e.to_string()))?;

        decode(response).await
    }

    /// Fetch server statistics as raw JSON.
    pub async fn stats(&self) -> Result<Value> {
        let url = format!("{}/stats", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServioError::Network(e.to_string()))?;

        decode(response).await
    }
}

/// Decode a response, mapping error statuses back to [`ServioError`].
async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ServioError::Deserialization(e.to_string()));
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {}", status),
    };

    Err(match status.as_u16() {
        404 => ServioError::NotFound(message),
        400 => ServioError::InvalidArgument(message),
        422 => ServioError::InvalidOperation(message),
        429 => ServioError::RateLimited(message),
        503 => ServioError::Unavailable(message),
        504 => ServioError::Timeout(0),
        _ => ServioError::Internal(message),
    })
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct InferWireRequest {
    instances: Vec<Instance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    parameters: InferenceParameters,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    models: Vec<ModelInfo>,
}

/// Model listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub latest_version: Option<u32>,
    pub deployed_version: Option<u32>,
    pub methods: Vec<String>,
}

/// Model description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetail {
    pub name: String,
    pub format: crate::servable::model::ModelFormat,
    pub methods: Vec<crate::servable::manifest::MethodSpec>,
    pub versions: Vec<VersionInfo>,
}

/// Version entry in a model description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u32,
    pub status: crate::servable::registry::ServableStatus,
    pub size_bytes: u64,
    pub created_at: u64,
    pub deployed_at: Option<u64>,
}

/// Full inference result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferResult {
    pub model: String,
    pub version: u32,
    pub method: String,
    pub predictions: Vec<Prediction>,
    pub inference_time_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let addr: SocketAddr = "127.0.0.1:5500".parse().unwrap();
        let _client = ServingClient::new(addr);
    }

    #[test]
    fn test_client_from_addr() {
        assert!(ServingClient::from_addr("127.0.0.1:5500").is_ok());
        assert!(ServingClient::from_addr("not-a-valid-address").is_err());
    }
}
