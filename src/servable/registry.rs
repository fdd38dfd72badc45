// Versioned servable registry

use super::manifest::{DiscoveredServable, ServableManifest, discover_servables};
use super::model::{epoch_millis, Model, ModelFormat, ModelMetadata};
use crate::config::RegistryConfig;
use crate::error::{Result, ServioError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A registered version of a servable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServableVersion {
    /// Version number
    pub version: u32,
    /// Manifest the version was declared by
    pub manifest: ServableManifest,
    /// Model metadata
    pub metadata: ModelMetadata,
    /// Artifact path on disk
    pub artifact_path: PathBuf,
    /// Status
    pub status: ServableStatus,
    /// Created timestamp
    pub created_at: u64,
    /// Deployed timestamp
    pub deployed_at: Option<u64>,
    /// Deprecated timestamp
    pub deprecated_at: Option<u64>,
}

/// Servable status in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServableStatus {
    /// Found on disk, not yet validated
    Discovered,
    /// Artifact being loaded into the runtime
    Loading,
    /// Ready for deployment
    Ready,
    /// Currently deployed
    Deployed,
    /// Deprecated
    Deprecated,
    /// Archived (beyond the version retention limit)
    Archived,
    /// Failed validation or loading
    Failed,
}

/// Servable registry.
pub struct ServableRegistry {
    /// Configuration
    config: RegistryConfig,
    /// Versions by model name
    models: Arc<RwLock<HashMap<String, Vec<ServableVersion>>>>,
    /// Latest version mapping
    latest: Arc<RwLock<HashMap<String, u32>>>,
    /// Deployed versions
    deployed: Arc<RwLock<HashMap<String, u32>>>,
    /// Statistics
    stats: Arc<RegistryStats>,
}

/// Registry statistics.
#[derive(Default)]
pub struct RegistryStats {
    /// Total models registered
    pub models_registered: AtomicU64,
    /// Total versions
    pub total_versions: AtomicU64,
    /// Models deployed
    pub models_deployed: AtomicU64,
    /// Total artifact bytes tracked
    pub artifact_bytes: AtomicU64,
}

impl ServableRegistry {
    /// Creates a new registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            models: Arc::new(RwLock::new(HashMap::new())),
            latest: Arc::new(RwLock::new(HashMap::new())),
            deployed: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RegistryStats::default()),
        }
    }

    /// Scan the configured model root and register everything found.
    ///
    /// Returns the number of versions registered. Servables already known
    /// keep their lifecycle state; only new versions are added.
    pub async fn scan(&self) -> Result<usize> {
        let discovered = discover_servables(&self.config.model_root)?;
        let mut added = 0;

        for servable in discovered {
            added += self.register_discovered(servable).await?;
        }

        info!(versions = added, root = %self.config.model_root.display(), "Registry scan complete");
        Ok(added)
    }

    /// Register the versions of a discovered servable.
    pub async fn register_discovered(&self, servable: DiscoveredServable) -> Result<usize> {
        let mut added = 0;

        for (version, artifact_path) in &servable.versions {
            let size = std::fs::metadata(artifact_path).map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_artifact_size {
                return Err(ServioError::Artifact(format!(
                    "{} exceeds maximum artifact size: {} > {}",
                    artifact_path.display(),
                    size,
                    self.config.max_artifact_size
                )));
            }

            let mut metadata = ModelMetadata::new(
                &uuid::Uuid::new_v4().to_string(),
                &servable.name,
            );
            metadata.size_bytes = size;

            if self
                .insert_version(
                    &servable.name,
                    *version,
                    servable.manifest.clone(),
                    metadata,
                    artifact_path.clone(),
                )
                .await?
            {
                added += 1;
            }
        }

        Ok(added)
    }

    /// Registers a new version of a programmatically-built model, assigning
    /// the next version number.
    pub async fn register(&self, model: Model) -> Result<u32> {
        let name = model.metadata.name.clone();
        let size = model.metadata.size_bytes;

        if size > self.config.max_artifact_size {
            return Err(ServioError::Artifact(format!(
                "Model exceeds maximum artifact size: {} > {}",
                size, self.config.max_artifact_size
            )));
        }

        let next_version = {
            let models = self.models.read().await;
            models
                .get(&name)
                .and_then(|versions| versions.iter().map(|v| v.version).max())
                .unwrap_or(0)
                + 1
        };

        let artifact_path = model.artifact_path.clone().unwrap_or_else(|| {
            self.config
                .model_root
                .join(&name)
                .join(next_version.to_string())
                .join(&model.manifest.model_file)
        });

        self.insert_version(&name, next_version, model.manifest, model.metadata, artifact_path)
            .await?;

        Ok(next_version)
    }

    /// Insert a version if not already present. Returns whether it was added.
    async fn insert_version(
        &self,
        name: &str,
        version: u32,
        manifest: ServableManifest,
        metadata: ModelMetadata,
        artifact_path: PathBuf,
    ) -> Result<bool> {
        let size = metadata.size_bytes;
        let mut models = self.models.write().await;
        let versions = models.entry(name.to_string()).or_default();

        if versions.iter().any(|v| v.version == version) {
            return Ok(false);
        }

        let first_version = versions.is_empty();
        versions.push(ServableVersion {
            version,
            manifest,
            metadata,
            artifact_path,
            status: ServableStatus::Ready,
            created_at: epoch_millis(),
            deployed_at: None,
            deprecated_at: None,
        });
        versions.sort_by_key(|v| v.version);

        // Enforce the retention limit on active versions
        let active = versions
            .iter()
            .filter(|v| v.status != ServableStatus::Archived)
            .count();
        if active > self.config.max_versions {
            let to_archive = active - self.config.max_versions;
            let mut archived = 0;
            for v in versions.iter_mut() {
                if archived == to_archive {
                    break;
                }
                if v.status == ServableStatus::Ready {
                    v.status = ServableStatus::Archived;
                    archived += 1;
                }
            }
        }

        drop(models);

        {
            let mut latest = self.latest.write().await;
            let entry = latest.entry(name.to_string()).or_insert(version);
            if version > *entry {
                *entry = version;
            }
        }

        self.stats.total_versions.fetch_add(1, Ordering::Relaxed);
        if first_version {
            self.stats.models_registered.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.artifact_bytes.fetch_add(size, Ordering::Relaxed);

        Ok(true)
    }

    /// Gets a model version.
    pub async fn get(&self, name: &str, version: Option<u32>) -> Option<ServableVersion> {
        let models = self.models.read().await;
        let versions = models.get(name)?;

        let target = match version {
            Some(v) => v,
            None => {
                let latest = self.latest.read().await;
                *latest.get(name)?
            }
        };

        versions.iter().find(|v| v.version == target).cloned()
    }

    /// Gets the latest version.
    pub async fn get_latest(&self, name: &str) -> Option<ServableVersion> {
        self.get(name, None).await
    }

    /// Resolve the version an unpinned request should use: the deployed
    /// version if any, otherwise the latest ready one.
    pub async fn resolve(&self, name: &str, version: Option<u32>) -> Result<ServableVersion> {
        if let Some(v) = version {
            return self.get(name, Some(v)).await.ok_or_else(|| {
                ServioError::VersionNotFound {
                    model: name.to_string(),
                    version: v,
                }
            });
        }

        if let Some(v) = self.get_deployed(name).await {
            return Ok(v);
        }

        self.get_latest(name)
            .await
            .filter(|v| v.status == ServableStatus::Ready || v.status == ServableStatus::Deployed)
            .ok_or_else(|| ServioError::ModelNotFound(name.to_string()))
    }

    /// Lists all model names.
    pub async fn list_models(&self) -> Vec<String> {
        let models = self.models.read().await;
        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Lists versions for a model.
    pub async fn list_versions(&self, name: &str) -> Vec<ServableVersion> {
        let models = self.models.read().await;
        models.get(name).cloned().unwrap_or_default()
    }

    /// Deploys a model version.
    pub async fn deploy(&self, name: &str, version: u32) -> Result<()> {
        // Snapshot the current deployment before taking the models lock so
        // the lock order matches undeploy
        let current_deployed = {
            let deployed = self.deployed.read().await;
            deployed.get(name).copied()
        };

        let mut models = self.models.write().await;

        let versions = models
            .get_mut(name)
            .ok_or_else(|| ServioError::ModelNotFound(name.to_string()))?;

        let version_idx = versions
            .iter()
            .position(|v| v.version == version)
            .ok_or_else(|| ServioError::VersionNotFound {
                model: name.to_string(),
                version,
            })?;

        let status = versions[version_idx].status;
        if status != ServableStatus::Ready && status != ServableStatus::Deployed {
            return Err(ServioError::InvalidOperation(format!(
                "Cannot deploy version with status {:?}",
                status
            )));
        }

        // Undeploy the currently deployed version
        if let Some(current) = current_deployed {
            if let Some(current_version) = versions.iter_mut().find(|v| v.version == current) {
                current_version.status = ServableStatus::Ready;
                current_version.deployed_at = None;
            }
        }

        versions[version_idx].status = ServableStatus::Deployed;
        versions[version_idx].deployed_at = Some(epoch_millis());

        drop(models);

        {
            let mut deployed = self.deployed.write().await;
            deployed.insert(name.to_string(), version);
        }

        self.stats.models_deployed.fetch_add(1, Ordering::Relaxed);
        info!(model = %name, version, "Servable deployed");

        Ok(())
    }

    /// Undeploys a model. Returns whether anything was deployed.
    pub async fn undeploy(&self, name: &str) -> Result<bool> {
        let mut deployed = self.deployed.write().await;

        if let Some(version) = deployed.remove(name) {
            let mut models = self.models.write().await;
            if let Some(versions) = models.get_mut(name) {
                if let Some(v) = versions.iter_mut().find(|v| v.version == version) {
                    v.status = ServableStatus::Ready;
                    v.deployed_at = None;
                }
            }
            self.stats.models_deployed.fetch_sub(1, Ordering::Relaxed);
            info!(model = %name, version, "Servable undeployed");
            return Ok(true);
        }

        Ok(false)
    }

    /// Deprecates a model version.
    pub async fn deprecate(&self, name: &str, version: u32) -> Result<()> {
        let mut models = self.models.write().await;

        let versions = models
            .get_mut(name)
            .ok_or_else(|| ServioError::ModelNotFound(name.to_string()))?;

        let entry = versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| ServioError::VersionNotFound {
                model: name.to_string(),
                version,
            })?;

        entry.status = ServableStatus::Deprecated;
        entry.deprecated_at = Some(epoch_millis());

        Ok(())
    }

    /// Deletes a model version. Returns whether it existed.
    pub async fn delete(&self, name: &str, version: u32) -> Result<bool> {
        {
            let deployed = self.deployed.read().await;
            if deployed.get(name) == Some(&version) {
                return Err(ServioError::InvalidOperation(
                    "Cannot delete a deployed version".to_string(),
                ));
            }
        }

        let mut models = self.models.write().await;

        if let Some(versions) = models.get_mut(name) {
            if let Some(pos) = versions.iter().position(|v| v.version == version) {
                let removed = versions.remove(pos);
                self.stats
                    .artifact_bytes
                    .fetch_sub(removed.metadata.size_bytes, Ordering::Relaxed);
                self.stats.total_versions.fetch_sub(1, Ordering::Relaxed);

                if versions.is_empty() {
                    models.remove(name);
                    let mut latest = self.latest.write().await;
                    latest.remove(name);
                    self.stats.models_registered.fetch_sub(1, Ordering::Relaxed);
                } else {
                    let max_version = versions.iter().map(|v| v.version).max().unwrap_or(0);
                    let mut latest = self.latest.write().await;
                    latest.insert(name.to_string(), max_version);
                }

                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Gets the deployed version for a model.
    pub async fn get_deployed(&self, name: &str) -> Option<ServableVersion> {
        let version = {
            let deployed = self.deployed.read().await;
            deployed.get(name).copied()?
        };
        self.get(name, Some(version)).await
    }

    /// Lists all deployed models.
    pub async fn list_deployed(&self) -> Vec<(String, ServableVersion)> {
        let deployed: Vec<(String, u32)> = {
            let deployed = self.deployed.read().await;
            deployed.iter().map(|(n, v)| (n.clone(), *v)).collect()
        };

        let mut result = Vec::new();
        for (name, version) in deployed {
            if let Some(v) = self.get(&name, Some(version)).await {
                result.push((name, v));
            }
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Searches registered versions.
    pub async fn search(&self, query: &ServableSearchQuery) -> Vec<(String, ServableVersion)> {
        let models = self.models.read().await;
        let mut results = Vec::new();

        for (name, versions) in models.iter() {
            for version in versions {
                if query.matches(name, version) {
                    results.push((name.clone(), version.clone()));
                }
            }
        }

        results.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        results.truncate(query.limit.unwrap_or(100));
        results
    }

    /// Gets a statistics snapshot.
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            models_registered: self.stats.models_registered.load(Ordering::Relaxed),
            total_versions: self.stats.total_versions.load(Ordering::Relaxed),
            models_deployed: self.stats.models_deployed.load(Ordering::Relaxed),
            artifact_bytes: self.stats.artifact_bytes.load(Ordering::Relaxed),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

/// Search query over registered versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServableSearchQuery {
    /// Name substring filter
    pub name: Option<String>,
    /// Format filter
    pub format: Option<ModelFormat>,
    /// Tag filter (any match)
    pub tags: Option<Vec<String>>,
    /// Status filter
    pub status: Option<ServableStatus>,
    /// Result limit
    pub limit: Option<usize>,
}

impl ServableSearchQuery {
    fn matches(&self, name: &str, version: &ServableVersion) -> bool {
        if let Some(ref filter) = self.name {
            if !name.contains(filter.as_str()) {
                return false;
            }
        }
        if let Some(ref format) = self.format {
            if version.manifest.format != *format {
                return false;
            }
        }
        if let Some(ref tags) = self.tags {
            if !tags.iter().any(|t| version.metadata.tags.contains(t)) {
                return false;
            }
        }
        if let Some(ref status) = self.status {
            if version.status != *status {
                return false;
            }
        }
        true
    }
}

/// Statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatsSnapshot {
    pub models_registered: u64,
    pub total_versions: u64,
    pub models_deployed: u64,
    pub artifact_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::super::manifest::MethodSpec;
    use super::super::model::{DataType, ModelBuilder, TensorSpec};
    use super::*;

    fn test_model(name: &str) -> Model {
        ModelBuilder::new(name)
            .format(ModelFormat::MindIr)
            .model_file("model.mindir")
            .method(
                MethodSpec::new("predict")
                    .input(TensorSpec::new("x", DataType::Float32, vec![-1, 4]))
                    .output(TensorSpec::new("y", DataType::Float32, vec![-1, 2])),
            )
            .build()
    }

    #[tokio::test]
    async fn test_registry_register() {
        let registry = ServableRegistry::new(RegistryConfig::default());

        let version = registry.register(test_model("model1")).await.unwrap();
        assert_eq!(version, 1);

        let version = registry.register(test_model("model1")).await.unwrap();
        assert_eq!(version, 2);

        let models = registry.list_models().await;
        assert_eq!(models, vec!["model1".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_deploy_lifecycle() {
        let registry = ServableRegistry::new(RegistryConfig::default());

        registry.register(test_model("model1")).await.unwrap();
        registry.register(test_model("model1")).await.unwrap();

        registry.deploy("model1", 1).await.unwrap();
        let deployed = registry.get_deployed("model1").await.unwrap();
        assert_eq!(deployed.version, 1);
        assert_eq!(deployed.status, ServableStatus::Deployed);

        // Deploying v2 releases v1
        registry.deploy("model1", 2).await.unwrap();
        let v1 = registry.get("model1", Some(1)).await.unwrap();
        assert_eq!(v1.status, ServableStatus::Ready);
        let deployed = registry.get_deployed("model1").await.unwrap();
        assert_eq!(deployed.version, 2);

        assert!(registry.undeploy("model1").await.unwrap());
        assert!(registry.get_deployed("model1").await.is_none());
        assert!(!registry.undeploy("model1").await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_versioning() {
        let registry = ServableRegistry::new(RegistryConfig::default());

        for _ in 0..5 {
            registry.register(test_model("model1")).await.unwrap();
        }

        let versions = registry.list_versions("model1").await;
        assert_eq!(versions.len(), 5);

        let latest = registry.get_latest("model1").await.unwrap();
        assert_eq!(latest.version, 5);
    }

    #[tokio::test]
    async fn test_registry_archives_beyond_retention() {
        let config = RegistryConfig {
            max_versions: 2,
            ..RegistryConfig::default()
        };
        let registry = ServableRegistry::new(config);

        for _ in 0..4 {
            registry.register(test_model("model1")).await.unwrap();
        }

        let versions = registry.list_versions("model1").await;
        let archived = versions
            .iter()
            .filter(|v| v.status == ServableStatus::Archived)
            .count();
        assert_eq!(archived, 2);
    }

    #[tokio::test]
    async fn test_registry_delete_guards_deployed() {
        let registry = ServableRegistry::new(RegistryConfig::default());

        registry.register(test_model("model1")).await.unwrap();
        registry.deploy("model1", 1).await.unwrap();

        assert!(registry.delete("model1", 1).await.is_err());

        registry.undeploy("model1").await.unwrap();
        assert!(registry.delete("model1", 1).await.unwrap());
        assert!(registry.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_resolve_prefers_deployed() {
        let registry = ServableRegistry::new(RegistryConfig::default());

        registry.register(test_model("model1")).await.unwrap();
        registry.register(test_model("model1")).await.unwrap();

        // No deployment: latest wins
        let resolved = registry.resolve("model1", None).await.unwrap();
        assert_eq!(resolved.version, 2);

        registry.deploy("model1", 1).await.unwrap();
        let resolved = registry.resolve("model1", None).await.unwrap();
        assert_eq!(resolved.version, 1);

        // Pinned version wins over deployment
        let resolved = registry.resolve("model1", Some(2)).await.unwrap();
        assert_eq!(resolved.version, 2);

        assert!(registry.resolve("model1", Some(9)).await.is_err());
        assert!(registry.resolve("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_search() {
        let registry = ServableRegistry::new(RegistryConfig::default());
        registry.register(test_model("resnet50")).await.unwrap();
        registry.register(test_model("bert")).await.unwrap();

        let query = ServableSearchQuery {
            name: Some("resnet".to_string()),
            ..Default::default()
        };
        let results = registry.search(&query).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "resnet50");
    }
}
