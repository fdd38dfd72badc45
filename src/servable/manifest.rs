// Servable manifest loading and on-disk discovery

use super::model::{ModelFormat, PostprocessStep, PreprocessStep, TensorSpec};
use crate::error::{Result, ServioError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the servable declaration expected next to version directories.
pub const MANIFEST_FILE: &str = "servable.json";

/// Declaration of a servable: the model artifact and its callable methods.
///
/// Lives as `servable.json` in the model directory:
///
/// ```text
/// <model_root>/
///   resnet50/
///     servable.json
///     1/resnet50.mindir
///     2/resnet50.mindir
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServableManifest {
    /// Artifact file name inside each version directory.
    pub model_file: String,
    /// Artifact format.
    pub format: ModelFormat,
    /// Optional labels file (one label per line) next to the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_file: Option<String>,
    /// Callable methods exposed by the servable.
    pub methods: Vec<MethodSpec>,
}

impl ServableManifest {
    /// Load and validate a manifest from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServioError::InvalidManifest(format!("{}: {}", path.display(), e))
        })?;

        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            ServioError::InvalidManifest(format!("{}: {}", path.display(), e))
        })?;

        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate manifest invariants.
    pub fn validate(&self) -> Result<()> {
        if self.model_file.is_empty() {
            return Err(ServioError::InvalidManifest(
                "model_file must be set".to_string(),
            ));
        }
        if self.methods.is_empty() {
            return Err(ServioError::InvalidManifest(
                "at least one method must be declared".to_string(),
            ));
        }

        for method in &self.methods {
            if method.name.is_empty() {
                return Err(ServioError::InvalidManifest(
                    "method name must be set".to_string(),
                ));
            }
            if method.inputs.is_empty() {
                return Err(ServioError::InvalidManifest(format!(
                    "method {} declares no inputs",
                    method.name
                )));
            }
            if method.outputs.is_empty() {
                return Err(ServioError::InvalidManifest(format!(
                    "method {} declares no outputs",
                    method.name
                )));
            }
            let decodes_labels = method
                .postprocess
                .iter()
                .any(|s| matches!(s, PostprocessStep::DecodeLabels));
            if decodes_labels && self.labels_file.is_none() {
                return Err(ServioError::InvalidManifest(format!(
                    "method {} decodes labels but no labels_file is declared",
                    method.name
                )));
            }
        }

        let mut names: Vec<&str> = self.methods.iter().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.methods.len() {
            return Err(ServioError::InvalidManifest(
                "duplicate method names".to_string(),
            ));
        }

        Ok(())
    }

    /// Looks up a declared method.
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A callable method with named inputs/outputs and processing pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Method name.
    pub name: String,
    /// Input tensor signatures.
    pub inputs: Vec<TensorSpec>,
    /// Output tensor signatures.
    pub outputs: Vec<TensorSpec>,
    /// Preprocessing pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocess: Vec<PreprocessStep>,
    /// Postprocessing pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocess: Vec<PostprocessStep>,
}

impl MethodSpec {
    /// Creates an empty method spec.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            preprocess: Vec::new(),
            postprocess: Vec::new(),
        }
    }

    /// Adds an input signature.
    pub fn input(mut self, spec: TensorSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Adds an output signature.
    pub fn output(mut self, spec: TensorSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Adds a preprocessing step.
    pub fn preprocess(mut self, step: PreprocessStep) -> Self {
        self.preprocess.push(step);
        self
    }

    /// Adds a postprocessing step.
    pub fn postprocess(mut self, step: PostprocessStep) -> Self {
        self.postprocess.push(step);
        self
    }
}

/// A servable found on disk: its manifest plus the versions present.
#[derive(Debug, Clone)]
pub struct DiscoveredServable {
    /// Model name (directory name under the root).
    pub name: String,
    /// Parsed manifest.
    pub manifest: ServableManifest,
    /// Model directory.
    pub model_dir: PathBuf,
    /// Version number → artifact path, ascending by version.
    pub versions: Vec<(u32, PathBuf)>,
}

/// Scan a model root directory for servables.
///
/// Each subdirectory with a readable manifest becomes one servable; its
/// numeric subdirectories become versions. Entries that do not follow the
/// convention are skipped with a log line rather than failing the scan.
pub fn discover_servables(root: &Path) -> Result<Vec<DiscoveredServable>> {
    let mut found = Vec::new();

    let entries = std::fs::read_dir(root).map_err(|e| {
        ServioError::Config(format!("Failed to read model root {}: {}", root.display(), e))
    })?;

    for entry in entries {
        let entry = entry?;
        let model_dir = entry.path();
        if !model_dir.is_dir() {
            continue;
        }
        let name = match model_dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };

        let manifest_path = model_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            debug!(model = %name, "Skipping directory without manifest");
            continue;
        }

        let manifest = match ServableManifest::from_file(&manifest_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(model = %name, error = %e, "Skipping servable with invalid manifest");
                continue;
            }
        };

        let mut versions = scan_versions(&model_dir, &manifest.model_file)?;
        if versions.is_empty() {
            warn!(model = %name, "Skipping servable with no version directories");
            continue;
        }
        versions.sort_by_key(|(v, _)| *v);

        found.push(DiscoveredServable {
            name,
            manifest,
            model_dir,
            versions,
        });
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

/// Enumerate `<version>/<model_file>` artifacts under a model directory.
fn scan_versions(model_dir: &Path, model_file: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut versions = Vec::new();

    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        let version_dir = entry.path();
        if !version_dir.is_dir() {
            continue;
        }

        let version = match version_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok())
        {
            Some(v) => v,
            None => {
                debug!(dir = %version_dir.display(), "Skipping non-numeric version directory");
                continue;
            }
        };

        let artifact = version_dir.join(model_file);
        if !artifact.is_file() {
            warn!(
                dir = %version_dir.display(),
                artifact = %model_file,
                "Skipping version directory without artifact"
            );
            continue;
        }

        versions.push((version, artifact));
    }

    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::super::model::DataType;
    use super::*;

    fn classify_method() -> MethodSpec {
        MethodSpec::new("classify")
            .input(TensorSpec::new("x", DataType::Float32, vec![-1, 4]))
            .output(TensorSpec::new("y", DataType::Float32, vec![-1, 2]))
    }

    fn manifest() -> ServableManifest {
        ServableManifest {
            model_file: "model.mindir".to_string(),
            format: ModelFormat::MindIr,
            labels_file: None,
            methods: vec![classify_method()],
        }
    }

    #[test]
    fn test_manifest_validate_ok() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn test_manifest_rejects_missing_model_file() {
        let mut m = manifest();
        m.model_file.clear();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_manifest_rejects_no_methods() {
        let mut m = manifest();
        m.methods.clear();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_manifest_rejects_duplicate_methods() {
        let mut m = manifest();
        m.methods.push(classify_method());
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_manifest_rejects_label_decode_without_labels() {
        let mut m = manifest();
        m.methods[0].postprocess.push(PostprocessStep::DecodeLabels);
        assert!(m.validate().is_err());

        m.labels_file = Some("labels.txt".to_string());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let m = manifest();
        let json = serde_json::to_string(&m).unwrap();
        let parsed: ServableManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, parsed);
    }

    #[test]
    fn test_discovery_layout() {
        let root = tempfile::tempdir().unwrap();
        let model_dir = root.path().join("lenet");
        std::fs::create_dir_all(model_dir.join("1")).unwrap();
        std::fs::create_dir_all(model_dir.join("2")).unwrap();
        std::fs::create_dir_all(model_dir.join("not-a-version")).unwrap();

        std::fs::write(
            model_dir.join(MANIFEST_FILE),
            serde_json::to_string(&manifest()).unwrap(),
        )
        .unwrap();
        std::fs::write(model_dir.join("1").join("model.mindir"), b"v1").unwrap();
        std::fs::write(model_dir.join("2").join("model.mindir"), b"v2").unwrap();

        let found = discover_servables(root.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "lenet");
        assert_eq!(
            found[0].versions.iter().map(|(v, _)| *v).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_discovery_skips_broken_entries() {
        let root = tempfile::tempdir().unwrap();

        // No manifest at all
        std::fs::create_dir_all(root.path().join("orphan").join("1")).unwrap();

        // Manifest but no artifact in the version dir
        let empty = root.path().join("empty");
        std::fs::create_dir_all(empty.join("1")).unwrap();
        std::fs::write(
            empty.join(MANIFEST_FILE),
            serde_json::to_string(&manifest()).unwrap(),
        )
        .unwrap();

        let found = discover_servables(root.path()).unwrap();
        assert!(found.is_empty());
    }
}
