// Servable model definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// MindIR graph export
    MindIr,
    /// ONNX graph
    Onnx,
    /// TensorFlow SavedModel
    TensorFlow,
    /// PyTorch TorchScript
    PyTorch,
    /// Custom/other
    Custom,
}

impl ModelFormat {
    /// Conventional file extension for the format, if it has one.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ModelFormat::MindIr => Some("mindir"),
            ModelFormat::Onnx => Some("onnx"),
            ModelFormat::PyTorch => Some("pt"),
            ModelFormat::TensorFlow | ModelFormat::Custom => None,
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelFormat::MindIr => "mindir",
            ModelFormat::Onnx => "onnx",
            ModelFormat::TensorFlow => "tensorflow",
            ModelFormat::PyTorch => "pytorch",
            ModelFormat::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Tensor signature declared by a method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Tensor name
    pub name: String,
    /// Data type
    pub dtype: DataType,
    /// Shape (-1 for dynamic dimensions)
    pub shape: Vec<i64>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TensorSpec {
    /// Creates a new tensor spec
    pub fn new(name: &str, dtype: DataType, shape: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            shape,
            description: None,
        }
    }
}

/// Data type for tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float16,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    String,
}

impl DataType {
    /// Gets element size in bytes (0 for variable-width types).
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Float16 | DataType::Int16 | DataType::Uint16 => 2,
            DataType::Float32 | DataType::Int32 | DataType::Uint32 => 4,
            DataType::Float64 | DataType::Int64 | DataType::Uint64 => 8,
            DataType::String => 0,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Bool => "bool",
            DataType::String => "string",
        };
        f.write_str(s)
    }
}

/// Preprocessing step applied to method inputs before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreprocessStep {
    /// Per-channel normalization
    Normalize { mean: Vec<f32>, std: Vec<f32> },
    /// Pad the trailing dimension to a fixed length
    Pad { length: usize, value: f32 },
    /// Custom preprocessing
    Custom {
        name: String,
        params: HashMap<String, serde_json::Value>,
    },
}

/// Postprocessing step applied to method outputs after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostprocessStep {
    /// Softmax activation
    Softmax { axis: i32 },
    /// Argmax along an axis
    Argmax { axis: i32 },
    /// Top-K selection on the trailing axis
    TopK { k: usize },
    /// Binarize against a threshold
    Threshold { value: f32 },
    /// Map index tensors to labels from the servable's labels file
    DecodeLabels,
    /// Custom postprocessing
    Custom {
        name: String,
        params: HashMap<String, serde_json::Value>,
    },
}

/// Model metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model ID
    pub id: String,
    /// Model name
    pub name: String,
    /// Description
    pub description: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Artifact fingerprint (sha256 of the model file)
    pub fingerprint: Option<String>,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (epoch millis)
    pub created_at: u64,
    /// Updated timestamp (epoch millis)
    pub updated_at: u64,
}

impl ModelMetadata {
    /// Creates new metadata
    pub fn new(id: &str, name: &str) -> Self {
        let now = epoch_millis();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            tags: Vec::new(),
            fingerprint: None,
            size_bytes: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A servable model: manifest-declared configuration plus metadata and the
/// resolved artifact location.
#[derive(Debug, Clone)]
pub struct Model {
    /// Manifest the model was declared by
    pub manifest: super::manifest::ServableManifest,
    /// Metadata
    pub metadata: ModelMetadata,
    /// Resolved artifact path
    pub artifact_path: Option<std::path::PathBuf>,
}

impl Model {
    /// Creates a new model
    pub fn new(manifest: super::manifest::ServableManifest, metadata: ModelMetadata) -> Self {
        Self {
            manifest,
            metadata,
            artifact_path: None,
        }
    }

    /// Creates from a resolved artifact path
    pub fn with_artifact(
        manifest: super::manifest::ServableManifest,
        metadata: ModelMetadata,
        artifact_path: std::path::PathBuf,
    ) -> Self {
        Self {
            manifest,
            metadata,
            artifact_path: Some(artifact_path),
        }
    }

    /// Gets model name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Gets model format
    pub fn format(&self) -> ModelFormat {
        self.manifest.format
    }

    /// Looks up a declared method
    pub fn method(&self, name: &str) -> Option<&super::manifest::MethodSpec> {
        self.manifest.methods.iter().find(|m| m.name == name)
    }

    /// Gets declared method names
    pub fn method_names(&self) -> Vec<&str> {
        self.manifest.methods.iter().map(|m| m.name.as_str()).collect()
    }
}

/// Builder for servable models, used by tests and programmatic registration.
pub struct ModelBuilder {
    manifest: super::manifest::ServableManifest,
    metadata: ModelMetadata,
}

impl ModelBuilder {
    /// Creates a new builder
    pub fn new(name: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            manifest: super::manifest::ServableManifest {
                model_file: String::new(),
                format: ModelFormat::MindIr,
                labels_file: None,
                methods: Vec::new(),
            },
            metadata: ModelMetadata::new(&id, name),
        }
    }

    /// Sets format
    pub fn format(mut self, format: ModelFormat) -> Self {
        self.manifest.format = format;
        self
    }

    /// Sets the artifact file name
    pub fn model_file(mut self, file: &str) -> Self {
        self.manifest.model_file = file.to_string();
        self
    }

    /// Sets the labels file name
    pub fn labels_file(mut self, file: &str) -> Self {
        self.manifest.labels_file = Some(file.to_string());
        self
    }

    /// Adds a method
    pub fn method(mut self, method: super::manifest::MethodSpec) -> Self {
        self.manifest.methods.push(method);
        self
    }

    /// Sets description
    pub fn description(mut self, desc: &str) -> Self {
        self.metadata.description = Some(desc.to_string());
        self
    }

    /// Adds tag
    pub fn tag(mut self, tag: &str) -> Self {
        self.metadata.tags.push(tag.to_string());
        self
    }

    /// Builds the model
    pub fn build(self) -> Model {
        Model::new(self.manifest, self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::super::manifest::MethodSpec;
    use super::*;

    #[test]
    fn test_model_builder() {
        let model = ModelBuilder::new("resnet50")
            .format(ModelFormat::MindIr)
            .model_file("resnet50.mindir")
            .method(
                MethodSpec::new("classify")
                    .input(TensorSpec::new("image", DataType::Float32, vec![-1, 3, 224, 224]))
                    .output(TensorSpec::new("score", DataType::Float32, vec![-1, 1000]))
                    .postprocess(PostprocessStep::Softmax { axis: 1 }),
            )
            .description("ResNet-50 image classifier")
            .tag("vision")
            .build();

        assert_eq!(model.name(), "resnet50");
        assert_eq!(model.format(), ModelFormat::MindIr);
        assert!(model.method("classify").is_some());
        assert!(model.method("segment").is_none());
    }

    #[test]
    fn test_tensor_spec() {
        let spec = TensorSpec::new("image", DataType::Float32, vec![-1, 3, 224, 224]);
        assert_eq!(spec.name, "image");
        assert_eq!(spec.dtype, DataType::Float32);
        assert_eq!(spec.shape.len(), 4);
    }

    #[test]
    fn test_data_type_size() {
        assert_eq!(DataType::Float32.size_bytes(), 4);
        assert_eq!(DataType::Float64.size_bytes(), 8);
        assert_eq!(DataType::Int8.size_bytes(), 1);
        assert_eq!(DataType::String.size_bytes(), 0);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(ModelFormat::MindIr.to_string(), "mindir");
        assert_eq!(ModelFormat::MindIr.extension(), Some("mindir"));
    }
}
