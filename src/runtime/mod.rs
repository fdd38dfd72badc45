//! Inference runtime for Servio
//!
//! Executes forward passes for loaded servables:
//! - Packed tensor data with a JSON instance wire format
//! - Format-specific execution backends
//! - Pre/postprocessing pipelines
//! - Bounded concurrency, timeouts, and dynamic batching

pub mod backend;
pub mod batch;
pub mod engine;
pub mod pipeline;
pub mod tensor;

pub use batch::{BatchQueue, Batcher};
pub use engine::{
    InferenceEngine, InferenceRequest, InferenceResponse, InferenceStatsSnapshot, LoadedModelInfo,
};
pub use tensor::TensorData;
