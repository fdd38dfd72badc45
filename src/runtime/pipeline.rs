// Pre/postprocessing pipelines for method execution

use super::tensor::TensorData;
use crate::error::{Result, ServioError};
use crate::servable::model::{DataType, PostprocessStep, PreprocessStep};
use std::collections::HashMap;
use tracing::debug;

/// Apply a method's preprocessing pipeline to its input tensors.
pub fn apply_preprocess(
    inputs: HashMap<String, TensorData>,
    steps: &[PreprocessStep],
) -> Result<HashMap<String, TensorData>> {
    let mut result = inputs;
    for step in steps {
        result = apply_preprocess_step(result, step)?;
    }
    Ok(result)
}

fn apply_preprocess_step(
    inputs: HashMap<String, TensorData>,
    step: &PreprocessStep,
) -> Result<HashMap<String, TensorData>> {
    match step {
        PreprocessStep::Normalize { mean, std } => {
            if mean.is_empty() || mean.len() != std.len() {
                return Err(ServioError::InvalidManifest(
                    "normalize step needs matching mean/std channels".to_string(),
                ));
            }
            let mut result = HashMap::new();
            for (name, tensor) in inputs {
                if let Some(data) = tensor.as_f32() {
                    let normalized: Vec<f32> = data
                        .iter()
                        .enumerate()
                        .map(|(i, &v)| {
                            let c = i % mean.len();
                            (v - mean[c]) / std[c]
                        })
                        .collect();
                    result.insert(name, TensorData::from_f32(&normalized, tensor.shape.clone()));
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PreprocessStep::Pad { length, value } => {
            let mut result = HashMap::new();
            for (name, tensor) in inputs {
                if let Some(data) = tensor.as_f32() {
                    result.insert(name, pad_trailing(&data, &tensor.shape, *length, *value));
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PreprocessStep::Custom { name, .. } => {
            debug!(step = %name, "Skipping custom preprocessing step");
            Ok(inputs)
        }
    }
}

/// Pad (or truncate) the trailing dimension of an f32 tensor to `length`.
fn pad_trailing(data: &[f32], shape: &[i64], length: usize, value: f32) -> TensorData {
    let trailing = shape.last().copied().unwrap_or(data.len() as i64).max(1) as usize;
    let rows = data.len() / trailing.max(1);

    let mut out = Vec::with_capacity(rows * length);
    for row in 0..rows {
        let start = row * trailing;
        let slice = &data[start..start + trailing];
        if trailing >= length {
            out.extend_from_slice(&slice[..length]);
        } else {
            out.extend_from_slice(slice);
            out.extend(std::iter::repeat(value).take(length - trailing));
        }
    }

    let mut new_shape: Vec<i64> = shape.to_vec();
    if let Some(last) = new_shape.last_mut() {
        *last = length as i64;
    } else {
        new_shape.push(length as i64);
    }
    TensorData::from_f32(&out, new_shape)
}

/// Apply a method's postprocessing pipeline to its output tensors.
///
/// `labels` backs the `decode_labels` step and comes from the servable's
/// labels file, loaded with the model.
pub fn apply_postprocess(
    outputs: HashMap<String, TensorData>,
    steps: &[PostprocessStep],
    labels: Option<&[String]>,
) -> Result<HashMap<String, TensorData>> {
    let mut result = outputs;
    for step in steps {
        result = apply_postprocess_step(result, step, labels)?;
    }
    Ok(result)
}

fn apply_postprocess_step(
    outputs: HashMap<String, TensorData>,
    step: &PostprocessStep,
    labels: Option<&[String]>,
) -> Result<HashMap<String, TensorData>> {
    match step {
        PostprocessStep::Softmax { axis } => {
            let mut result = HashMap::new();
            for (name, tensor) in outputs {
                if let Some(data) = tensor.as_f32() {
                    let softmax = compute_softmax(&data, &tensor.shape, *axis);
                    result.insert(name, TensorData::from_f32(&softmax, tensor.shape.clone()));
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PostprocessStep::Argmax { axis } => {
            let mut result = HashMap::new();
            for (name, tensor) in outputs {
                if let Some(data) = tensor.as_f32() {
                    result.insert(name, compute_argmax(&data, &tensor.shape, *axis)?);
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PostprocessStep::TopK { k } => {
            if *k == 0 {
                return Err(ServioError::InvalidManifest(
                    "top_k step needs k > 0".to_string(),
                ));
            }
            let mut result = HashMap::new();
            for (name, tensor) in outputs {
                if let Some(data) = tensor.as_f32() {
                    let (values, indices) = compute_topk(&data, &tensor.shape, *k);
                    result.insert(format!("{}_indices", name), indices);
                    result.insert(name, values);
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PostprocessStep::Threshold { value } => {
            let mut result = HashMap::new();
            for (name, tensor) in outputs {
                if let Some(data) = tensor.as_f32() {
                    let binary: Vec<f32> = data
                        .iter()
                        .map(|&v| if v >= *value { 1.0 } else { 0.0 })
                        .collect();
                    result.insert(name, TensorData::from_f32(&binary, tensor.shape.clone()));
                } else {
                    result.insert(name, tensor);
                }
            }
            Ok(result)
        }
        PostprocessStep::DecodeLabels => {
            let labels = labels.ok_or_else(|| {
                ServioError::InvalidState("no labels loaded for decode_labels".to_string())
            })?;
            let mut result = HashMap::new();
            for (name, tensor) in outputs {
                result.insert(name, decode_labels(&tensor, labels)?);
            }
            Ok(result)
        }
        PostprocessStep::Custom { name, .. } => {
            debug!(step = %name, "Skipping custom postprocessing step");
            Ok(outputs)
        }
    }
}

/// Numerically-stable softmax along an axis.
fn compute_softmax(data: &[f32], shape: &[i64], axis: i32) -> Vec<f32> {
    let axis_idx = if axis < 0 {
        (shape.len() as i32 + axis) as usize
    } else {
        axis as usize
    };

    if axis_idx >= shape.len() {
        return data.to_vec();
    }

    let axis_size = shape[axis_idx] as usize;
    let outer_size: usize = shape[..axis_idx].iter().map(|&d| d as usize).product();
    let inner_size: usize = shape[axis_idx + 1..].iter().map(|&d| d as usize).product();

    let mut result = vec![0.0f32; data.len()];

    for outer in 0..outer_size.max(1) {
        for inner in 0..inner_size.max(1) {
            // Max first for numerical stability
            let mut max_val = f32::NEG_INFINITY;
            for ax in 0..axis_size {
                let idx = outer * axis_size * inner_size.max(1) + ax * inner_size.max(1) + inner;
                if idx < data.len() {
                    max_val = max_val.max(data[idx]);
                }
            }

            let mut sum = 0.0f32;
            for ax in 0..axis_size {
                let idx = outer * axis_size * inner_size.max(1) + ax * inner_size.max(1) + inner;
                if idx < data.len() {
                    let exp_val = (data[idx] - max_val).exp();
                    result[idx] = exp_val;
                    sum += exp_val;
                }
            }

            for ax in 0..axis_size {
                let idx = outer * axis_size * inner_size.max(1) + ax * inner_size.max(1) + inner;
                if idx < result.len() {
                    result[idx] /= sum;
                }
            }
        }
    }

    result
}

/// Argmax along an axis, removing that axis from the shape.
fn compute_argmax(data: &[f32], shape: &[i64], axis: i32) -> Result<TensorData> {
    let axis_idx = if axis < 0 {
        (shape.len() as i32 + axis) as usize
    } else {
        axis as usize
    };

    if axis_idx >= shape.len() {
        return Err(ServioError::InvalidManifest(format!(
            "argmax axis {} out of range for rank {}",
            axis,
            shape.len()
        )));
    }

    let axis_size = shape[axis_idx] as usize;
    let outer_size: usize = shape[..axis_idx].iter().map(|&d| d as usize).product::<usize>().max(1);
    let inner_size: usize = shape[axis_idx + 1..].iter().map(|&d| d as usize).product::<usize>().max(1);

    let mut result = Vec::with_capacity(outer_size * inner_size);
    for outer in 0..outer_size {
        for inner in 0..inner_size {
            let mut best = 0i64;
            let mut best_val = f32::NEG_INFINITY;
            for ax in 0..axis_size {
                let idx = outer * axis_size * inner_size + ax * inner_size + inner;
                if idx < data.len() && data[idx] > best_val {
                    best_val = data[idx];
                    best = ax as i64;
                }
            }
            result.push(best);
        }
    }

    let mut new_shape: Vec<i64> = shape.to_vec();
    new_shape.remove(axis_idx);
    Ok(TensorData::from_i64(&result, new_shape))
}

/// Top-K values and indices along the trailing axis, descending by value.
fn compute_topk(data: &[f32], shape: &[i64], k: usize) -> (TensorData, TensorData) {
    let trailing = shape.last().copied().unwrap_or(data.len() as i64).max(1) as usize;
    let rows = data.len() / trailing.max(1);
    let k = k.min(trailing);

    let mut values = Vec::with_capacity(rows * k);
    let mut indices = Vec::with_capacity(rows * k);

    for row in 0..rows {
        let start = row * trailing;
        let slice = &data[start..start + trailing];
        let mut order: Vec<usize> = (0..trailing).collect();
        order.sort_by(|&a, &b| slice[b].partial_cmp(&slice[a]).unwrap_or(std::cmp::Ordering::Equal));
        for &idx in order.iter().take(k) {
            values.push(slice[idx]);
            indices.push(idx as i64);
        }
    }

    let mut new_shape: Vec<i64> = shape.to_vec();
    if let Some(last) = new_shape.last_mut() {
        *last = k as i64;
    } else {
        new_shape.push(k as i64);
    }

    (
        TensorData::from_f32(&values, new_shape.clone()),
        TensorData::from_i64(&indices, new_shape),
    )
}

/// Map an index tensor to a string tensor using the loaded labels.
fn decode_labels(tensor: &TensorData, labels: &[String]) -> Result<TensorData> {
    let indices: Vec<i64> = match tensor.dtype {
        DataType::Int64 => tensor.as_i64().unwrap_or_default(),
        DataType::Int32 => tensor
            .as_i32()
            .unwrap_or_default()
            .into_iter()
            .map(|v| v as i64)
            .collect(),
        other => {
            return Err(ServioError::InvalidState(format!(
                "decode_labels expects an index tensor, got {}",
                other
            )))
        }
    };

    let decoded: Result<Vec<String>> = indices
        .iter()
        .map(|&idx| {
            labels
                .get(idx.max(0) as usize)
                .cloned()
                .ok_or_else(|| {
                    ServioError::ExecutionFailed(format!(
                        "label index {} out of range ({} labels)",
                        idx,
                        labels.len()
                    ))
                })
        })
        .collect();

    Ok(TensorData::from_strings(&decoded?, tensor.shape.clone()))
}
