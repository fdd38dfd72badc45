// Packed tensor data and the JSON instance wire format

use crate::error::{Result, ServioError};
use crate::servable::model::{DataType, TensorSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tensor data packed as little-endian bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Data type
    pub dtype: DataType,
    /// Shape
    pub shape: Vec<i64>,
    /// Raw data bytes
    pub data: Vec<u8>,
}

impl TensorData {
    /// Creates from an f32 slice
    pub fn from_f32(data: &[f32], shape: Vec<i64>) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::Float32,
            shape,
            data: bytes,
        }
    }

    /// Creates from an f64 slice
    pub fn from_f64(data: &[f64], shape: Vec<i64>) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::Float64,
            shape,
            data: bytes,
        }
    }

    /// Creates from an i32 slice
    pub fn from_i32(data: &[i32], shape: Vec<i64>) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::Int32,
            shape,
            data: bytes,
        }
    }

    /// Creates from an i64 slice
    pub fn from_i64(data: &[i64], shape: Vec<i64>) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DataType::Int64,
            shape,
            data: bytes,
        }
    }

    /// Creates from booleans
    pub fn from_bool(data: &[bool], shape: Vec<i64>) -> Self {
        Self {
            dtype: DataType::Bool,
            shape,
            data: data.iter().map(|&b| b as u8).collect(),
        }
    }

    /// Creates a string tensor. Strings are stored JSON-encoded since they
    /// are variable-width.
    pub fn from_strings(data: &[String], shape: Vec<i64>) -> Self {
        let encoded = serde_json::to_vec(data).unwrap_or_default();
        Self {
            dtype: DataType::String,
            shape,
            data: encoded,
        }
    }

    /// Gets as f32 values
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.dtype != DataType::Float32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Gets as f64 values
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        if self.dtype != DataType::Float64 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )
    }

    /// Gets as i32 values
    pub fn as_i32(&self) -> Option<Vec<i32>> {
        if self.dtype != DataType::Int32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Gets as i64 values
    pub fn as_i64(&self) -> Option<Vec<i64>> {
        if self.dtype != DataType::Int64 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )
    }

    /// Gets as booleans
    pub fn as_bool(&self) -> Option<Vec<bool>> {
        if self.dtype != DataType::Bool {
            return None;
        }
        Some(self.data.iter().map(|&b| b != 0).collect())
    }

    /// Gets as strings
    pub fn as_strings(&self) -> Option<Vec<String>> {
        if self.dtype != DataType::String {
            return None;
        }
        serde_json::from_slice(&self.data).ok()
    }

    /// Gets element count implied by the shape
    pub fn element_count(&self) -> usize {
        self.shape.iter().map(|&d| d.max(1) as usize).product()
    }

    /// Decode an array-like JSON value into a tensor of the spec's dtype.
    ///
    /// The shape is inferred from the nesting; rectangularity is enforced.
    /// Scalars decode to rank-0 tensors.
    pub fn from_json(value: &Value, spec: &TensorSpec) -> Result<Self> {
        let mut shape = Vec::new();
        infer_shape(value, spec, &mut shape)?;
        let expected: usize = shape.iter().map(|&d| d.max(0) as usize).product();

        let check_len = |len: usize| -> Result<()> {
            if len != expected {
                return Err(ServioError::InvalidArgument(format!(
                    "Input {} is not rectangular",
                    spec.name
                )));
            }
            Ok(())
        };

        match spec.dtype {
            DataType::String => {
                let mut flat = Vec::new();
                flatten_strings(value, spec, &mut flat)?;
                check_len(flat.len())?;
                Ok(Self::from_strings(&flat, shape))
            }
            DataType::Bool => {
                let mut flat = Vec::new();
                flatten_bools(value, spec, &mut flat)?;
                check_len(flat.len())?;
                Ok(Self::from_bool(&flat, shape))
            }
            _ => {
                let mut flat = Vec::new();
                flatten_numbers(value, spec, &mut flat)?;
                check_len(flat.len())?;
                encode_numeric(&flat, spec, shape)
            }
        }
    }

    /// Encode the tensor back to a nested-array JSON value.
    pub fn to_json(&self) -> Result<Value> {
        let values: Vec<Value> = match self.dtype {
            DataType::Float32 => self
                .as_f32()
                .unwrap_or_default()
                .into_iter()
                .map(json_f64)
                .collect(),
            DataType::Float64 => self
                .as_f64()
                .unwrap_or_default()
                .into_iter()
                .map(|v| json_f64(v as f32))
                .collect(),
            DataType::Int8 => decode_ints(&self.data, 1).into_iter().map(Value::from).collect(),
            DataType::Int16 => decode_ints(&self.data, 2).into_iter().map(Value::from).collect(),
            DataType::Int32 => decode_ints(&self.data, 4).into_iter().map(Value::from).collect(),
            DataType::Int64 => decode_ints(&self.data, 8).into_iter().map(Value::from).collect(),
            DataType::Uint8 => decode_uints(&self.data, 1).into_iter().map(Value::from).collect(),
            DataType::Uint16 => decode_uints(&self.data, 2).into_iter().map(Value::from).collect(),
            DataType::Uint32 => decode_uints(&self.data, 4).into_iter().map(Value::from).collect(),
            DataType::Uint64 => decode_uints(&self.data, 8).into_iter().map(Value::from).collect(),
            DataType::Bool => self
                .as_bool()
                .unwrap_or_default()
                .into_iter()
                .map(Value::from)
                .collect(),
            DataType::String => self
                .as_strings()
                .unwrap_or_default()
                .into_iter()
                .map(Value::from)
                .collect(),
            DataType::Float16 => {
                return Err(ServioError::UnsupportedFormat(
                    "float16 tensors have no JSON encoding".to_string(),
                ))
            }
        };

        nest(&values, &self.shape)
    }
}

fn json_f64(v: f32) -> Value {
    serde_json::Number::from_f64(v as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Infer the shape of a nested-array value and enforce rectangularity.
fn infer_shape(value: &Value, spec: &TensorSpec, shape: &mut Vec<i64>) -> Result<()> {
    if let Value::Array(items) = value {
        if items.is_empty() {
            return Err(ServioError::InvalidArgument(format!(
                "Input {} contains an empty array",
                spec.name
            )));
        }
        shape.push(items.len() as i64);
        infer_shape(&items[0], spec, shape)?;

        // Every sibling must have the same sub-shape
        let expected_len = match &items[0] {
            Value::Array(sub) => Some(sub.len()),
            _ => None,
        };
        for item in &items[1..] {
            match (item, expected_len) {
                (Value::Array(sub), Some(len)) if sub.len() == len => {}
                (Value::Array(_), _) | (_, Some(_)) => {
                    return Err(ServioError::InvalidArgument(format!(
                        "Input {} is not rectangular",
                        spec.name
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn flatten_numbers(value: &Value, spec: &TensorSpec, out: &mut Vec<f64>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_numbers(item, spec, out)?;
            }
            Ok(())
        }
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| {
                ServioError::InvalidArgument(format!("Input {} has a non-finite number", spec.name))
            })?;
            out.push(v);
            Ok(())
        }
        other => Err(ServioError::InvalidArgument(format!(
            "Input {} expects numbers, got {}",
            spec.name,
            json_kind(other)
        ))),
    }
}

fn flatten_bools(value: &Value, spec: &TensorSpec, out: &mut Vec<bool>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_bools(item, spec, out)?;
            }
            Ok(())
        }
        Value::Bool(b) => {
            out.push(*b);
            Ok(())
        }
        other => Err(ServioError::InvalidArgument(format!(
            "Input {} expects booleans, got {}",
            spec.name,
            json_kind(other)
        ))),
    }
}

fn flatten_strings(value: &Value, spec: &TensorSpec, out: &mut Vec<String>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_strings(item, spec, out)?;
            }
            Ok(())
        }
        Value::String(s) => {
            out.push(s.clone());
            Ok(())
        }
        other => Err(ServioError::InvalidArgument(format!(
            "Input {} expects strings, got {}",
            spec.name,
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn encode_numeric(flat: &[f64], spec: &TensorSpec, shape: Vec<i64>) -> Result<TensorData> {
    let data: Vec<u8> = match spec.dtype {
        DataType::Float32 => flat.iter().flat_map(|&v| (v as f32).to_le_bytes()).collect(),
        DataType::Float64 => flat.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DataType::Int8 => flat.iter().flat_map(|&v| (v as i8).to_le_bytes()).collect(),
        DataType::Int16 => flat.iter().flat_map(|&v| (v as i16).to_le_bytes()).collect(),
        DataType::Int32 => flat.iter().flat_map(|&v| (v as i32).to_le_bytes()).collect(),
        DataType::Int64 => flat.iter().flat_map(|&v| (v as i64).to_le_bytes()).collect(),
        DataType::Uint8 => flat.iter().flat_map(|&v| (v as u8).to_le_bytes()).collect(),
        DataType::Uint16 => flat.iter().flat_map(|&v| (v as u16).to_le_bytes()).collect(),
        DataType::Uint32 => flat.iter().flat_map(|&v| (v as u32).to_le_bytes()).collect(),
        DataType::Uint64 => flat.iter().flat_map(|&v| (v as u64).to_le_bytes()).collect(),
        DataType::Float16 | DataType::Bool | DataType::String => {
            return Err(ServioError::UnsupportedFormat(format!(
                "{} wire values are not supported for input {}",
                spec.dtype, spec.name
            )))
        }
    };

    Ok(TensorData {
        dtype: spec.dtype,
        shape,
        data,
    })
}

fn decode_ints(data: &[u8], width: usize) -> Vec<i64> {
    data.chunks_exact(width)
        .map(|c| {
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(c);
            // Sign-extend
            if c[width - 1] & 0x80 != 0 {
                for b in buf.iter_mut().skip(width) {
                    *b = 0xff;
                }
            }
            i64::from_le_bytes(buf)
        })
        .collect()
}

fn decode_uints(data: &[u8], width: usize) -> Vec<u64> {
    data.chunks_exact(width)
        .map(|c| {
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(c);
            u64::from_le_bytes(buf)
        })
        .collect()
}

/// Re-nest a flat value list according to a shape.
fn nest(values: &[Value], shape: &[i64]) -> Result<Value> {
    if shape.is_empty() {
        return Ok(values.first().cloned().unwrap_or(Value::Null));
    }

    let expected: usize = shape.iter().map(|&d| d.max(0) as usize).product();
    if values.len() != expected {
        return Err(ServioError::Internal(format!(
            "Tensor data length {} does not match shape {:?}",
            values.len(),
            shape
        )));
    }

    Ok(nest_level(values, shape))
}

fn nest_level(values: &[Value], shape: &[i64]) -> Value {
    if shape.len() == 1 {
        return Value::Array(values.to_vec());
    }
    let inner: usize = shape[1..].iter().map(|&d| d.max(0) as usize).product();
    let chunks: Vec<Value> = values
        .chunks(inner.max(1))
        .map(|chunk| nest_level(chunk, &shape[1..]))
        .collect();
    Value::Array(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(dtype: DataType, shape: Vec<i64>) -> TensorSpec {
        TensorSpec::new("x", dtype, shape)
    }

    #[test]
    fn test_tensor_data_roundtrip() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let tensor = TensorData::from_f32(&data, vec![2, 2]);

        assert_eq!(tensor.dtype, DataType::Float32);
        assert_eq!(tensor.shape, vec![2, 2]);
        assert_eq!(tensor.element_count(), 4);
        assert_eq!(tensor.as_f32().unwrap(), data);
        assert!(tensor.as_i64().is_none());
    }

    #[test]
    fn test_from_json_infers_shape() {
        let value = json!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let tensor = TensorData::from_json(&value, &spec(DataType::Float32, vec![-1, 2])).unwrap();

        assert_eq!(tensor.shape, vec![3, 2]);
        assert_eq!(tensor.as_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_json_scalar() {
        let tensor = TensorData::from_json(&json!(7), &spec(DataType::Int64, vec![])).unwrap();
        assert!(tensor.shape.is_empty());
        assert_eq!(tensor.as_i64().unwrap(), vec![7]);
    }

    #[test]
    fn test_from_json_rejects_ragged() {
        let value = json!([[1.0, 2.0], [3.0]]);
        let err = TensorData::from_json(&value, &spec(DataType::Float32, vec![-1, 2]));
        assert!(err.is_err());
    }

    #[test]
    fn test_from_json_rejects_wrong_kind() {
        let value = json!(["a", "b"]);
        assert!(TensorData::from_json(&value, &spec(DataType::Float32, vec![2])).is_err());
        assert!(TensorData::from_json(&value, &spec(DataType::String, vec![2])).is_ok());
    }

    #[test]
    fn test_to_json_nests_by_shape() {
        let tensor = TensorData::from_i64(&[1, 2, 3, 4, 5, 6], vec![2, 3]);
        let value = tensor.to_json().unwrap();
        assert_eq!(value, json!([[1, 2, 3], [4, 5, 6]]));
    }

    #[test]
    fn test_json_roundtrip() {
        let value = json!([[0.5, 1.5], [2.5, 3.5]]);
        let tensor = TensorData::from_json(&value, &spec(DataType::Float32, vec![-1, 2])).unwrap();
        assert_eq!(tensor.to_json().unwrap(), value);
    }

    #[test]
    fn test_string_tensor() {
        let tensor =
            TensorData::from_strings(&["cat".to_string(), "dog".to_string()], vec![2]);
        assert_eq!(
            tensor.as_strings().unwrap(),
            vec!["cat".to_string(), "dog".to_string()]
        );
        assert_eq!(tensor.to_json().unwrap(), json!(["cat", "dog"]));
    }

    #[test]
    fn test_signed_narrow_decode() {
        let tensor = TensorData {
            dtype: DataType::Int8,
            shape: vec![2],
            data: vec![0xff, 0x01], // -1, 1
        };
        assert_eq!(tensor.to_json().unwrap(), json!([-1, 1]));
    }
}
