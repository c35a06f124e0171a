// Copyright 2024 The Vecbulk Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-type field validators.
//!
//! Each validator converts a loosely-typed input into its canonical,
//! schema-conformant [`Value`] and reports the serialized byte size used for
//! buffer accounting. Validators fail fast with an error naming the field
//! and the violated constraint; nothing is buffered for a rejected row.

use std::collections::BTreeMap;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use half::{bf16, f16};
use snafu::{ensure, ResultExt};

use crate::error::{self, Result};
use crate::int64::{int64_marker, Int64Engine, MAX_SAFE_INTEGER};
use crate::schema::{DataType, FieldSchema};
use crate::value::Value;

const DEFAULT_VARCHAR_MAX_LENGTH: usize = 65_535;
const DEFAULT_ARRAY_CAPACITY: usize = 1_000;
/// Sparse vector indices must stay below 2^32 - 1.
const SPARSE_INDEX_LIMIT: u64 = u32::MAX as u64;

/// A canonicalized value together with its serialized byte size.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub value: Value,
    pub size: usize,
}

impl Validated {
    fn new(value: Value, size: usize) -> Self {
        Self { value, size }
    }
}

/// Validate a value against its field schema, dispatching on data type.
pub fn validate_field(field: &FieldSchema, value: Value, int64: &Int64Engine) -> Result<Validated> {
    match field.data_type {
        DataType::Bool => validate_bool(field, value),
        DataType::Int8 => validate_int(field, value, i64::from(i8::MIN), i64::from(i8::MAX), 1),
        DataType::Int16 => validate_int(field, value, i64::from(i16::MIN), i64::from(i16::MAX), 2),
        DataType::Int32 => validate_int(field, value, i64::from(i32::MIN), i64::from(i32::MAX), 4),
        DataType::Int64 => {
            let repr = int64.normalize_value(&field.name, &value)?;
            Ok(Validated::new(Value::Int64(repr), 8))
        }
        DataType::Float => validate_float(field, value, 4),
        DataType::Double => validate_float(field, value, 8),
        DataType::VarChar => validate_varchar(field, value),
        DataType::Json => validate_json(field, value, int64),
        DataType::Array => validate_array(field, value, int64),
        DataType::FloatVector => validate_float_vector(field, value),
        DataType::BinaryVector => validate_binary_vector(field, value),
        DataType::Float16Vector => validate_half_vector(field, value, HalfKind::Fp16),
        DataType::BFloat16Vector => validate_half_vector(field, value, HalfKind::Bf16),
        DataType::Int8Vector => validate_int8_vector(field, value),
        DataType::SparseFloatVector => validate_sparse_vector(field, value),
    }
}

fn validate_bool(field: &FieldSchema, value: Value) -> Result<Validated> {
    match value {
        Value::Bool(b) => Ok(Validated::new(Value::Bool(b), 1)),
        other => error::InvalidFieldValueSnafu {
            field: field.name.as_str(),
            expected: "boolean",
            actual: other.kind(),
        }
        .fail(),
    }
}

/// Extract an integral host number, accepting integral floats like the
/// loosely-typed sources this crate ingests from.
fn as_integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 => {
            Some(*f as i64)
        }
        _ => None,
    }
}

fn validate_int(
    field: &FieldSchema,
    value: Value,
    min: i64,
    max: i64,
    size: usize,
) -> Result<Validated> {
    let expected = match size {
        1 => "integer in [-128, 127]",
        2 => "integer in [-32768, 32767]",
        _ => "integer in [-2147483648, 2147483647]",
    };
    let i = as_integral(&value).ok_or_else(|| {
        error::InvalidFieldValueSnafu {
            field: field.name.as_str(),
            expected,
            actual: value.kind(),
        }
        .build()
    })?;
    ensure!(
        (min..=max).contains(&i),
        error::InvalidFieldValueSnafu {
            field: field.name.as_str(),
            expected,
            actual: i.to_string(),
        }
    );
    Ok(Validated::new(Value::Int(i), size))
}

fn validate_float(field: &FieldSchema, value: Value, size: usize) -> Result<Validated> {
    let f = match value {
        Value::Float(f) => f,
        Value::Int(i) => i as f64,
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "finite number",
                actual: other.kind(),
            }
            .fail()
        }
    };
    ensure!(
        f.is_finite(),
        error::InvalidFieldValueSnafu {
            field: field.name.as_str(),
            expected: "finite number",
            actual: f.to_string(),
        }
    );
    Ok(Validated::new(Value::Float(f), size))
}

fn validate_varchar(field: &FieldSchema, value: Value) -> Result<Validated> {
    let max_length = field.max_length.unwrap_or(DEFAULT_VARCHAR_MAX_LENGTH);
    match value {
        Value::String(s) => {
            let chars = s.chars().count();
            ensure!(
                chars <= max_length,
                error::VarcharTooLongSnafu {
                    field: field.name.as_str(),
                    max_length,
                    actual: chars,
                }
            );
            Ok(Validated::new(Value::String(s), chars))
        }
        other => error::InvalidFieldValueSnafu {
            field: field.name.as_str(),
            expected: "string",
            actual: other.kind(),
        }
        .fail(),
    }
}

fn validate_json(field: &FieldSchema, value: Value, int64: &Int64Engine) -> Result<Validated> {
    let json = match value {
        Value::Json(v) => v,
        Value::String(s) => serde_json::Value::String(s),
        Value::Null => serde_json::Value::Null,
        _ => {
            return error::InvalidJsonValueSnafu {
                field: field.name.as_str(),
            }
            .fail()
        }
    };
    let rewritten = rewrite_json_int64(&field.name, json, int64)?;
    let size = serde_json::to_string(&rewritten).map_or(0, |s| s.len());
    Ok(Validated::new(Value::Json(rewritten), size))
}

/// Recursively walk a JSON tree, routing 64-bit-integer-shaped numbers
/// through the precision engine. Safe integers, strings, and everything
/// else pass through unchanged.
fn rewrite_json_int64(
    field: &str,
    value: serde_json::Value,
    int64: &Int64Engine,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(rewrite_json_int64(field, item, int64)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, rewrite_json_int64(field, v, int64)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
                    let repr = int64.normalize_value(field, &Value::Int(i))?;
                    return Ok(int64_marker(repr.digits()));
                }
            } else if let Some(u) = n.as_u64() {
                // u64 beyond i64::MAX cannot be a signed 64-bit integer.
                return error::Int64OutOfRangeSnafu {
                    field,
                    value: u.to_string(),
                }
                .fail();
            }
            Ok(serde_json::Value::Number(n))
        }
        other => Ok(other),
    }
}

fn validate_array(field: &FieldSchema, value: Value, int64: &Int64Engine) -> Result<Validated> {
    let max_capacity = field.max_capacity.unwrap_or(DEFAULT_ARRAY_CAPACITY);
    let element_type = field.element_type.ok_or_else(|| {
        error::MissingElementTypeSnafu {
            field: field.name.as_str(),
        }
        .build()
    })?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "array",
                actual: other.kind(),
            }
            .fail()
        }
    };
    ensure!(
        items.len() <= max_capacity,
        error::ArrayCapacityExceededSnafu {
            field: field.name.as_str(),
            max_capacity,
            actual: items.len(),
        }
    );

    // Int64 elements go through the precision engine; other element types
    // are stored as supplied.
    let size = items.len() * 8;
    if element_type == DataType::Int64 {
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            out.push(Value::Int64(int64.normalize_value(&field.name, item)?));
        }
        return Ok(Validated::new(Value::Array(out), size));
    }
    Ok(Validated::new(Value::Array(items), size))
}

fn validate_float_vector(field: &FieldSchema, value: Value) -> Result<Validated> {
    let dim = field.dim();
    let vector = as_f32_vector(field, value, dim)?;
    Ok(Validated::new(Value::FloatVector(vector), dim * 4))
}

/// Shared dense-float extraction for float32/float16/bfloat16 vectors.
fn as_f32_vector(field: &FieldSchema, value: Value, dim: usize) -> Result<Vec<f32>> {
    let items = match value {
        Value::FloatVector(v) => {
            ensure!(
                v.len() == dim,
                error::VectorDimensionSnafu {
                    field: field.name.as_str(),
                    expected: dim,
                    actual: v.len(),
                }
            );
            for (i, x) in v.iter().enumerate() {
                ensure!(
                    x.is_finite(),
                    error::InvalidFieldValueSnafu {
                        field: field.name.as_str(),
                        expected: "finite number",
                        actual: format!("{x} at index {i}"),
                    }
                );
            }
            return Ok(v);
        }
        Value::Array(items) => items,
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "float vector",
                actual: other.kind(),
            }
            .fail()
        }
    };

    ensure!(
        items.len() == dim,
        error::VectorDimensionSnafu {
            field: field.name.as_str(),
            expected: dim,
            actual: items.len(),
        }
    );
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let f = match item {
            Value::Float(f) if f.is_finite() => *f,
            Value::Int(v) => *v as f64,
            other => {
                return error::InvalidFieldValueSnafu {
                    field: field.name.as_str(),
                    expected: "finite number",
                    actual: format!("{} at index {i}", other.kind()),
                }
                .fail()
            }
        };
        out.push(f as f32);
    }
    Ok(out)
}

fn validate_binary_vector(field: &FieldSchema, value: Value) -> Result<Validated> {
    let dim = field.dim();
    let byte_len = dim.div_ceil(8);

    let bytes = match value {
        Value::Bytes(b) | Value::BinaryVector(b) => {
            ensure!(
                b.len() == byte_len,
                error::VectorByteLengthSnafu {
                    field: field.name.as_str(),
                    expected: byte_len,
                    actual: b.len(),
                }
            );
            b
        }
        Value::String(s) => {
            let decoded = BASE64_STANDARD.decode(s.as_bytes()).context(
                error::InvalidBase64Snafu {
                    field: field.name.as_str(),
                },
            )?;
            ensure!(
                decoded.len() == byte_len,
                error::VectorByteLengthSnafu {
                    field: field.name.as_str(),
                    expected: byte_len,
                    actual: decoded.len(),
                }
            );
            decoded
        }
        Value::Array(items) => {
            // A bit array has one entry per dimension; anything else is
            // treated as a packed byte array.
            let as_bits: Option<Vec<bool>> = if items.len() == dim {
                items
                    .iter()
                    .map(|v| match v {
                        Value::Int(0) => Some(false),
                        Value::Int(1) => Some(true),
                        _ => None,
                    })
                    .collect()
            } else {
                None
            };

            if let Some(bits) = as_bits {
                pack_bits(&bits)
            } else {
                ensure!(
                    items.len() == byte_len,
                    error::VectorByteLengthSnafu {
                        field: field.name.as_str(),
                        expected: byte_len,
                        actual: items.len(),
                    }
                );
                let mut bytes = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let byte = match item {
                        Value::Int(v) if (0..=255).contains(v) => *v as u8,
                        other => {
                            return error::InvalidFieldValueSnafu {
                                field: field.name.as_str(),
                                expected: "integer in [0, 255]",
                                actual: format!("{} at index {i}", other.kind()),
                            }
                            .fail()
                        }
                    };
                    bytes.push(byte);
                }
                bytes
            }
        }
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "bytes, base64 string, bit array, or byte array",
                actual: other.kind(),
            }
            .fail()
        }
    };

    Ok(Validated::new(Value::BinaryVector(bytes), byte_len))
}

/// Pack bits most-significant-bit-first, 8 bits per byte, zero-padding the
/// trailing bits.
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

fn validate_int8_vector(field: &FieldSchema, value: Value) -> Result<Validated> {
    let dim = field.dim();
    let vector = match value {
        Value::Int8Vector(v) => {
            ensure!(
                v.len() == dim,
                error::VectorDimensionSnafu {
                    field: field.name.as_str(),
                    expected: dim,
                    actual: v.len(),
                }
            );
            v
        }
        Value::Array(items) => {
            ensure!(
                items.len() == dim,
                error::VectorDimensionSnafu {
                    field: field.name.as_str(),
                    expected: dim,
                    actual: items.len(),
                }
            );
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let v = match item {
                    Value::Int(v) if (-128..=127).contains(v) => *v as i8,
                    other => {
                        return error::InvalidFieldValueSnafu {
                            field: field.name.as_str(),
                            expected: "integer in [-128, 127]",
                            actual: format!("{} at index {i}", other.kind()),
                        }
                        .fail()
                    }
                };
                out.push(v);
            }
            out
        }
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "int8 array",
                actual: other.kind(),
            }
            .fail()
        }
    };
    Ok(Validated::new(Value::Int8Vector(vector), dim))
}

#[derive(Clone, Copy)]
enum HalfKind {
    Fp16,
    Bf16,
}

fn validate_half_vector(field: &FieldSchema, value: Value, kind: HalfKind) -> Result<Validated> {
    let dim = field.dim();
    let byte_len = dim * 2;

    let bytes = match value {
        Value::Bytes(b) | Value::Float16Vector(b) | Value::BFloat16Vector(b) => {
            ensure!(
                b.len() == byte_len,
                error::VectorByteLengthSnafu {
                    field: field.name.as_str(),
                    expected: byte_len,
                    actual: b.len(),
                }
            );
            b
        }
        Value::String(s) => {
            let decoded = BASE64_STANDARD.decode(s.as_bytes()).context(
                error::InvalidBase64Snafu {
                    field: field.name.as_str(),
                },
            )?;
            ensure!(
                decoded.len() == byte_len,
                error::VectorByteLengthSnafu {
                    field: field.name.as_str(),
                    expected: byte_len,
                    actual: decoded.len(),
                }
            );
            decoded
        }
        dense => {
            // A dense float array is converted to the 2-byte encoding,
            // truncating to the narrower mantissa.
            let floats = as_f32_vector(field, dense, dim)?;
            match kind {
                HalfKind::Fp16 => f32s_to_f16_bytes(&floats),
                HalfKind::Bf16 => f32s_to_bf16_bytes(&floats),
            }
        }
    };

    let value = match kind {
        HalfKind::Fp16 => Value::Float16Vector(bytes),
        HalfKind::Bf16 => Value::BFloat16Vector(bytes),
    };
    Ok(Validated::new(value, byte_len))
}

pub(crate) fn f32s_to_f16_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 2);
    for v in values {
        bytes.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
    }
    bytes
}

pub(crate) fn f32s_to_bf16_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 2);
    for v in values {
        bytes.extend_from_slice(&bf16::from_f32(*v).to_le_bytes());
    }
    bytes
}

fn validate_sparse_vector(field: &FieldSchema, value: Value) -> Result<Validated> {
    let entries = match value {
        Value::SparseVector(map) => {
            for (k, v) in &map {
                ensure!(
                    v.is_finite(),
                    error::SparseVectorValueSnafu {
                        field: field.name.as_str(),
                        key: k.to_string(),
                    }
                );
            }
            map
        }
        Value::Json(serde_json::Value::Object(map)) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                ensure!(
                    !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()),
                    error::SparseVectorKeySnafu {
                        field: field.name.as_str(),
                        key: k.as_str(),
                    }
                );
                let index: u64 = k.parse().map_err(|_| {
                    error::SparseVectorKeySnafu {
                        field: field.name.as_str(),
                        key: k.as_str(),
                    }
                    .build()
                })?;
                ensure!(
                    index < SPARSE_INDEX_LIMIT,
                    error::SparseVectorKeySnafu {
                        field: field.name.as_str(),
                        key: k.as_str(),
                    }
                );
                let number = v.as_f64().filter(|f| f.is_finite()).ok_or_else(|| {
                    error::SparseVectorValueSnafu {
                        field: field.name.as_str(),
                        key: k.as_str(),
                    }
                    .build()
                })?;
                out.insert(index as u32, number as f32);
            }
            out
        }
        other => {
            return error::InvalidFieldValueSnafu {
                field: field.name.as_str(),
                expected: "sparse vector object",
                actual: other.kind(),
            }
            .fail()
        }
    };

    // 4-byte index + 4-byte value per entry.
    let size = entries.len() * 8;
    Ok(Validated::new(Value::SparseVector(entries), size))
}
