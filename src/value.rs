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

//! Row and value types accepted by the bulk writer.
//!
//! [`Value`] covers both the loosely-typed shapes callers hand to
//! `append_row` (numbers, text, raw bytes, wide-integer parts, nested JSON)
//! and the canonical shapes produced by the field validators (packed vector
//! bytes, normalized 64-bit integers). Validation converts the former into
//! the latter before anything reaches the buffer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::int64::Int64Repr;

/// A 64-bit integer supplied as raw low/high halves, as produced by
/// wide-integer libraries that split values into two 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideInt {
    /// Low 32 bits
    pub lo: u32,
    /// High 32 bits
    pub hi: u32,
    /// Whether the combined 64-bit pattern is unsigned
    pub unsigned: bool,
}

impl WideInt {
    pub fn new(lo: u32, hi: u32, unsigned: bool) -> Self {
        Self { lo, hi, unsigned }
    }

    /// Combined 64-bit pattern, before any signedness interpretation.
    pub fn bits(&self) -> u64 {
        (u64::from(self.hi) << 32) | u64::from(self.lo)
    }
}

/// A loosely-typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    /// Host integer
    Int(i64),
    /// Host float
    Float(f64),
    /// Text: varchar content, decimal int64 digits, or base64 vector data
    String(String),
    /// Raw bytes: pre-packed vector data
    Bytes(Vec<u8>),
    /// Arbitrary-precision integer input
    BigInt(i128),
    /// 64-bit integer supplied as low/high words
    WideInt(WideInt),
    /// Canonical 64-bit integer, produced by the precision engine
    Int64(Int64Repr),
    /// Element list: arrays, dense vectors, bit arrays
    Array(Vec<Value>),
    /// Arbitrary nested JSON
    Json(serde_json::Value),
    /// Canonical float32 vector
    FloatVector(Vec<f32>),
    /// Canonical binary vector, bit-packed MSB-first
    BinaryVector(Vec<u8>),
    /// Canonical float16 vector, 2 little-endian bytes per element
    Float16Vector(Vec<u8>),
    /// Canonical bfloat16 vector, 2 little-endian bytes per element
    BFloat16Vector(Vec<u8>),
    /// Canonical int8 vector
    Int8Vector(Vec<i8>),
    /// Canonical sparse float vector: index -> value
    SparseVector(BTreeMap<u32, f32>),
}

impl Value {
    /// Short name of the value's shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::BigInt(_) => "big integer",
            Value::WideInt(_) => "wide integer",
            Value::Int64(_) => "int64",
            Value::Array(_) => "array",
            Value::Json(_) => "json",
            Value::FloatVector(_) => "float vector",
            Value::BinaryVector(_) => "binary vector",
            Value::Float16Vector(_) => "float16 vector",
            Value::BFloat16Vector(_) => "bfloat16 vector",
            Value::Int8Vector(_) => "int8 vector",
            Value::SparseVector(_) => "sparse vector",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Project the value into plain JSON, for dynamic-field overflow
    /// storage. Returns `None` for shapes with no JSON representation.
    pub(crate) fn into_json_loose(self) -> Option<serde_json::Value> {
        use base64::prelude::BASE64_STANDARD;
        use base64::Engine;

        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(b)),
            Value::Int(i) => Some(serde_json::Value::from(i)),
            Value::Float(f) => serde_json::Number::from_f64(f).map(serde_json::Value::Number),
            Value::String(s) => Some(serde_json::Value::String(s)),
            Value::Bytes(b) => Some(serde_json::Value::String(BASE64_STANDARD.encode(b))),
            Value::BigInt(b) => i64::try_from(b).ok().map(serde_json::Value::from),
            Value::WideInt(w) => {
                if w.unsigned {
                    i64::try_from(w.bits()).ok().map(serde_json::Value::from)
                } else {
                    Some(serde_json::Value::from(w.bits() as i64))
                }
            }
            Value::Json(v) => Some(v),
            Value::Array(values) => values
                .into_iter()
                .map(Value::into_json_loose)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::FloatVector(v)
    }
}

impl From<Vec<i8>> for Value {
    fn from(v: Vec<i8>) -> Self {
        Value::Int8Vector(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Array(v.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(v.into_iter().map(Value::Float).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Array(v.into_iter().map(Value::String).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<WideInt> for Value {
    fn from(v: WideInt) -> Self {
        Value::WideInt(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<BTreeMap<u32, f32>> for Value {
    fn from(v: BTreeMap<u32, f32>) -> Self {
        Value::SparseVector(v)
    }
}

/// A single input row: field name -> loosely-typed value.
///
/// Keys absent from the collection schema are diverted into the dynamic
/// overflow column when the schema enables it.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value, consuming and returning the row for chaining
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Insert a field value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
