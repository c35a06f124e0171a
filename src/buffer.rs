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

//! In-memory columnar buffer aligned with the collection schema.
//!
//! The buffer owns serialization to the on-disk row format: one JSON
//! document per chunk, `{ "rows": [...] }`, with packed vector fields
//! emitted as base64 and canonical 64-bit integers emitted as bare decimal
//! literals through a marker-and-rewrite pass. A literal beyond ±2^53-1 is
//! legal JSON syntax but not round-trippable through IEEE-754-based
//! parsers; readers of these files must parse large integers exactly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use regex::Regex;
use snafu::{ensure, ResultExt};

use crate::error::{self, Result};
use crate::int64::{int64_marker, Int64Repr, INT64_MARKER_KEY};
use crate::schema::{CollectionSchema, FieldSchema};
use crate::value::Value;
use crate::writer::BulkFileType;
use crate::DYNAMIC_FIELD_NAME;

/// A validated row ready for columnar storage: canonical values for every
/// retained schema field, plus the overflow entries destined for the
/// dynamic column.
#[derive(Debug, Clone, Default)]
pub struct ValidatedRow {
    pub(crate) declared: HashMap<String, Value>,
    pub(crate) overflow: serde_json::Map<String, serde_json::Value>,
}

/// Result of a size-bounded partial flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Chunk files written
    pub files: Vec<PathBuf>,
    /// Rows consumed from the front of the buffer
    pub rows_processed: usize,
    /// Rows still buffered
    pub remaining_rows: usize,
}

/// Columnar store keyed by field name.
///
/// Invariant: every column (including the dynamic overflow column when the
/// schema enables it) has identical length equal to the buffer's row count.
pub struct Buffer {
    fields: Vec<FieldSchema>,
    columns: Vec<Vec<Value>>,
    dynamic: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    row_sizes: Vec<usize>,
    file_type: BulkFileType,
}

impl Buffer {
    /// Create a buffer for the schema's persistable fields.
    ///
    /// Auto-id primary keys and function outputs are server-generated and
    /// excluded; a schema retaining no fields is rejected.
    pub fn new(schema: &CollectionSchema, file_type: BulkFileType) -> Result<Self> {
        let fields: Vec<FieldSchema> = schema
            .fields
            .iter()
            .filter(|f| !f.is_server_generated())
            .cloned()
            .collect();
        ensure!(!fields.is_empty(), error::NoPersistableFieldsSnafu);

        let columns = fields.iter().map(|_| Vec::new()).collect();
        Ok(Self {
            fields,
            columns,
            dynamic: schema.enable_dynamic_field.then(Vec::new),
            row_sizes: Vec::new(),
            file_type,
        })
    }

    /// Number of buffered rows.
    pub fn row_count(&self) -> usize {
        self.row_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_sizes.is_empty()
    }

    /// Append a validated row, extending every column by one entry.
    pub fn append_row(&mut self, mut row: ValidatedRow) {
        let mut size = 2;
        for (field, column) in self.fields.iter().zip(self.columns.iter_mut()) {
            let value = row.declared.remove(&field.name).unwrap_or(Value::Null);
            size += field.name.len() + 4 + estimated_json_size(&value);
            column.push(value);
        }
        if let Some(dynamic) = &mut self.dynamic {
            size += DYNAMIC_FIELD_NAME.len() + 4 + json_text_size(&serde_json::Value::Object(
                row.overflow.clone(),
            ));
            dynamic.push(row.overflow);
        }
        self.row_sizes.push(size);
    }

    /// Drop the first `n` rows from every column after a partial flush.
    pub fn remove_processed_rows(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let n = n.min(self.row_count());
        for column in &mut self.columns {
            column.drain(..n.min(column.len()));
        }
        if let Some(dynamic) = &mut self.dynamic {
            dynamic.drain(..n.min(dynamic.len()));
        }
        self.row_sizes.drain(..n);
    }

    /// Persist every buffered row into a single chunk file.
    pub async fn persist(&self, target: &Path) -> Result<Vec<PathBuf>> {
        self.check_file_type()?;
        if self.row_count() == 0 {
            return Ok(Vec::new());
        }
        self.check_integrity()?;

        let rows: Vec<serde_json::Value> = (0..self.row_count())
            .map(|i| self.json_row(i))
            .collect();
        write_json_rows(target, rows).await?;
        Ok(vec![target.to_path_buf()])
    }

    /// Persist a size-bounded prefix of the buffered rows.
    ///
    /// Rows are accumulated greedily while the running total of their
    /// estimated serialized sizes stays at or under `max_bytes`; at least
    /// one row is always accepted so that an oversized row cannot stall the
    /// flush loop. Consumed rows are NOT removed here; call
    /// [`Buffer::remove_processed_rows`] once the chunk is safely written.
    pub async fn persist_partial(&self, target: &Path, max_bytes: usize) -> Result<PersistOutcome> {
        self.check_file_type()?;
        let total = self.row_count();
        if total == 0 {
            return Ok(PersistOutcome {
                files: Vec::new(),
                rows_processed: 0,
                remaining_rows: 0,
            });
        }
        self.check_integrity()?;

        let mut current_size = 0usize;
        let mut taken = 0usize;
        for (i, row_size) in self.row_sizes.iter().enumerate() {
            if current_size + row_size > max_bytes && taken > 0 {
                break;
            }
            current_size += row_size;
            taken = i + 1;
        }

        let rows: Vec<serde_json::Value> = (0..taken).map(|i| self.json_row(i)).collect();
        write_json_rows(target, rows).await?;

        Ok(PersistOutcome {
            files: vec![target.to_path_buf()],
            rows_processed: taken,
            remaining_rows: total - taken,
        })
    }

    fn check_file_type(&self) -> Result<()> {
        ensure!(
            self.file_type == BulkFileType::Json,
            error::UnsupportedFileTypeSnafu {
                file_type: self.file_type,
            }
        );
        Ok(())
    }

    fn check_integrity(&self) -> Result<()> {
        let expected = self.row_count();
        for (field, column) in self.fields.iter().zip(self.columns.iter()) {
            ensure!(
                column.len() == expected,
                error::ColumnLengthMismatchSnafu {
                    column: field.name.as_str(),
                    expected,
                    actual: column.len(),
                }
            );
        }
        if let Some(dynamic) = &self.dynamic {
            ensure!(
                dynamic.len() == expected,
                error::ColumnLengthMismatchSnafu {
                    column: DYNAMIC_FIELD_NAME,
                    expected,
                    actual: dynamic.len(),
                }
            );
        }
        Ok(())
    }

    fn json_row(&self, index: usize) -> serde_json::Value {
        let mut row = serde_json::Map::with_capacity(self.fields.len() + 1);
        for (field, column) in self.fields.iter().zip(self.columns.iter()) {
            row.insert(field.name.clone(), value_to_json(&column[index]));
        }
        if let Some(dynamic) = &self.dynamic {
            row.insert(
                DYNAMIC_FIELD_NAME.to_string(),
                serde_json::Value::Object(dynamic[index].clone()),
            );
        }
        serde_json::Value::Object(row)
    }
}

/// Serialize a canonical value into the chunk file representation: packed
/// vectors become base64 text, float32 vectors stay numeric arrays, sparse
/// vectors become digit-keyed objects, and int64 values become marker
/// objects that the post-pass rewrites into bare literals.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Int64(repr) => int64_marker(repr.digits()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Json(v) => v.clone(),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::FloatVector(v) => serde_json::Value::Array(
            v.iter()
                .map(|f| {
                    serde_json::Number::from_f64(f64::from(*f))
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect(),
        ),
        Value::BinaryVector(b) | Value::Float16Vector(b) | Value::BFloat16Vector(b) => {
            serde_json::Value::String(BASE64_STANDARD.encode(b))
        }
        Value::Int8Vector(v) => {
            let bytes: Vec<u8> = v.iter().map(|i| *i as u8).collect();
            serde_json::Value::String(BASE64_STANDARD.encode(bytes))
        }
        Value::SparseVector(map) => {
            let mut obj = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                obj.insert(
                    k.to_string(),
                    serde_json::Number::from_f64(f64::from(*v))
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null),
                );
            }
            serde_json::Value::Object(obj)
        }
        // Loose inputs never reach the buffer unvalidated; render their
        // exact digits if one slips through a default value.
        Value::BigInt(b) => int64_marker(b.to_string()),
        Value::WideInt(w) => {
            if w.unsigned {
                int64_marker(w.bits().to_string())
            } else {
                int64_marker((w.bits() as i64).to_string())
            }
        }
        Value::Bytes(b) => serde_json::Value::String(BASE64_STANDARD.encode(b)),
    }
}

fn int64_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r#"\{{\s*"{INT64_MARKER_KEY}"\s*:\s*"(-?\d+)"\s*\}}"#
        ))
        .unwrap()
    })
}

/// Rewrite every int64 marker object into its bare digit sequence,
/// producing literal (unquoted) large integers in the output text.
fn replace_int64_markers(json: &str) -> String {
    int64_marker_re().replace_all(json, "$1").into_owned()
}

async fn write_json_rows(target: &Path, rows: Vec<serde_json::Value>) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context(error::CreateDirSnafu { path: parent })?;
    }

    let mut doc = serde_json::Map::with_capacity(1);
    doc.insert("rows".to_string(), serde_json::Value::Array(rows));
    let json = serde_json::to_string_pretty(&serde_json::Value::Object(doc))
        .context(error::SerdeJsonSnafu)?;
    let json = replace_int64_markers(&json);

    tokio::fs::write(target, json.as_bytes())
        .await
        .context(error::WriteChunkSnafu { path: target })
}

/// Fast approximation of a value's serialized JSON size, used for chunk
/// packing without serializing twice.
fn estimated_json_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(b) => {
            if *b {
                4
            } else {
                5
            }
        }
        Value::Int(i) => decimal_len(*i),
        Value::Float(f) => format!("{f}").len(),
        Value::Int64(repr) => match repr {
            Int64Repr::Text(s) => s.len(),
            Int64Repr::Number(v) | Int64Repr::Big(v) => decimal_len(*v),
        },
        Value::String(s) => s.len() + 2,
        Value::Json(v) => json_text_size(v),
        Value::Array(items) => {
            2 + items.iter().map(estimated_json_size).sum::<usize>()
                + items.len().saturating_sub(1)
        }
        Value::FloatVector(v) => {
            2 + v.iter().map(|f| format!("{f}").len()).sum::<usize>() + v.len().saturating_sub(1)
        }
        Value::BinaryVector(b) | Value::Float16Vector(b) | Value::BFloat16Vector(b)
        | Value::Bytes(b) => base64_len(b.len()) + 2,
        Value::Int8Vector(v) => base64_len(v.len()) + 2,
        Value::SparseVector(map) => {
            2 + map
                .iter()
                .map(|(k, v)| decimal_len(i64::from(*k)) + 3 + format!("{v}").len())
                .sum::<usize>()
                + map.len().saturating_sub(1)
        }
        Value::BigInt(b) => b.to_string().len(),
        Value::WideInt(w) => decimal_len(w.bits() as i64),
    }
}

fn json_text_size(value: &serde_json::Value) -> usize {
    serde_json::to_string(value).map_or(2, |s| s.len())
}

fn decimal_len(v: i64) -> usize {
    let digits = v.unsigned_abs().checked_ilog10().unwrap_or(0) as usize + 1;
    digits + usize::from(v < 0)
}

fn base64_len(bytes: usize) -> usize {
    bytes.div_ceil(3) * 4
}
