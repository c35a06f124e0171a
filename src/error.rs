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

use std::io;
use std::path::PathBuf;

use snafu::{Location, Snafu};

use crate::writer::BulkFileType;

/// Boxed error type surfaced by [`crate::sink::ObjectStore`] implementations.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // Schema errors, fatal at construction.
    #[snafu(display("Collection schema fields list is empty"))]
    EmptyFieldList {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Collection schema has no primary key field"))]
    MissingPrimaryKey {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Collection schema has multiple primary key fields: {:?}", fields))]
    MultiplePrimaryKeys {
        fields: Vec<String>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Collection schema has no persistable fields"))]
    NoPersistableFields {
        #[snafu(implicit)]
        location: Location,
    },

    // Validation errors, fatal per append_row call.
    #[snafu(display("Primary key field '{}' is auto-id, no need to provide", field))]
    AutoIdFieldProvided {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Field '{}' is function output, no need to provide", field))]
    FunctionOutputFieldProvided {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Field '{}' is not nullable, a value is required", field))]
    MissingRequiredField {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid value for field '{}': expected {}, got {}", field, expected, actual))]
    InvalidFieldValue {
        field: String,
        expected: String,
        actual: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Invalid vector for field '{}': expected dim={}, got length {}",
        field,
        expected,
        actual
    ))]
    VectorDimension {
        field: String,
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Invalid vector bytes for field '{}': expected length {}, got {}",
        field,
        expected,
        actual
    ))]
    VectorByteLength {
        field: String,
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid base64 data for field '{}'", field))]
    InvalidBase64 {
        field: String,
        #[snafu(source)]
        error: base64::DecodeError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid sparse vector key for field '{}': '{}'", field, key))]
    SparseVectorKey {
        field: String,
        key: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Invalid sparse vector value at key '{}' for field '{}': expected finite number",
        key,
        field
    ))]
    SparseVectorValue {
        field: String,
        key: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Invalid varchar for field '{}': length {} exceeds max_length {}",
        field,
        actual,
        max_length
    ))]
    VarcharTooLong {
        field: String,
        max_length: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Invalid array for field '{}': length {} exceeds max_capacity {}",
        field,
        actual,
        max_capacity
    ))]
    ArrayCapacityExceeded {
        field: String,
        max_capacity: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Array field '{}' must specify element_type", field))]
    MissingElementType {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid int64 string format for field '{}': '{}'", field, value))]
    Int64Format {
        field: String,
        value: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Int64 value out of range for field '{}': {}", field, value))]
    Int64OutOfRange {
        field: String,
        value: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Int64 value {} for field '{}' is outside the safe integer range, \
         use the string or bigint strategy for values beyond ±2^53-1",
        value,
        field
    ))]
    UnsafeInt64 {
        field: String,
        value: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid JSON value for field '{}'", field))]
    InvalidJsonValue {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Dynamic field value for key '{}' is not JSON-representable", key))]
    InvalidDynamicValue {
        key: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Dynamic field '{}' must be a JSON object", field))]
    DynamicFieldNotObject {
        field: String,
        #[snafu(implicit)]
        location: Location,
    },

    // Integrity errors, fatal at flush time.
    #[snafu(display(
        "Column length mismatch for '{}': expected {} rows, got {}",
        column,
        expected,
        actual
    ))]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unsupported file type: {:?}", file_type))]
    UnsupportedFileType {
        file_type: BulkFileType,
        #[snafu(implicit)]
        location: Location,
    },

    // I/O errors, propagated out of commit/flush.
    #[snafu(display("Failed to create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to write chunk file {}", path.display()))]
    WriteChunk {
        path: PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read chunk file {}", path.display()))]
    ReadChunk {
        path: PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to remove file {}", path.display()))]
    RemoveFile {
        path: PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to serde Json"))]
    SerdeJson {
        #[snafu(source)]
        error: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    // Object store errors.
    #[snafu(display("Failed to ensure bucket '{}'", bucket))]
    EnsureBucket {
        bucket: String,
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to upload object '{}'", key))]
    PutObject {
        key: String,
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Indicate if the error is a per-row validation error: the writer is
    /// still usable, only the offending row was rejected.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::AutoIdFieldProvided { .. }
                | Self::FunctionOutputFieldProvided { .. }
                | Self::MissingRequiredField { .. }
                | Self::InvalidFieldValue { .. }
                | Self::VectorDimension { .. }
                | Self::VectorByteLength { .. }
                | Self::InvalidBase64 { .. }
                | Self::SparseVectorKey { .. }
                | Self::SparseVectorValue { .. }
                | Self::VarcharTooLong { .. }
                | Self::ArrayCapacityExceeded { .. }
                | Self::MissingElementType { .. }
                | Self::Int64Format { .. }
                | Self::Int64OutOfRange { .. }
                | Self::UnsafeInt64 { .. }
                | Self::InvalidJsonValue { .. }
                | Self::InvalidDynamicValue { .. }
                | Self::DynamicFieldNotObject { .. }
        )
    }
}
