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

//! Collection and field schema definitions for bulk data preparation.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{self, Result};
use crate::value::Value;

/// Logical data types accepted by the bulk writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    VarChar,
    Json,
    Array,
    FloatVector,
    BinaryVector,
    Float16Vector,
    BFloat16Vector,
    Int8Vector,
    SparseFloatVector,
}

impl DataType {
    /// Byte size of a single scalar of this type, used for rough buffer
    /// size estimation. `None` for variable-size types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Int8 => Some(1),
            DataType::Int16 => Some(2),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
            _ => None,
        }
    }

    /// True for the dense and sparse vector kinds.
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            DataType::FloatVector
                | DataType::BinaryVector
                | DataType::Float16Vector
                | DataType::BFloat16Vector
                | DataType::Int8Vector
                | DataType::SparseFloatVector
        )
    }
}

/// Schema of a single collection field.
///
/// `auto_id` (on the primary key) and `is_function_output` are mutually
/// exclusive control flags; either one forbids caller-supplied values.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct FieldSchema {
    /// Field name, unique within the schema
    pub name: String,
    /// Logical data type
    pub data_type: DataType,
    /// Dimensionality, required for dense vector types
    #[builder(default)]
    pub dim: Option<usize>,
    /// Maximum character count for VarChar fields
    #[builder(default)]
    pub max_length: Option<usize>,
    /// Maximum element count for Array fields
    #[builder(default)]
    pub max_capacity: Option<usize>,
    /// Element type for Array fields
    #[builder(default)]
    pub element_type: Option<DataType>,
    /// Whether the field accepts null values
    #[builder(default)]
    pub nullable: bool,
    /// Value applied when the caller omits the field
    #[builder(default)]
    pub default_value: Option<Value>,
    /// Whether this field is the collection's primary key
    #[builder(default)]
    pub is_primary_key: bool,
    /// Whether the primary key is generated server-side
    #[builder(default)]
    pub auto_id: bool,
    /// Whether the value is derived server-side by a function
    #[builder(default)]
    pub is_function_output: bool,
}

impl FieldSchema {
    /// Create a new field schema builder
    pub fn builder() -> FieldSchemaBuilder {
        FieldSchemaBuilder::default()
    }

    /// True when callers must not supply a value for this field.
    pub fn is_server_generated(&self) -> bool {
        (self.is_primary_key && self.auto_id) || self.is_function_output
    }

    /// Declared dimensionality, zero when absent.
    pub fn dim(&self) -> usize {
        self.dim.unwrap_or(0)
    }
}

/// Ordered collection schema with an optional open-ended dynamic field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSchema>,
    pub enable_dynamic_field: bool,
}

impl CollectionSchema {
    /// Create a new empty collection schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition
    pub fn add_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Enable or disable the open-ended dynamic field
    pub fn with_dynamic_field(mut self, enabled: bool) -> Self {
        self.enable_dynamic_field = enabled;
        self
    }

    /// Look up a field schema by name
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate the schema invariants and return the primary key field.
    ///
    /// The field list must be non-empty and contain exactly one primary key.
    pub fn primary_field(&self) -> Result<&FieldSchema> {
        ensure!(!self.fields.is_empty(), error::EmptyFieldListSnafu);

        let mut primaries = self.fields.iter().filter(|f| f.is_primary_key);
        let first = primaries.next();
        let extra: Vec<String> = primaries.map(|f| f.name.clone()).collect();
        ensure!(
            extra.is_empty(),
            error::MultiplePrimaryKeysSnafu {
                fields: {
                    let mut fields = vec![first.map(|f| f.name.clone()).unwrap_or_default()];
                    fields.extend(extra);
                    fields
                },
            }
        );

        first.ok_or_else(|| error::MissingPrimaryKeySnafu.build())
    }
}
