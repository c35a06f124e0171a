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

//! Client-side bulk data preparation for vector database imports.
//!
//! `vecbulk` validates row-oriented data against a declared collection
//! schema, accumulates it in an in-memory columnar buffer, and emits
//! size-bounded JSON chunk files suitable for a bulk-import job, either
//! beneath a local directory ([`LocalBulkWriter`]) or in an object store
//! ([`RemoteBulkWriter`]).
//!
//! ```no_run
//! use vecbulk::{
//!     BulkWriter, BulkWriterOptions, CollectionSchema, DataType, FieldSchema, Row,
//! };
//!
//! # async fn example() -> vecbulk::Result<()> {
//! let schema = CollectionSchema::new()
//!     .add_field(
//!         FieldSchema::builder()
//!             .name("id")
//!             .data_type(DataType::Int64)
//!             .is_primary_key(true)
//!             .build()
//!             .unwrap(),
//!     )
//!     .add_field(
//!         FieldSchema::builder()
//!             .name("vector")
//!             .data_type(DataType::FloatVector)
//!             .dim(4usize)
//!             .build()
//!             .unwrap(),
//!     );
//!
//! let mut writer = BulkWriter::local(schema, "/tmp/data", BulkWriterOptions::default()).await?;
//! writer
//!     .append_row(Row::new().set("id", 1i64).set("vector", vec![0.1f32, 0.2, 0.3, 0.4]))
//!     .await?;
//! writer.commit().await?;
//! println!("{:?}", writer.batch_files());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod error;
pub mod int64;
pub mod schema;
pub mod sink;
pub mod validators;
pub mod value;
pub mod writer;

pub use buffer::{Buffer, PersistOutcome, ValidatedRow};
pub use error::{BoxedError, Error, Result};
pub use int64::{Int64Engine, Int64Input, Int64Repr, Int64Strategy};
pub use schema::{CollectionSchema, DataType, FieldSchema, FieldSchemaBuilder};
pub use sink::{ChunkSink, CleanupFailure, CleanupReport, LocalSink, ObjectStore, RemoteSink};
pub use validators::{validate_field, Validated};
pub use value::{Row, Value, WideInt};
pub use writer::{
    BulkFileType, BulkWriter, BulkWriterOptions, LocalBulkWriter, RemoteBulkWriter, WriterState,
};

/// Size helpers
pub const KB: usize = 1024;
pub const MB: usize = KB * 1024;
pub const GB: usize = MB * 1024;

/// Default soft cap per output chunk file.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * MB;

/// Name of the overflow column collecting caller-supplied keys absent from
/// the declared schema, aligned with the server's dynamic-field format.
pub const DYNAMIC_FIELD_NAME: &str = "$meta";
