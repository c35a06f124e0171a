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

//! Bulk writer orchestration.
//!
//! A [`BulkWriter`] owns the schema, validates every appended row through
//! the field validators, tracks buffered size, and drives the chunked
//! flush loop against an injected [`ChunkSink`]. At most one asynchronous
//! flush is in flight per writer: the slot is an explicit task handle and a
//! second trigger while it is occupied is dropped, not queued.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::buffer::{Buffer, ValidatedRow};
use crate::error::{self, Result};
use crate::int64::{Int64Engine, Int64Strategy};
use crate::schema::CollectionSchema;
use crate::sink::{ChunkSink, CleanupReport, LocalSink, ObjectStore, RemoteSink};
use crate::validators::validate_field;
use crate::value::{Row, Value};
use crate::{DEFAULT_CHUNK_SIZE, DYNAMIC_FIELD_NAME};

/// File formats understood by the bulk-import service. Only the JSON
/// backend is implemented; the remaining members are accepted at
/// construction and rejected when a flush is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulkFileType {
    Numpy,
    #[default]
    Json,
    Parquet,
    Csv,
}

/// Configuration options for bulk write operations, immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct BulkWriterOptions {
    pub chunk_size: usize,
    pub file_type: BulkFileType,
    pub int64_strategy: Int64Strategy,
    pub cleanup_on_exit: bool,
}

impl Default for BulkWriterOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_type: BulkFileType::default(),
            int64_strategy: Int64Strategy::default(),
            cleanup_on_exit: true,
        }
    }
}

impl BulkWriterOptions {
    /// Set the soft byte cap per output file
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the output file type
    #[must_use]
    pub fn with_file_type(mut self, file_type: BulkFileType) -> Self {
        self.file_type = file_type;
        self
    }

    /// Set the 64-bit integer handling strategy
    #[must_use]
    pub fn with_int64_strategy(mut self, strategy: Int64Strategy) -> Self {
        self.int64_strategy = strategy;
        self
    }

    /// Set whether `cleanup()` removes written artifacts
    #[must_use]
    pub fn with_cleanup_on_exit(mut self, cleanup_on_exit: bool) -> Self {
        self.cleanup_on_exit = cleanup_on_exit;
        self
    }
}

/// Observable writer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Accumulating,
    Flushing,
}

struct FlushState<S> {
    buffer: Buffer,
    sink: S,
    seq: u64,
}

/// Schema-validating, chunking bulk writer composed with a sink.
pub struct BulkWriter<S: ChunkSink + 'static> {
    schema: CollectionSchema,
    chunk_size: usize,
    cleanup_on_exit: bool,
    engine: Int64Engine,
    uuid: Uuid,
    data_path: String,
    state: Arc<Mutex<FlushState<S>>>,
    files: Arc<parking_lot::Mutex<Vec<String>>>,
    flush_task: Option<JoinHandle<()>>,
    buffer_size: usize,
    buffer_rows: usize,
    total_rows: usize,
}

/// Bulk writer that stores chunk files on the local file system.
pub type LocalBulkWriter = BulkWriter<LocalSink>;

/// Bulk writer that uploads chunk files to an object store.
pub type RemoteBulkWriter = BulkWriter<RemoteSink>;

impl BulkWriter<LocalSink> {
    /// Create a writer that confines output beneath a per-instance UUID
    /// subdirectory of `local_path`.
    pub async fn local(
        schema: CollectionSchema,
        local_path: impl Into<PathBuf>,
        options: BulkWriterOptions,
    ) -> Result<Self> {
        let uuid = Uuid::new_v4();
        let sink = LocalSink::new(local_path, uuid);
        sink.make_directories().await?;
        Self::with_sink(schema, sink, uuid, options)
    }
}

impl BulkWriter<RemoteSink> {
    /// Create a writer that uploads chunks under
    /// `<remote_path>/<uuid>/` in the given bucket.
    pub async fn remote(
        schema: CollectionSchema,
        remote_path: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        options: BulkWriterOptions,
    ) -> Result<Self> {
        let uuid = Uuid::new_v4();
        let sink = RemoteSink::new(remote_path, uuid, store, bucket);
        Self::with_sink(schema, sink, uuid, options)
    }
}

impl<S: ChunkSink + 'static> BulkWriter<S> {
    /// Create a writer bound to an already-constructed sink.
    pub fn with_sink(
        schema: CollectionSchema,
        sink: S,
        uuid: Uuid,
        options: BulkWriterOptions,
    ) -> Result<Self> {
        // Exactly one primary key; fatal if violated.
        schema.primary_field()?;
        let buffer = Buffer::new(&schema, options.file_type)?;
        let data_path = sink.data_path();

        Ok(Self {
            schema,
            chunk_size: options.chunk_size,
            cleanup_on_exit: options.cleanup_on_exit,
            engine: Int64Engine::new(options.int64_strategy),
            uuid,
            data_path,
            state: Arc::new(Mutex::new(FlushState {
                buffer,
                sink,
                seq: 0,
            })),
            files: Arc::new(parking_lot::Mutex::new(Vec::new())),
            flush_task: None,
            buffer_size: 0,
            buffer_rows: 0,
            total_rows: 0,
        })
    }

    /// Per-instance unique identifier, also the output subdirectory name.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Location chunk files are written under.
    #[must_use]
    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    /// Locations of every chunk produced so far.
    #[must_use]
    pub fn batch_files(&self) -> Vec<String> {
        self.files.lock().clone()
    }

    /// Estimated bytes buffered since the last flush trigger.
    #[must_use]
    pub fn buffered_size(&self) -> usize {
        self.buffer_size
    }

    /// Rows buffered since the last flush trigger.
    #[must_use]
    pub fn buffered_row_count(&self) -> usize {
        self.buffer_rows
    }

    /// Total rows accepted over the writer's lifetime.
    #[must_use]
    pub fn total_row_count(&self) -> usize {
        self.total_rows
    }

    /// Configured soft byte cap per output file.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Configured 64-bit integer handling strategy.
    #[must_use]
    pub fn int64_strategy(&self) -> Int64Strategy {
        self.engine.strategy()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        if self
            .flush_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            WriterState::Flushing
        } else if self.buffer_rows > 0 {
            WriterState::Accumulating
        } else {
            WriterState::Idle
        }
    }

    /// Validate a row against the schema and append it to the buffer.
    ///
    /// The row is rejected in its entirety on any validation error; no
    /// partial mutation of the buffer occurs. Once the buffered estimate
    /// exceeds the configured chunk size an asynchronous flush is
    /// scheduled (a no-op if one is already in flight).
    pub async fn append_row(&mut self, row: Row) -> Result<()> {
        let (validated, size) = self.validate_row(row)?;

        {
            let mut state = self.state.lock().await;
            state.buffer.append_row(validated);
        }
        self.buffer_size += size;
        self.buffer_rows += 1;
        self.total_rows += 1;

        if self.buffer_size > self.chunk_size {
            self.commit_async();
        }
        Ok(())
    }

    /// Flush whatever remains buffered and wait for completion.
    ///
    /// Always runs to completion, regardless of any in-flight asynchronous
    /// flush (which is awaited first). I/O errors abort the remaining
    /// chunk loop; already-written chunks stay in place.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(task) = self.flush_task.take() {
            if let Err(e) = task.await {
                log::warn!("async flush task failed: {e}");
            }
        }
        flush_chunks(
            Arc::clone(&self.state),
            Arc::clone(&self.files),
            self.chunk_size,
        )
        .await?;
        self.buffer_size = 0;
        self.buffer_rows = 0;
        Ok(())
    }

    /// Fire-and-forget flush. Returns whether a flush was actually
    /// scheduled: the writer keeps a single flush slot, and a trigger
    /// while the slot is occupied is dropped, not queued. Failures are
    /// logged, not returned; call [`BulkWriter::commit`] to surface them.
    pub fn commit_async(&mut self) -> bool {
        if self
            .flush_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return false;
        }
        self.buffer_size = 0;
        self.buffer_rows = 0;

        let state = Arc::clone(&self.state);
        let files = Arc::clone(&self.files);
        let chunk_size = self.chunk_size;
        self.flush_task = Some(tokio::spawn(async move {
            if let Err(e) = flush_chunks(state, files, chunk_size).await {
                log::error!("async flush failed: {e}");
            }
        }));
        true
    }

    /// Best-effort removal of everything this writer produced.
    ///
    /// A no-op unless `force` is set or the writer was configured with
    /// `cleanup_on_exit`. Failures are enumerated in the report and
    /// logged, never returned as errors.
    pub async fn cleanup(&mut self, force: bool) -> CleanupReport {
        if !force && !self.cleanup_on_exit {
            return CleanupReport::default();
        }

        if let Some(task) = self.flush_task.take() {
            if let Err(e) = task.await {
                log::warn!("async flush task failed: {e}");
            }
        }

        let current = self.files.lock().clone();
        let (kept, report) = {
            let mut state = self.state.lock().await;
            state.sink.cleanup(current).await
        };
        *self.files.lock() = kept;

        for failure in &report.failures {
            log::warn!("cleanup failed for {}: {}", failure.target, failure.reason);
        }
        report
    }

    /// Validate every schema field of `row` in declaration order and split
    /// off the dynamic-field overflow entries.
    fn validate_row(&self, mut row: Row) -> Result<(ValidatedRow, usize)> {
        let mut declared = HashMap::with_capacity(self.schema.fields.len());
        let mut row_size = 0usize;

        for field in &self.schema.fields {
            if field.is_primary_key && field.auto_id {
                ensure!(
                    !row.contains(&field.name),
                    error::AutoIdFieldProvidedSnafu {
                        field: field.name.as_str(),
                    }
                );
                continue;
            }
            if field.is_function_output {
                ensure!(
                    !row.contains(&field.name),
                    error::FunctionOutputFieldProvidedSnafu {
                        field: field.name.as_str(),
                    }
                );
                continue;
            }

            // An explicit null counts as absent for default/null handling.
            match row.take(&field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let validated = validate_field(field, value, &self.engine)?;
                    row_size += validated.size;
                    declared.insert(field.name.clone(), validated.value);
                }
                None => {
                    if let Some(default) = &field.default_value {
                        // Deep copy so rows never alias the schema's value.
                        declared.insert(field.name.clone(), default.clone());
                    } else if field.nullable {
                        declared.insert(field.name.clone(), Value::Null);
                    } else {
                        return error::MissingRequiredFieldSnafu {
                            field: field.name.as_str(),
                        }
                        .fail();
                    }
                }
            }
        }

        let mut overflow = serde_json::Map::new();
        for (key, value) in row.into_inner() {
            if key == DYNAMIC_FIELD_NAME {
                // An explicit dynamic-field entry must be an object.
                match value {
                    Value::Json(serde_json::Value::Object(map)) => {
                        if self.schema.enable_dynamic_field {
                            overflow.extend(map);
                        }
                    }
                    _ => {
                        return error::DynamicFieldNotObjectSnafu { field: key }.fail();
                    }
                }
                continue;
            }
            if self.schema.enable_dynamic_field {
                let json = value.into_json_loose().ok_or_else(|| {
                    error::InvalidDynamicValueSnafu { key: key.as_str() }.build()
                })?;
                overflow.insert(key, json);
            }
            // Undeclared keys are dropped when the dynamic field is off.
        }

        Ok((ValidatedRow { declared, overflow }, row_size))
    }
}

/// Drain the buffer into size-bounded chunks, sealing each through the
/// sink. The lock is released between chunks so appends interleave with a
/// long flush. Stops on zero progress to guard against pathological rows.
async fn flush_chunks<S: ChunkSink>(
    state: Arc<Mutex<FlushState<S>>>,
    files: Arc<parking_lot::Mutex<Vec<String>>>,
    chunk_size: usize,
) -> Result<()> {
    loop {
        let mut guard = state.lock().await;
        if guard.buffer.is_empty() {
            return Ok(());
        }

        guard.seq += 1;
        let seq = guard.seq;
        let target = guard.sink.chunk_target(seq);
        let outcome = guard.buffer.persist_partial(&target, chunk_size).await?;
        if outcome.files.is_empty() || outcome.rows_processed == 0 {
            return Ok(());
        }

        let mut sealed = Vec::with_capacity(outcome.files.len());
        for file in &outcome.files {
            sealed.push(guard.sink.seal(file, seq).await?);
        }
        guard.buffer.remove_processed_rows(outcome.rows_processed);
        drop(guard);

        files.lock().extend(sealed);
    }
}
