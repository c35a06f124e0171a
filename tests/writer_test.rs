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

// End-to-end tests for the local and remote bulk writers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use vecbulk::{
    BoxedError, BulkFileType, BulkWriter, BulkWriterOptions, CollectionSchema, DataType, Error,
    FieldSchema, Int64Strategy, ObjectStore, Row, WideInt, DYNAMIC_FIELD_NAME,
};

fn int64_pk() -> FieldSchema {
    FieldSchema::builder()
        .name("id")
        .data_type(DataType::Int64)
        .is_primary_key(true)
        .build()
        .unwrap()
}

fn basic_schema() -> CollectionSchema {
    CollectionSchema::new().add_field(int64_pk()).add_field(
        FieldSchema::builder()
            .name("label")
            .data_type(DataType::VarChar)
            .max_length(64usize)
            .build()
            .unwrap(),
    )
}

fn chunk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort_by_key(|p| {
        p.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(u64::MAX)
    });
    files
}

fn read_rows(path: &Path) -> Vec<serde_json::Value> {
    let text = std::fs::read_to_string(path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    doc["rows"].as_array().unwrap().clone()
}

#[tokio::test]
async fn test_local_commit_writes_rows_document() {
    let dir = tempfile::tempdir().unwrap();
    let schema = basic_schema().add_field(
        FieldSchema::builder()
            .name("vector")
            .data_type(DataType::FloatVector)
            .dim(4usize)
            .build()
            .unwrap(),
    );
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    for i in 0..5i64 {
        writer
            .append_row(
                Row::new()
                    .set("id", i)
                    .set("label", format!("row-{i}"))
                    .set("vector", vec![0.1f32, 0.2, 0.3, 0.4]),
            )
            .await
            .unwrap();
    }
    writer.commit().await.unwrap();

    let files = writer.batch_files();
    assert_eq!(files.len(), 1);
    let rows = read_rows(Path::new(&files[0]));
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["label"], serde_json::json!("row-0"));
    // Float vectors stay numeric arrays.
    assert!(rows[0]["vector"].is_array());
    assert_eq!(rows[0]["vector"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_int64_emitted_as_bare_literal() {
    let dir = tempfile::tempdir().unwrap();
    let schema = CollectionSchema::new().add_field(int64_pk()).add_field(
        FieldSchema::builder()
            .name("value")
            .data_type(DataType::Int64)
            .build()
            .unwrap(),
    );
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    writer
        .append_row(
            Row::new()
                .set("id", 1i64)
                .set("value", 9223372036854775807i128),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let files = writer.batch_files();
    let text = std::fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains("9223372036854775807"));
    assert!(!text.contains("\"9223372036854775807\""));
    assert!(!text.contains("__int64__"));

    let rows = read_rows(Path::new(&files[0]));
    assert_eq!(rows[0]["value"], serde_json::json!(9223372036854775807i64));
}

#[tokio::test]
async fn test_int64_input_shapes_agree() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = BulkWriter::local(
        CollectionSchema::new().add_field(int64_pk()),
        dir.path(),
        BulkWriterOptions::default(),
    )
    .await
    .unwrap();

    writer
        .append_row(Row::new().set("id", -1234567890123456789i64))
        .await
        .unwrap();
    writer
        .append_row(Row::new().set("id", "-1234567890123456789"))
        .await
        .unwrap();
    writer
        .append_row(Row::new().set("id", -1234567890123456789i128))
        .await
        .unwrap();
    let bits = (-1234567890123456789i64) as u64;
    writer
        .append_row(Row::new().set(
            "id",
            WideInt::new((bits & 0xFFFF_FFFF) as u32, (bits >> 32) as u32, false),
        ))
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let rows = read_rows(Path::new(&writer.batch_files()[0]));
    for row in rows {
        assert_eq!(row["id"], serde_json::json!(-1234567890123456789i64));
    }
}

#[tokio::test]
async fn test_number_strategy_rejects_unsafe_integers() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_int64_strategy(Int64Strategy::Number);
    let mut writer = BulkWriter::local(
        CollectionSchema::new().add_field(int64_pk()),
        dir.path(),
        options,
    )
    .await
    .unwrap();

    assert_eq!(writer.int64_strategy(), Int64Strategy::Number);

    let unsafe_value = 9007199254740992i64; // 2^53
    let result = writer.append_row(Row::new().set("id", unsafe_value)).await;
    match result {
        Err(e @ Error::UnsafeInt64 { .. }) => assert!(e.is_validation()),
        other => panic!("expected UnsafeInt64, got {other:?}"),
    }
    assert_eq!(writer.total_row_count(), 0);

    // The same value is widened under the default auto strategy.
    let mut auto = BulkWriter::local(
        CollectionSchema::new().add_field(int64_pk()),
        dir.path(),
        BulkWriterOptions::default(),
    )
    .await
    .unwrap();
    auto.append_row(Row::new().set("id", unsafe_value))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_binary_vector_bit_array_round_trip() {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    let dir = tempfile::tempdir().unwrap();
    let schema = CollectionSchema::new().add_field(int64_pk()).add_field(
        FieldSchema::builder()
            .name("binary_vector")
            .data_type(DataType::BinaryVector)
            .dim(8usize)
            .build()
            .unwrap(),
    );
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    writer
        .append_row(
            Row::new()
                .set("id", 1i64)
                .set("binary_vector", vec![1i64, 0, 1, 0, 1, 0, 1, 0]),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let rows = read_rows(Path::new(&writer.batch_files()[0]));
    let encoded = rows[0]["binary_vector"].as_str().unwrap();
    assert_eq!(BASE64_STANDARD.decode(encoded).unwrap(), vec![170u8]);
}

#[tokio::test]
async fn test_packed_vectors_serialize_to_base64() {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    let dir = tempfile::tempdir().unwrap();
    let schema = CollectionSchema::new()
        .add_field(int64_pk())
        .add_field(
            FieldSchema::builder()
                .name("half")
                .data_type(DataType::Float16Vector)
                .dim(3usize)
                .build()
                .unwrap(),
        )
        .add_field(
            FieldSchema::builder()
                .name("bytes")
                .data_type(DataType::Int8Vector)
                .dim(2usize)
                .build()
                .unwrap(),
        )
        .add_field(
            FieldSchema::builder()
                .name("sparse")
                .data_type(DataType::SparseFloatVector)
                .build()
                .unwrap(),
        );
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    let mut sparse = BTreeMap::new();
    sparse.insert(3u32, 0.5f32);
    sparse.insert(17u32, 1.25f32);
    writer
        .append_row(
            Row::new()
                .set("id", 1i64)
                .set("half", vec![1.0f32, 2.0, 3.0])
                .set("bytes", vec![-1i8, 127])
                .set("sparse", sparse),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let rows = read_rows(Path::new(&writer.batch_files()[0]));
    let half = BASE64_STANDARD
        .decode(rows[0]["half"].as_str().unwrap())
        .unwrap();
    assert_eq!(half.len(), 6);
    let bytes = BASE64_STANDARD
        .decode(rows[0]["bytes"].as_str().unwrap())
        .unwrap();
    assert_eq!(bytes, vec![0xFFu8, 0x7F]);
    assert_eq!(rows[0]["sparse"], serde_json::json!({"3": 0.5, "17": 1.25}));
}

#[tokio::test]
async fn test_chunk_size_one_byte_isolates_rows() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_chunk_size(1);
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), options)
        .await
        .unwrap();

    // Appends trigger async flushes; await the writer to settle via commit.
    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    writer
        .append_row(Row::new().set("id", 2i64).set("label", "b"))
        .await
        .unwrap();
    writer.commit().await.unwrap();

    // No chunk can hold more than one row under the minimum-progress rule.
    let files = chunk_files(Path::new(writer.data_path()));
    assert_eq!(files.len(), 2);
    let mut ids = Vec::new();
    for file in &files {
        let rows = read_rows(file);
        assert_eq!(rows.len(), 1);
        ids.push(rows[0]["id"].as_i64().unwrap());
    }
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_chunked_flush_preserves_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_chunk_size(200);
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), options)
        .await
        .unwrap();

    for i in 0..12i64 {
        writer
            .append_row(Row::new().set("id", i).set("label", format!("label-{i:03}")))
            .await
            .unwrap();
    }
    writer.commit().await.unwrap();

    let files = chunk_files(Path::new(writer.data_path()));
    assert!(files.len() > 1, "expected multiple chunks");

    let mut ids = Vec::new();
    for file in &files {
        let rows = read_rows(file);
        assert!(!rows.is_empty());
        assert!(rows.len() < 12, "no chunk may hold everything");
        ids.extend(rows.iter().map(|r| r["id"].as_i64().unwrap()));
    }
    assert_eq!(ids, (0..12).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_auto_flush_on_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_chunk_size(256);
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), options)
        .await
        .unwrap();

    for i in 0..50i64 {
        writer
            .append_row(Row::new().set("id", i).set("label", "x".repeat(20)))
            .await
            .unwrap();
    }
    // Some rows were flushed in the background; commit drains the rest.
    writer.commit().await.unwrap();

    let total: usize = chunk_files(Path::new(writer.data_path()))
        .iter()
        .map(|f| read_rows(f).len())
        .sum();
    assert_eq!(total, 50);
    assert_eq!(writer.total_row_count(), 50);
}

#[tokio::test]
async fn test_commit_async_reports_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();
    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();

    assert!(writer.commit_async());
    writer.commit().await.unwrap();
    assert_eq!(writer.batch_files().len(), 1);
}

#[tokio::test]
async fn test_nullable_and_default_values_in_output() {
    let dir = tempfile::tempdir().unwrap();
    let schema = CollectionSchema::new()
        .add_field(int64_pk())
        .add_field(
            FieldSchema::builder()
                .name("score")
                .data_type(DataType::Double)
                .nullable(true)
                .build()
                .unwrap(),
        )
        .add_field(
            FieldSchema::builder()
                .name("tag")
                .data_type(DataType::VarChar)
                .max_length(16usize)
                .default_value(Some(vecbulk::Value::String("none".to_string())))
                .build()
                .unwrap(),
        );
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    writer.append_row(Row::new().set("id", 1i64)).await.unwrap();
    writer.commit().await.unwrap();

    let rows = read_rows(Path::new(&writer.batch_files()[0]));
    assert_eq!(rows[0]["score"], serde_json::Value::Null);
    assert_eq!(rows[0]["tag"], serde_json::json!("none"));
}

#[tokio::test]
async fn test_dynamic_field_written_under_meta() {
    let dir = tempfile::tempdir().unwrap();
    let schema = basic_schema().with_dynamic_field(true);
    let mut writer = BulkWriter::local(schema, dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    writer
        .append_row(
            Row::new()
                .set("id", 1i64)
                .set("label", "a")
                .set("extra", 42i64)
                .set(DYNAMIC_FIELD_NAME, serde_json::json!({"source": "test"})),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let rows = read_rows(Path::new(&writer.batch_files()[0]));
    assert_eq!(rows[0][DYNAMIC_FIELD_NAME]["extra"], serde_json::json!(42));
    assert_eq!(
        rows[0][DYNAMIC_FIELD_NAME]["source"],
        serde_json::json!("test")
    );
}

#[tokio::test]
async fn test_rejected_row_leaves_buffer_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    let result = writer
        .append_row(Row::new().set("id", 1i64).set("label", "x".repeat(100)))
        .await;
    assert!(matches!(result, Err(Error::VarcharTooLong { .. })));
    assert_eq!(writer.buffered_row_count(), 0);
    assert_eq!(writer.total_row_count(), 0);

    writer.commit().await.unwrap();
    assert!(writer.batch_files().is_empty());
}

#[tokio::test]
async fn test_non_json_file_type_rejected_at_commit() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_file_type(BulkFileType::Parquet);
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), options)
        .await
        .unwrap();

    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    assert!(matches!(
        writer.commit().await,
        Err(Error::UnsupportedFileType { .. })
    ));
}

#[tokio::test]
async fn test_local_cleanup_moves_files_and_removes_uuid_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), BulkWriterOptions::default())
        .await
        .unwrap();

    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let uuid_dir = PathBuf::from(writer.data_path());
    assert!(uuid_dir.exists());

    let report = writer.cleanup(false).await;
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(!report.removed.is_empty());
    assert!(!uuid_dir.exists());

    // Written files survived, one level up.
    let moved = chunk_files(dir.path());
    assert_eq!(moved.len(), 1);
    assert_eq!(read_rows(&moved[0]).len(), 1);
    assert_eq!(writer.batch_files(), vec![moved[0].display().to_string()]);
}

#[tokio::test]
async fn test_cleanup_noop_unless_configured_or_forced() {
    let dir = tempfile::tempdir().unwrap();
    let options = BulkWriterOptions::default().with_cleanup_on_exit(false);
    let mut writer = BulkWriter::local(basic_schema(), dir.path(), options)
        .await
        .unwrap();

    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let uuid_dir = PathBuf::from(writer.data_path());
    writer.cleanup(false).await;
    assert!(uuid_dir.exists());

    let report = writer.cleanup(true).await;
    assert!(report.is_clean());
    assert!(!uuid_dir.exists());
}

// In-memory object store standing in for S3/MinIO in tests.
#[derive(Default)]
struct MemoryObjectStore {
    buckets: parking_lot::Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.lock().get(bucket)?.get(key).cloned()
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn bucket_exists<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, Result<bool, BoxedError>> {
        Box::pin(async move { Ok(self.buckets.lock().contains_key(bucket)) })
    }

    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, Result<(), BoxedError>> {
        Box::pin(async move {
            self.buckets.lock().insert(bucket.to_string(), BTreeMap::new());
            Ok(())
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BoxedError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.lock();
            let bucket = buckets
                .get_mut(bucket)
                .ok_or_else(|| -> BoxedError { format!("no such bucket: {bucket}").into() })?;
            bucket.insert(key.to_string(), body);
            Ok(())
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, BoxedError>> {
        Box::pin(async move {
            Ok(self
                .keys(bucket)
                .into_iter()
                .filter(|k| k.starts_with(prefix))
                .collect())
        })
    }

    fn delete_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), BoxedError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.lock();
            let bucket = buckets
                .get_mut(bucket)
                .ok_or_else(|| -> BoxedError { format!("no such bucket: {bucket}").into() })?;
            bucket
                .remove(key)
                .ok_or_else(|| -> BoxedError { format!("no such key: {key}").into() })?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_remote_writer_uploads_chunks() {
    let store = Arc::new(MemoryObjectStore::default());
    let mut writer = BulkWriter::remote(
        basic_schema(),
        "imports/daily",
        store.clone(),
        "bulk-data",
        BulkWriterOptions::default(),
    )
    .await
    .unwrap();

    for i in 0..3i64 {
        writer
            .append_row(Row::new().set("id", i).set("label", "remote"))
            .await
            .unwrap();
    }
    writer.commit().await.unwrap();

    // The bucket was created on demand and holds the numbered chunk.
    let key = format!("imports/daily/{}/1.json", writer.uuid());
    let body = store.object("bulk-data", &key).expect("uploaded object");
    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["rows"].as_array().unwrap().len(), 3);

    assert_eq!(writer.batch_files(), vec![format!("bulk-data/{key}")]);

    // The staged temp file was deleted after the upload.
    let staging = std::env::temp_dir().join(format!("vecbulk-{}", writer.uuid()));
    assert!(!staging.exists() || chunk_files(&staging).is_empty());
}

#[tokio::test]
async fn test_remote_cleanup_deletes_uuid_prefix() {
    let store = Arc::new(MemoryObjectStore::default());
    let options = BulkWriterOptions::default().with_chunk_size(1);
    let mut writer = BulkWriter::remote(
        basic_schema(),
        "imports/daily",
        store.clone(),
        "bulk-data",
        options,
    )
    .await
    .unwrap();

    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    writer
        .append_row(Row::new().set("id", 2i64).set("label", "b"))
        .await
        .unwrap();
    writer.commit().await.unwrap();
    assert_eq!(store.keys("bulk-data").len(), 2);

    let report = writer.cleanup(true).await;
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(store.keys("bulk-data").is_empty());
    assert!(writer.batch_files().is_empty());
}

#[tokio::test]
async fn test_remote_upload_failure_aborts_flush() {
    // A store with no create_bucket support forces seal to fail.
    struct ReadOnlyStore;
    impl ObjectStore for ReadOnlyStore {
        fn bucket_exists<'a>(
            &'a self,
            _bucket: &'a str,
        ) -> BoxFuture<'a, Result<bool, BoxedError>> {
            Box::pin(async { Ok(true) })
        }
        fn create_bucket<'a>(&'a self, _b: &'a str) -> BoxFuture<'a, Result<(), BoxedError>> {
            Box::pin(async { Ok(()) })
        }
        fn put_object<'a>(
            &'a self,
            _bucket: &'a str,
            _key: &'a str,
            _body: Vec<u8>,
        ) -> BoxFuture<'a, Result<(), BoxedError>> {
            Box::pin(async { Err("permission denied".into()) })
        }
        fn list_objects<'a>(
            &'a self,
            _bucket: &'a str,
            _prefix: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, BoxedError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn delete_object<'a>(
            &'a self,
            _bucket: &'a str,
            _key: &'a str,
        ) -> BoxFuture<'a, Result<(), BoxedError>> {
            Box::pin(async { Ok(()) })
        }
    }

    let mut writer = BulkWriter::remote(
        basic_schema(),
        "imports",
        Arc::new(ReadOnlyStore),
        "bulk-data",
        BulkWriterOptions::default(),
    )
    .await
    .unwrap();

    writer
        .append_row(Row::new().set("id", 1i64).set("label", "a"))
        .await
        .unwrap();
    assert!(matches!(
        writer.commit().await,
        Err(Error::PutObject { .. })
    ));
    assert!(writer.batch_files().is_empty());
}
