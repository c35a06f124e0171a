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

//! Chunk sinks: where produced chunk files end up.
//!
//! The writer is composed with an injected [`ChunkSink`] instead of
//! subclassing: [`LocalSink`] keeps chunks beneath a per-writer UUID
//! directory, [`RemoteSink`] stages them locally and uploads each one to an
//! object store. Object-storage mechanics beyond "write bytes to a named
//! object" live behind the [`ObjectStore`] collaborator trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use snafu::ResultExt;
use uuid::Uuid;

use crate::error::{self, BoxedError, Result};

/// External object-store collaborator: just enough surface to write bytes
/// to a named object, enumerate them, and delete them.
pub trait ObjectStore: Send + Sync {
    fn bucket_exists<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, std::result::Result<bool, BoxedError>>;

    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), BoxedError>>;

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, std::result::Result<(), BoxedError>>;

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Vec<String>, BoxedError>>;

    fn delete_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), BoxedError>>;
}

/// One artifact the cleanup pass failed to remove or relocate.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub target: String,
    pub reason: String,
}

/// Outcome of a best-effort cleanup pass.
///
/// Cleanup never fails the writer; callers inspect the report and decide
/// whether partial failure matters to them.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Artifacts removed (or relocated, for local chunk files)
    pub removed: Vec<String>,
    /// Artifacts that could not be cleaned, with reasons
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, target: impl ToString, reason: impl ToString) {
        self.failures.push(CleanupFailure {
            target: target.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Destination for produced chunk files.
pub trait ChunkSink: Send {
    /// Human-readable location data is written under.
    fn data_path(&self) -> String;

    /// Path the buffer should write chunk number `seq` to.
    fn chunk_target(&self, seq: u64) -> PathBuf;

    /// Finalize a written chunk file and return its recorded location.
    fn seal<'a>(&'a mut self, file: &'a Path, seq: u64) -> BoxFuture<'a, Result<String>>;

    /// Best-effort removal of everything this writer produced. Receives
    /// the writer's recorded locations and returns the updated list
    /// alongside the report.
    fn cleanup(&mut self, files: Vec<String>) -> BoxFuture<'_, (Vec<String>, CleanupReport)>;
}

/// Sink that confines output beneath `<root>/<uuid>/`.
pub struct LocalSink {
    root: PathBuf,
    dir: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>, uuid: Uuid) -> Self {
        let root = root.into();
        let dir = root.join(uuid.to_string());
        Self { root, dir }
    }

    pub(crate) async fn make_directories(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context(error::CreateDirSnafu { path: &self.dir })
    }
}

impl ChunkSink for LocalSink {
    fn data_path(&self) -> String {
        self.dir.display().to_string()
    }

    fn chunk_target(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{seq}.json"))
    }

    fn seal<'a>(&'a mut self, file: &'a Path, _seq: u64) -> BoxFuture<'a, Result<String>> {
        // Chunks are written in place; nothing to finalize.
        Box::pin(async move { Ok(file.display().to_string()) })
    }

    fn cleanup(&mut self, files: Vec<String>) -> BoxFuture<'_, (Vec<String>, CleanupReport)> {
        Box::pin(async move {
            let mut report = CleanupReport::default();
            let mut kept = Vec::with_capacity(files.len());

            // Move written chunks up one level so they survive removal of
            // the UUID directory.
            for file in files {
                let path = PathBuf::from(&file);
                if path.parent() != Some(self.dir.as_path()) {
                    kept.push(file);
                    continue;
                }
                let Some(name) = path.file_name() else {
                    kept.push(file);
                    continue;
                };
                let destination = self.root.join(name);
                match tokio::fs::rename(&path, &destination).await {
                    Ok(()) => {
                        report.removed.push(file);
                        kept.push(destination.display().to_string());
                    }
                    Err(e) => {
                        report.fail(&file, e);
                        kept.push(file);
                    }
                }
            }

            if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    report.fail(self.dir.display().to_string(), e);
                }
            } else {
                report.removed.push(self.dir.display().to_string());
            }

            (kept, report)
        })
    }
}

/// Sink that stages chunks locally and uploads each to
/// `<remote_path>/<uuid>/<seq>.json` in an object store.
pub struct RemoteSink {
    remote_path: String,
    uuid: Uuid,
    staging: PathBuf,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    bucket_checked: bool,
}

impl RemoteSink {
    pub fn new(
        remote_path: impl Into<String>,
        uuid: Uuid,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        let staging = std::env::temp_dir().join(format!("vecbulk-{uuid}"));
        Self {
            remote_path: remote_path.into(),
            uuid,
            staging,
            store,
            bucket: bucket.into(),
            bucket_checked: false,
        }
    }

    fn prefix(&self) -> String {
        format!("{}/{}/", self.remote_path, self.uuid)
    }

    fn object_key(&self, seq: u64) -> String {
        format!("{}{seq}.json", self.prefix())
    }

    async fn ensure_bucket(&mut self) -> Result<()> {
        if self.bucket_checked {
            return Ok(());
        }
        let exists = self
            .store
            .bucket_exists(&self.bucket)
            .await
            .context(error::EnsureBucketSnafu {
                bucket: self.bucket.as_str(),
            })?;
        if !exists {
            self.store
                .create_bucket(&self.bucket)
                .await
                .context(error::EnsureBucketSnafu {
                    bucket: self.bucket.as_str(),
                })?;
        }
        self.bucket_checked = true;
        Ok(())
    }
}

impl ChunkSink for RemoteSink {
    fn data_path(&self) -> String {
        self.remote_path.clone()
    }

    fn chunk_target(&self, seq: u64) -> PathBuf {
        self.staging.join(format!("{seq}.json"))
    }

    fn seal<'a>(&'a mut self, file: &'a Path, seq: u64) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.ensure_bucket().await?;

            let body = tokio::fs::read(file)
                .await
                .context(error::ReadChunkSnafu { path: file })?;
            let key = self.object_key(seq);
            self.store
                .put_object(&self.bucket, &key, body)
                .await
                .context(error::PutObjectSnafu { key: key.as_str() })?;

            // The staged copy is only needed until the upload lands.
            tokio::fs::remove_file(file)
                .await
                .context(error::RemoveFileSnafu { path: file })?;

            Ok(format!("{}/{}", self.bucket, key))
        })
    }

    fn cleanup(&mut self, files: Vec<String>) -> BoxFuture<'_, (Vec<String>, CleanupReport)> {
        Box::pin(async move {
            let mut report = CleanupReport::default();
            let prefix = self.prefix();

            let keys = match self.store.list_objects(&self.bucket, &prefix).await {
                Ok(keys) => keys,
                Err(e) => {
                    report.fail(&prefix, e);
                    return (files, report);
                }
            };

            let deletions = join_all(
                keys.iter()
                    .map(|key| self.store.delete_object(&self.bucket, key)),
            )
            .await;

            let mut deleted: Vec<String> = Vec::with_capacity(keys.len());
            for (key, result) in keys.into_iter().zip(deletions) {
                match result {
                    Ok(()) => {
                        report.removed.push(format!("{}/{}", self.bucket, key));
                        deleted.push(format!("{}/{}", self.bucket, key));
                    }
                    Err(e) => report.fail(format!("{}/{}", self.bucket, key), e),
                }
            }

            // The staging directory is transient; ignore a missing one.
            if let Err(e) = tokio::fs::remove_dir_all(&self.staging).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    report.fail(self.staging.display().to_string(), e);
                }
            }

            let kept = files
                .into_iter()
                .filter(|f| !deleted.contains(f))
                .collect();
            (kept, report)
        })
    }
}
