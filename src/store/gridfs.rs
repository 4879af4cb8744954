//! src/store/gridfs.rs
//!
//! Chunked binary files over two ordinary collections.
//!
//! A bucket `b` is `b.files` (one metadata document per file) plus `b.chunks`
//! (base64 payload fragments keyed by `files_id` and `n`). Nothing else marks
//! a bucket; discovery reconstructs buckets from the sibling names.

use super::{IndexedField, Store, StoreError, StoreResult, query::FindOptions};
use crate::models::{
    document::Document,
    file::{ChunkRecord, FileInfo},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::io;
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix of the sibling collection holding file metadata.
pub const FILES_SUFFIX: &str = ".files";
/// Suffix of the sibling collection holding payload chunks.
pub const CHUNKS_SUFFIX: &str = ".chunks";

/// Payload bytes per chunk (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Handle on one bucket of one database. Constructing it touches nothing.
#[derive(Clone)]
pub struct GridFs {
    store: Store,
    database: String,
    bucket: String,
    chunk_size: usize,
}

impl GridFs {
    pub fn new(store: Store, database: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
            bucket: bucket.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn files_collection(&self) -> String {
        format!("{}{}", self.bucket, FILES_SUFFIX)
    }

    pub fn chunks_collection(&self) -> String {
        format!("{}{}", self.bucket, CHUNKS_SUFFIX)
    }

    /// Create whichever sibling collections are missing.
    pub async fn ensure_bucket(&self) -> StoreResult<()> {
        for collection in [self.files_collection(), self.chunks_collection()] {
            match self
                .store
                .create_collection(&self.database, &collection, false)
                .await
            {
                Ok(()) | Err(StoreError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Stream a new file into the bucket.
    ///
    /// - Chunks are written as the stream fills them, then the metadata
    ///   document is written last, so a file is never visible half-written.
    /// - On a stream or store error the chunks written so far are removed
    ///   best-effort before the error is returned.
    ///
    /// Name uniqueness is not checked here.
    pub async fn create_file<S>(
        &self,
        filename: &str,
        content_type: &str,
        stream: S,
    ) -> StoreResult<FileInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_bucket().await?;

        let id = Uuid::new_v4().simple().to_string();
        let mut pending: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut length: i64 = 0;
        let mut n: i64 = 0;
        let mut digest = Context::new();

        pin_mut!(stream);
        while let Some(piece) = stream.next().await {
            let piece = match piece {
                Ok(piece) => piece,
                Err(err) => {
                    self.discard_chunks(&id).await;
                    return Err(StoreError::Io(err));
                }
            };
            length += piece.len() as i64;
            digest.consume(&piece);
            pending.extend_from_slice(&piece);

            while pending.len() >= self.chunk_size {
                let rest = pending.split_off(self.chunk_size);
                let full = std::mem::replace(&mut pending, rest);
                if let Err(err) = self.write_chunk(&id, n, &full).await {
                    self.discard_chunks(&id).await;
                    return Err(err);
                }
                n += 1;
            }
        }
        if !pending.is_empty() {
            if let Err(err) = self.write_chunk(&id, n, &pending).await {
                self.discard_chunks(&id).await;
                return Err(err);
            }
        }

        let info = FileInfo {
            id: id.clone(),
            filename: filename.to_string(),
            length,
            chunk_size: self.chunk_size as i64,
            upload_date: Utc::now(),
            md5: format!("{:x}", digest.compute()),
            content_type: content_type.to_string(),
        };

        if let Err(err) = self
            .store
            .insert_document(&self.database, &self.files_collection(), to_document(&info)?)
            .await
        {
            self.discard_chunks(&id).await;
            return Err(err);
        }

        debug!(
            database = %self.database,
            bucket = %self.bucket,
            filename,
            length,
            "stored file"
        );
        Ok(info)
    }

    /// First file with this name in natural order, if any.
    pub async fn find_one(&self, filename: &str) -> StoreResult<Option<FileInfo>> {
        let mut found = self
            .store
            .find_by_field(
                &self.database,
                &self.files_collection(),
                IndexedField::Filename,
                filename,
                1,
            )
            .await?;
        found.pop().map(from_document).transpose()
    }

    pub async fn list_files(&self) -> StoreResult<Vec<FileInfo>> {
        self.store
            .find(&self.database, &self.files_collection(), &FindOptions::default())
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Reassemble a file's payload in memory, checking it against the
    /// recorded length and md5. Only this file's chunks are read.
    pub async fn read_all(&self, info: &FileInfo) -> StoreResult<Vec<u8>> {
        let mut chunks = self
            .store
            .find_by_field(
                &self.database,
                &self.chunks_collection(),
                IndexedField::FilesId,
                &info.id,
                0,
            )
            .await?
            .into_iter()
            .map(from_document::<ChunkRecord>)
            .collect::<StoreResult<Vec<_>>>()?;
        chunks.sort_by_key(|chunk| chunk.n);

        let mut bytes = Vec::with_capacity(info.length.max(0) as usize);
        for (expected, chunk) in chunks.into_iter().enumerate() {
            if chunk.n != expected as i64 {
                return Err(StoreError::Corrupt(format!(
                    "file {} is missing chunk {}",
                    info.id, expected
                )));
            }
            let data = general_purpose::STANDARD
                .decode(chunk.data.as_bytes())
                .map_err(|err| {
                    StoreError::Corrupt(format!("chunk {} of file {}: {}", chunk.n, info.id, err))
                })?;
            bytes.extend_from_slice(&data);
        }

        if bytes.len() as i64 != info.length {
            return Err(StoreError::Corrupt(format!(
                "file {} has {} bytes, expected {}",
                info.id,
                bytes.len(),
                info.length
            )));
        }
        if format!("{:x}", md5::compute(&bytes)) != info.md5 {
            return Err(StoreError::Corrupt(format!("file {} fails its md5 check", info.id)));
        }

        Ok(bytes)
    }

    /// Remove the metadata document, then the chunks. If the second step
    /// fails the file is already unreachable and its chunks are orphaned.
    pub async fn remove(&self, info: &FileInfo) -> StoreResult<()> {
        self.store
            .delete_by_id(&self.database, &self.files_collection(), &info.id)
            .await?;
        self.store
            .delete_by_field(
                &self.database,
                &self.chunks_collection(),
                IndexedField::FilesId,
                &info.id,
            )
            .await?;
        Ok(())
    }

    async fn write_chunk(&self, files_id: &str, n: i64, data: &[u8]) -> StoreResult<()> {
        let chunk = ChunkRecord {
            id: Uuid::new_v4().simple().to_string(),
            files_id: files_id.to_string(),
            n,
            data: general_purpose::STANDARD.encode(data),
        };
        self.store
            .insert_document(&self.database, &self.chunks_collection(), to_document(&chunk)?)
            .await?;
        Ok(())
    }

    async fn discard_chunks(&self, files_id: &str) {
        if let Err(err) = self
            .store
            .delete_by_field(
                &self.database,
                &self.chunks_collection(),
                IndexedField::FilesId,
                files_id,
            )
            .await
        {
            warn!(
                database = %self.database,
                bucket = %self.bucket,
                files_id,
                "failed to discard chunks of an aborted upload: {}",
                err
            );
        }
    }
}

fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Corrupt(format!("expected an object, got {}", other))),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::memory_store;
    use futures::stream;

    fn pieces(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        let items: Vec<io::Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn round_trips_across_chunk_boundaries() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "photos").with_chunk_size(4);

        let info = fs
            .create_file("a.txt", "text/plain", pieces(&[b"hello ", b"wor", b"ld"]))
            .await
            .unwrap();
        assert_eq!(info.length, 11);
        assert_eq!(info.chunk_size, 4);
        assert_eq!(info.md5, format!("{:x}", md5::compute(b"hello world")));

        let chunks = store
            .find("d", "photos.chunks", &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);

        let bytes = fs.read_all(&info).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn empty_file_still_creates_both_siblings() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "b");

        let info = fs.create_file("empty", "application/octet-stream", pieces(&[])).await.unwrap();
        assert_eq!(info.length, 0);
        assert_eq!(
            store.list_collection_names("d").await.unwrap(),
            vec!["b.chunks", "b.files"]
        );
        assert!(fs.read_all(&info).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_one_returns_first_match() {
        let store = memory_store().await;
        let fs = GridFs::new(store, "d", "b");

        let first = fs.create_file("same", "text/plain", pieces(&[b"one"])).await.unwrap();
        fs.create_file("same", "text/plain", pieces(&[b"two"])).await.unwrap();

        let found = fs.find_one("same").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(fs.find_one("other").await.unwrap().is_none());
        assert_eq!(fs.list_files().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remove_drops_metadata_and_chunks() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "b").with_chunk_size(2);
        let keep = fs.create_file("keep", "text/plain", pieces(&[b"abcd"])).await.unwrap();
        let gone = fs.create_file("gone", "text/plain", pieces(&[b"wxyz"])).await.unwrap();

        fs.remove(&gone).await.unwrap();

        assert!(fs.find_one("gone").await.unwrap().is_none());
        let chunks = store.find("d", "b.chunks", &FindOptions::default()).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c["files_id"] == Value::String(keep.id.clone())));
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_chunks() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "b").with_chunk_size(2);
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away")),
        ];

        let result = fs.create_file("broken", "text/plain", stream::iter(items)).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.find("d", "b.chunks", &FindOptions::default()).await.unwrap().is_empty());
        assert!(fs.find_one("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_all_detects_missing_chunks() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "b").with_chunk_size(2);
        let info = fs.create_file("f", "text/plain", pieces(&[b"abcdef"])).await.unwrap();

        sqlx::query(
            "DELETE FROM documents WHERE collection = 'b.chunks' AND json_extract(body, '$.n') = 1",
        )
        .execute(&*store.db)
        .await
        .unwrap();

        assert!(matches!(fs.read_all(&info).await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn read_all_ignores_other_files_chunks() {
        let store = memory_store().await;
        let fs = GridFs::new(store.clone(), "d", "b").with_chunk_size(3);
        let big = fs
            .create_file("big", "text/plain", pieces(&[&[b'x'; 300]]))
            .await
            .unwrap();
        let small = fs.create_file("small", "text/plain", pieces(&[b"hi"])).await.unwrap();

        assert_eq!(fs.read_all(&small).await.unwrap(), b"hi");
        assert_eq!(fs.read_all(&big).await.unwrap().len(), 300);

        let matched = store
            .find_by_field("d", "b.chunks", IndexedField::FilesId, &small.id, 0)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
    }
}
