//! Represents files stored in a bucket and the pieces they are made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata document kept in `<bucket>.files` for every stored file.
///
/// Files are looked up by `filename`, which is not unique; `id` is the
/// store-assigned identifier returned to callers on upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Store-assigned identifier.
    #[serde(rename = "_id")]
    pub id: String,

    /// Name the file was uploaded under.
    pub filename: String,

    /// Payload size in bytes.
    pub length: i64,

    /// Maximum payload bytes per chunk.
    pub chunk_size: i64,

    /// When the upload completed.
    pub upload_date: DateTime<Utc>,

    /// Hex MD5 of the whole payload.
    pub md5: String,

    /// Media type detected from the file name.
    pub content_type: String,
}

/// One payload fragment kept in `<bucket>.chunks`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChunkRecord {
    #[serde(rename = "_id")]
    pub id: String,

    /// Identifier of the owning [`FileInfo`].
    pub files_id: String,

    /// Zero-based position of this chunk within the file.
    pub n: i64,

    /// Base64-encoded payload bytes.
    pub data: String,
}

/// A fully materialized file, as returned by a download.
#[derive(Clone, Debug, PartialEq)]
pub struct FileEnvelope {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub name: String,
}
