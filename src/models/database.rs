//! Usage statistics reported for a database.

use serde::{Deserialize, Serialize};

/// Store-reported usage numbers for one database.
///
/// The gateway hands this back as an opaque JSON blob; nothing above the
/// store interprets the individual fields.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    /// Database name.
    pub db: String,

    /// Number of collections, bucket siblings included.
    pub collections: i64,

    /// Number of documents across all collections.
    pub objects: i64,

    /// Mean serialized document size in bytes (0 when empty).
    pub avg_obj_size: f64,

    /// Total serialized document size in bytes.
    pub data_size: i64,
}
