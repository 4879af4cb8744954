//! Represents a document row as stored in SQLite.

use serde_json::{Map, Value};
use sqlx::FromRow;

/// A JSON document body: field name to value, arbitrarily nested.
pub type Document = Map<String, Value>;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Raw `documents` row. The body is kept as JSON text.
#[derive(Clone, FromRow, Debug)]
pub struct StoredDocument {
    /// Opaque identifier, unique within its collection.
    pub id: String,

    /// Serialized JSON object, `_id` included.
    pub body: String,
}

impl StoredDocument {
    /// Parse the stored body back into a document.
    pub fn into_document(self) -> Result<Document, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
