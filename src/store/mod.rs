//! src/store/mod.rs
//!
//! Store: the document store the gateway sits on, backed by SQLite.
//!
//! The store knows three things: registered databases, the collections inside
//! them, and schemaless JSON documents inside those. It has no notion of a
//! bucket; the chunked file primitive in [`gridfs`] is layered on ordinary
//! collections. Every operation here is a single round-trip (or a single
//! SQLite transaction); existence policy lives in the services above.

pub mod gridfs;
pub mod query;

use crate::models::{
    database::DatabaseStats,
    document::{Document, ID_FIELD, StoredDocument},
};
use chrono::Utc;
use query::FindOptions;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("`{0}` already exists")]
    Conflict(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Shared handle to the document store. Cloning is cheap; all clones share
/// one connection pool and the store keeps no other state.
#[derive(Clone)]
pub struct Store {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl Store {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is `IF NOT EXISTS`, so this
    /// is safe to run on every start.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }

    /// Cheap connectivity check.
    pub async fn ping(&self) -> StoreResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value == 1 {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!("ping returned {}", value)))
        }
    }

    pub async fn list_database_names(&self) -> StoreResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM databases ORDER BY name")
            .fetch_all(&*self.db)
            .await?;
        Ok(names)
    }

    pub async fn list_collection_names(&self, database: &str) -> StoreResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM collections WHERE database = ? ORDER BY name",
        )
        .bind(database)
        .fetch_all(&*self.db)
        .await?;
        Ok(names)
    }

    /// Create a collection, registering its database if needed.
    ///
    /// The insert is unique-constrained, so of two racing creators exactly one
    /// wins and the other gets `Conflict`.
    pub async fn create_collection(
        &self,
        database: &str,
        name: &str,
        capped: bool,
    ) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        register_database(&mut tx, database).await?;

        match sqlx::query(
            "INSERT INTO collections (database, name, capped, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(database)
        .bind(name)
        .bind(capped)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict(format!("{}.{}", database, name)));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        tx.commit().await?;
        debug!(database, collection = name, "created collection");
        Ok(())
    }

    /// Drop a collection and its documents. Returns `false` if there was no
    /// such collection. The database stays registered.
    pub async fn drop_collection(&self, database: &str, name: &str) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM documents WHERE database = ? AND collection = ?")
            .bind(database)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM collections WHERE database = ? AND name = ?")
            .bind(database)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(database, collection = name, "dropped collection");
        Ok(result.rows_affected() > 0)
    }

    /// Drop a database with everything inside it. Returns `false` if the
    /// database was not registered.
    pub async fn drop_database(&self, database: &str) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM documents WHERE database = ?")
            .bind(database)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE database = ?")
            .bind(database)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM databases WHERE name = ?")
            .bind(database)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(database, "dropped database");
        Ok(result.rows_affected() > 0)
    }

    pub async fn database_stats(&self, database: &str) -> StoreResult<DatabaseStats> {
        let collections =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM collections WHERE database = ?")
                .bind(database)
                .fetch_one(&*self.db)
                .await?;
        let (objects, data_size) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(body)), 0) FROM documents WHERE database = ?",
        )
        .bind(database)
        .fetch_one(&*self.db)
        .await?;

        let avg_obj_size = if objects == 0 {
            0.0
        } else {
            data_size as f64 / objects as f64
        };

        Ok(DatabaseStats {
            db: database.to_string(),
            collections,
            objects,
            avg_obj_size,
            data_size,
        })
    }

    /// Insert a document, creating its database and collection on first write.
    ///
    /// A string `_id` in the body is used as the identifier; otherwise a fresh
    /// one is assigned and written into the body. Returns the identifier.
    pub async fn insert_document(
        &self,
        database: &str,
        collection: &str,
        mut body: Document,
    ) -> StoreResult<String> {
        let id = match body.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Null) | None => {
                let id = Uuid::new_v4().simple().to_string();
                body.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
            Some(other) => other.to_string(),
        };
        let text = serde_json::to_string(&body)?;

        let mut tx = self.db.begin().await?;
        ensure_collection(&mut tx, database, collection).await?;
        match sqlx::query(
            "INSERT INTO documents (database, collection, id, body) VALUES (?, ?, ?, ?)",
        )
        .bind(database)
        .bind(collection)
        .bind(&id)
        .bind(&text)
        .execute(&mut *tx)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict(format!(
                    "{}.{} document {}",
                    database, collection, id
                )));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }
        tx.commit().await?;

        Ok(id)
    }

    /// Documents of one collection matching `options`, in natural order unless
    /// a sort is given. A missing collection yields no documents.
    pub async fn find(
        &self,
        database: &str,
        collection: &str,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query_as::<_, StoredDocument>(
            "SELECT id, body FROM documents
             WHERE database = ? AND collection = ?
             ORDER BY seq ASC",
        )
        .bind(database)
        .bind(collection)
        .fetch_all(&*self.db)
        .await?;

        let docs = rows
            .into_iter()
            .map(StoredDocument::into_document)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(database, collection, scanned = docs.len(), "find");

        Ok(options.apply(docs))
    }

    pub async fn find_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query_as::<_, StoredDocument>(
            "SELECT id, body FROM documents WHERE database = ? AND collection = ? AND id = ?",
        )
        .bind(database)
        .bind(collection)
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(StoredDocument::into_document).transpose()?)
    }

    /// Replace a document body wholesale, keeping its stored `_id`.
    /// Returns `false` if no document has that identifier.
    pub async fn replace_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        mut body: Document,
    ) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;
        let existing = sqlx::query_as::<_, StoredDocument>(
            "SELECT id, body FROM documents WHERE database = ? AND collection = ? AND id = ?",
        )
        .bind(database)
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(existing) = existing else {
            return Ok(false);
        };
        // A body written without `_id` by another writer falls back to the row key.
        let row_id = Value::String(existing.id.clone());
        let stored_id = existing.into_document()?.remove(ID_FIELD).unwrap_or(row_id);
        body.insert(ID_FIELD.to_string(), stored_id);

        sqlx::query(
            "UPDATE documents SET body = ? WHERE database = ? AND collection = ? AND id = ?",
        )
        .bind(serde_json::to_string(&body)?)
        .bind(database)
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    pub async fn delete_by_id(&self, database: &str, collection: &str, id: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM documents WHERE database = ? AND collection = ? AND id = ?")
                .bind(database)
                .bind(collection)
                .bind(id)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every document in a collection. The collection itself and its
    /// options are untouched.
    pub async fn delete_many(&self, database: &str, collection: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE database = ? AND collection = ?")
            .bind(database)
            .bind(collection)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Documents of one collection whose `field` equals `value`, in natural
    /// order. The comparison runs in SQL against an expression index, so only
    /// matching rows are read. `limit == 0` means no limit.
    pub async fn find_by_field(
        &self,
        database: &str,
        collection: &str,
        field: IndexedField,
        value: &str,
        limit: u64,
    ) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT id, body FROM documents
             WHERE database = ? AND collection = ? AND {} = ?
             ORDER BY seq ASC
             LIMIT ?",
            field.expr()
        );
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let rows = sqlx::query_as::<_, StoredDocument>(&sql)
            .bind(database)
            .bind(collection)
            .bind(value)
            .bind(limit)
            .fetch_all(&*self.db)
            .await?;

        debug!(database, collection, field = field.name(), matched = rows.len(), "find by field");
        rows.into_iter()
            .map(StoredDocument::into_document)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Remove the documents whose `field` equals `value` in one statement.
    /// Returns how many went away.
    pub async fn delete_by_field(
        &self,
        database: &str,
        collection: &str,
        field: IndexedField,
        value: &str,
    ) -> StoreResult<u64> {
        let sql = format!(
            "DELETE FROM documents WHERE database = ? AND collection = ? AND {} = ?",
            field.expr()
        );
        let result = sqlx::query(&sql)
            .bind(database)
            .bind(collection)
            .bind(value)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Top-level string fields with an expression index in the schema. Lookups
/// on them compare in SQL instead of scanning the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedField {
    /// `filename` of a file metadata document.
    Filename,
    /// `files_id` of a chunk, naming the file it belongs to.
    FilesId,
}

impl IndexedField {
    pub fn name(self) -> &'static str {
        match self {
            IndexedField::Filename => "filename",
            IndexedField::FilesId => "files_id",
        }
    }

    /// Written exactly as in the schema's index, or SQLite will not use it.
    fn expr(self) -> &'static str {
        match self {
            IndexedField::Filename => "json_extract(body, '$.filename')",
            IndexedField::FilesId => "json_extract(body, '$.files_id')",
        }
    }
}

async fn register_database(conn: &mut SqliteConnection, database: &str) -> StoreResult<()> {
    sqlx::query("INSERT OR IGNORE INTO databases (name, created_at) VALUES (?, ?)")
        .bind(database)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn ensure_collection(
    conn: &mut SqliteConnection,
    database: &str,
    collection: &str,
) -> StoreResult<()> {
    register_database(&mut *conn, database).await?;
    sqlx::query(
        "INSERT OR IGNORE INTO collections (database, name, capped, created_at) VALUES (?, ?, 0, ?)",
    )
    .bind(database)
    .bind(collection)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
