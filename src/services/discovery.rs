//! Discovery: what databases, collections and buckets exist.
//!
//! The store only knows flat collection names. Buckets are reconstructed from
//! the `<base>.files` / `<base>.chunks` naming convention, and reserved names
//! are hidden from the collection listing. The classification functions are
//! pure so they can be tested without a store.

use crate::store::{
    Store, StoreResult,
    gridfs::{CHUNKS_SUFFIX, FILES_SUFFIX},
};
use std::collections::BTreeSet;

/// Suffix of index metadata collections.
pub const INDEXES_SUFFIX: &str = ".indexes";
/// Collection name reserved for user records.
pub const RESERVED_USERS: &str = "users";

/// Store reads behind every existence gate.
#[derive(Clone)]
pub struct Discovery {
    store: Store,
}

impl Discovery {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_database_names(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.store.list_database_names().await?.into_iter().collect())
    }

    pub async fn database_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.list_database_names().await?.contains(name))
    }

    /// Raw collection names, bucket siblings and reserved names included.
    pub async fn list_collection_names(&self, database: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .store
            .list_collection_names(database)
            .await?
            .into_iter()
            .collect())
    }

    pub async fn collection_exists(&self, database: &str, name: &str) -> StoreResult<bool> {
        Ok(self.list_collection_names(database).await?.contains(name))
    }

    pub async fn bucket_exists(&self, database: &str, bucket: &str) -> StoreResult<bool> {
        let raw = self.list_collection_names(database).await?;
        Ok(discover_buckets(&raw).contains(bucket))
    }
}

/// Names that are ordinary user collections: everything except bucket
/// siblings, index metadata and the reserved `users` collection.
pub fn filter_user_collections(raw: &BTreeSet<String>) -> BTreeSet<String> {
    raw.iter()
        .filter(|name| {
            !name.ends_with(FILES_SUFFIX)
                && !name.ends_with(CHUNKS_SUFFIX)
                && !name.ends_with(INDEXES_SUFFIX)
                && name.as_str() != RESERVED_USERS
        })
        .cloned()
        .collect()
}

/// Base names `b` for which both `b.chunks` and `b.files` are present.
/// A lone sibling is not a bucket. Matching is case-sensitive.
pub fn discover_buckets(raw: &BTreeSet<String>) -> BTreeSet<String> {
    raw.iter()
        .filter_map(|name| name.strip_suffix(CHUNKS_SUFFIX))
        .filter(|base| raw.contains(&format!("{}{}", base, FILES_SUFFIX)))
        .map(str::to_string)
        .collect()
}
