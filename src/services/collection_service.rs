//! CollectionService: list, create and remove collections of a database.

use super::{
    GatewayError, GatewayResult, datasource_fault,
    discovery::{Discovery, filter_user_collections},
    require,
};
use crate::store::{Store, StoreError};
use tracing::info;

#[derive(Clone)]
pub struct CollectionService {
    store: Store,
    discovery: Discovery,
}

impl CollectionService {
    pub fn new(store: Store) -> Self {
        Self {
            discovery: Discovery::new(store.clone()),
            store,
        }
    }

    /// User collections only: bucket siblings, index metadata and `users`
    /// are never listed.
    pub async fn list(&self, database: &str) -> GatewayResult<Vec<String>> {
        self.ensure_database(database).await?;
        let raw = self
            .discovery
            .list_collection_names(database)
            .await
            .map_err(datasource_fault("An error occurred while retrieving the collection list"))?;
        Ok(filter_user_collections(&raw).into_iter().collect())
    }

    /// Create an uncapped collection.
    pub async fn create(&self, database: &str, name: &str) -> GatewayResult<()> {
        require(name, "collection name")?;
        self.ensure_database(database).await?;
        if self.collection_exists(database, name).await? {
            return Err(already_exists());
        }

        match self.store.create_collection(database, name, false).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(already_exists()),
            Err(err) => {
                return Err(datasource_fault("An error occurred while adding the collection")(err));
            }
        }

        info!(database, collection = name, "collection created");
        Ok(())
    }

    /// Drop a collection and all of its documents.
    pub async fn remove(&self, database: &str, name: &str) -> GatewayResult<()> {
        self.ensure_database(database).await?;
        if !self.collection_exists(database, name).await? {
            return Err(not_found());
        }

        let dropped = self
            .store
            .drop_collection(database, name)
            .await
            .map_err(datasource_fault("An error occurred while deleting the collection"))?;
        if !dropped {
            return Err(not_found());
        }

        info!(database, collection = name, "collection removed");
        Ok(())
    }

    async fn ensure_database(&self, database: &str) -> GatewayResult<()> {
        let exists = self
            .discovery
            .database_exists(database)
            .await
            .map_err(datasource_fault("An error occurred while looking up the database"))?;
        if exists {
            Ok(())
        } else {
            Err(GatewayError::NotFound(
                "The database doesn't exist in the datasource".into(),
            ))
        }
    }

    async fn collection_exists(&self, database: &str, name: &str) -> GatewayResult<bool> {
        self.discovery
            .collection_exists(database, name)
            .await
            .map_err(datasource_fault("An error occurred while looking up the collection"))
    }
}

fn already_exists() -> GatewayError {
    GatewayError::AlreadyExists("The collection already exists in the datasource".into())
}

fn not_found() -> GatewayError {
    GatewayError::NotFound("The collection doesn't exist in the datasource".into())
}
