//! DatabaseService: list, stat, create and remove databases.

use super::{GatewayError, GatewayResult, datasource_fault, discovery::Discovery, require};
use crate::store::Store;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct DatabaseService {
    store: Store,
    discovery: Discovery,
}

impl DatabaseService {
    pub fn new(store: Store) -> Self {
        Self {
            discovery: Discovery::new(store.clone()),
            store,
        }
    }

    pub async fn list(&self) -> GatewayResult<Vec<String>> {
        let names = self
            .discovery
            .list_database_names()
            .await
            .map_err(datasource_fault("An error occurred while retrieving the database list"))?;
        Ok(names.into_iter().collect())
    }

    /// Usage statistics as an opaque JSON object.
    pub async fn stat(&self, name: &str) -> GatewayResult<Value> {
        self.ensure_exists(name).await?;
        let stats = self
            .store
            .database_stats(name)
            .await
            .map_err(datasource_fault("An error occurred while retrieving database stats"))?;
        serde_json::to_value(stats).map_err(|err| {
            datasource_fault("An error occurred while retrieving database stats")(err.into())
        })
    }

    /// The store has no create-database primitive: a database is brought into
    /// existence by creating a throwaway collection in it and dropping it again.
    ///
    /// Two concurrent creates of the same name can both pass the existence
    /// check; both then succeed, since registering a database is idempotent.
    pub async fn create(&self, name: &str) -> GatewayResult<()> {
        require(name, "database name")?;
        if self.exists(name).await? {
            return Err(GatewayError::AlreadyExists(
                "The database already exists in the datasource".into(),
            ));
        }

        let scratch = format!("temp{}", Uuid::new_v4().simple());
        self.store
            .create_collection(name, &scratch, false)
            .await
            .map_err(datasource_fault("An error occurred while adding the database"))?;
        if let Err(err) = self.store.drop_collection(name, &scratch).await {
            warn!(
                database = name,
                collection = %scratch,
                "database created but its scratch collection could not be dropped"
            );
            return Err(datasource_fault("An error occurred while adding the database")(err));
        }

        info!(database = name, "database created");
        Ok(())
    }

    /// Drop a database and everything in it.
    pub async fn remove(&self, name: &str) -> GatewayResult<()> {
        self.ensure_exists(name).await?;
        let dropped = self
            .store
            .drop_database(name)
            .await
            .map_err(datasource_fault("An error occurred while removing the database"))?;
        if !dropped {
            return Err(not_found());
        }

        info!(database = name, "database removed");
        Ok(())
    }

    async fn exists(&self, name: &str) -> GatewayResult<bool> {
        self.discovery
            .database_exists(name)
            .await
            .map_err(datasource_fault("An error occurred while looking up the database"))
    }

    async fn ensure_exists(&self, name: &str) -> GatewayResult<()> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(not_found())
        }
    }
}

fn not_found() -> GatewayError {
    GatewayError::NotFound("The database doesn't exist in the datasource".into())
}
