//! DocumentService: CRUD and filtered, paged, sorted listing of documents.
//!
//! Client parameters arrive as loose text and are normalized here:
//! - `skip` / `limit`: anything that does not parse as an integer becomes 0
//!   (no skip / no limit). Negative skips clamp to 0; a negative limit uses
//!   its magnitude.
//! - `orderBy`: `<field>:ascending` or `<field>:descending`. The direction is
//!   found by substring, so `foo:ascendingbar` still sorts ascending on `foo`.
//!   Anything without a colon and a field, or with neither keyword, is unsorted.
//! - filter: MongoDB-style JSON; blank means match all, malformed is an error.

use super::{GatewayError, GatewayResult, datasource_fault, discovery::Discovery, require};
use crate::{
    models::document::{Document, ID_FIELD},
    store::{
        Store, StoreError,
        query::{Filter, FindOptions, SortDirection, SortSpec},
    },
};
use serde_json::Value;
use tracing::debug;

/// Raw listing parameters as a client sent them.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub filter: Option<String>,
    pub skip: Option<String>,
    pub limit: Option<String>,
    pub order_by: Option<String>,
    pub include_id: bool,
}

#[derive(Clone)]
pub struct DocumentService {
    store: Store,
    discovery: Discovery,
}

impl DocumentService {
    pub fn new(store: Store) -> Self {
        Self {
            discovery: Discovery::new(store.clone()),
            store,
        }
    }

    pub async fn list(
        &self,
        database: &str,
        collection: &str,
        query: &DocumentQuery,
    ) -> GatewayResult<Vec<Document>> {
        self.ensure_collection(database, collection).await?;

        let options = FindOptions {
            filter: parse_filter(query.filter.as_deref())?,
            sort: parse_order_by(query.order_by.as_deref()),
            skip: parse_skip(query.skip.as_deref()),
            limit: parse_limit(query.limit.as_deref()),
        };
        debug!(database, collection, ?options, "listing documents");

        let docs = self
            .store
            .find(database, collection, &options)
            .await
            .map_err(datasource_fault("An error occurred while retrieving the document list"))?;
        Ok(docs
            .into_iter()
            .map(|doc| project_id(doc, query.include_id))
            .collect())
    }

    pub async fn get_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        include_id: bool,
    ) -> GatewayResult<Document> {
        self.ensure_collection(database, collection).await?;
        let doc = self
            .store
            .find_by_id(database, collection, id)
            .await
            .map_err(datasource_fault("An error occurred while retrieving the document"))?
            .ok_or_else(document_not_found)?;
        Ok(project_id(doc, include_id))
    }

    /// Insert a document and return its identifier. The database and the
    /// collection are created on first write.
    pub async fn add(&self, database: &str, collection: &str, body: &str) -> GatewayResult<String> {
        validate_body(database, collection, body)?;
        let doc = parse_body(body)?;

        match self.store.insert_document(database, collection, doc).await {
            Ok(id) => Ok(id),
            Err(StoreError::Conflict(_)) => Err(GatewayError::AlreadyExists(
                "A document with this identifier already exists".into(),
            )),
            Err(err) => Err(datasource_fault("An error occurred while adding the document")(err)),
        }
    }

    /// Replace the whole body of an existing document. Not a merge.
    pub async fn replace_by_id(
        &self,
        database: &str,
        collection: &str,
        id: &str,
        body: &str,
    ) -> GatewayResult<()> {
        validate_body(database, collection, body)?;
        require(id, "document identifier")?;
        let doc = parse_body(body)?;

        let replaced = self
            .store
            .replace_by_id(database, collection, id, doc)
            .await
            .map_err(datasource_fault("An error occurred while updating the document"))?;
        if replaced {
            Ok(())
        } else {
            Err(GatewayError::NotFound(
                "The document doesn't exist in the collection".into(),
            ))
        }
    }

    pub async fn delete_by_id(&self, database: &str, collection: &str, id: &str) -> GatewayResult<()> {
        self.ensure_collection(database, collection).await?;
        let deleted = self
            .store
            .delete_by_id(database, collection, id)
            .await
            .map_err(datasource_fault("An error occurred while deleting the document"))?;
        if deleted {
            Ok(())
        } else {
            Err(document_not_found())
        }
    }

    /// Clear the collection's contents; the collection itself stays.
    pub async fn delete_all(&self, database: &str, collection: &str) -> GatewayResult<u64> {
        self.ensure_collection(database, collection).await?;
        self.store
            .delete_many(database, collection)
            .await
            .map_err(datasource_fault("An error occurred while deleting the documents"))
    }

    async fn ensure_collection(&self, database: &str, collection: &str) -> GatewayResult<()> {
        let db_exists = self
            .discovery
            .database_exists(database)
            .await
            .map_err(datasource_fault("An error occurred while looking up the database"))?;
        if !db_exists {
            return Err(GatewayError::NotFound(
                "The database doesn't exist in the datasource".into(),
            ));
        }

        let coll_exists = self
            .discovery
            .collection_exists(database, collection)
            .await
            .map_err(datasource_fault("An error occurred while looking up the collection"))?;
        if !coll_exists {
            return Err(GatewayError::NotFound(
                "The collection doesn't exist in the datasource".into(),
            ));
        }
        Ok(())
    }
}

fn document_not_found() -> GatewayError {
    GatewayError::NotFound("The document doesn't exist in the datasource".into())
}

fn validate_body(database: &str, collection: &str, body: &str) -> GatewayResult<()> {
    require(database, "database name")?;
    require(collection, "collection name")?;
    require(body.trim(), "document body")
}

fn parse_body(body: &str) -> GatewayResult<Document> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(_) => Err(GatewayError::Deserialize(
            "The JSON payload must be an object".into(),
        )),
        Err(err) => {
            debug!(error = %err, "rejected document body");
            Err(GatewayError::Deserialize("The JSON payload is invalid".into()))
        }
    }
}

fn project_id(mut doc: Document, include_id: bool) -> Document {
    if !include_id {
        doc.remove(ID_FIELD);
    }
    doc
}

pub fn parse_filter(raw: Option<&str>) -> GatewayResult<Filter> {
    match raw {
        None => Ok(Filter::match_all()),
        Some(text) => Filter::parse(text)
            .map_err(|err| GatewayError::MalformedInput(format!("Invalid query filter: {}", err))),
    }
}

pub fn parse_skip(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

pub fn parse_limit(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(i64::unsigned_abs)
        .unwrap_or(0)
}

pub fn parse_order_by(raw: Option<&str>) -> Option<SortSpec> {
    let raw = raw?;
    let (field, _) = raw.split_once(':')?;
    if field.is_empty() {
        return None;
    }
    let direction = if raw.contains("ascending") {
        SortDirection::Ascending
    } else if raw.contains("descending") {
        SortDirection::Descending
    } else {
        return None;
    };
    Some(SortSpec {
        field: field.to_string(),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{collection_service::CollectionService, database_service::DatabaseService};
    use crate::store::testutil::memory_store;
    use serde_json::json;

    async fn service_with_collection() -> DocumentService {
        let store = memory_store().await;
        DatabaseService::new(store.clone()).create("d1").await.unwrap();
        CollectionService::new(store.clone()).create("d1", "c1").await.unwrap();
        DocumentService::new(store)
    }

    fn query() -> DocumentQuery {
        DocumentQuery::default()
    }

    #[test]
    fn pagination_is_lenient() {
        assert_eq!(parse_skip(Some("abc")), 0);
        assert_eq!(parse_limit(Some("xyz")), 0);
        assert_eq!(parse_skip(None), 0);
        assert_eq!(parse_skip(Some(" 7 ")), 7);
        assert_eq!(parse_skip(Some("-3")), 0);
        assert_eq!(parse_limit(Some("-3")), 3);
        assert_eq!(parse_limit(Some("2.5")), 0);
    }

    #[test]
    fn order_by_grammar() {
        let asc = parse_order_by(Some("name:ascending")).unwrap();
        assert_eq!(asc.field, "name");
        assert_eq!(asc.direction, SortDirection::Ascending);

        let desc = parse_order_by(Some("name:descending")).unwrap();
        assert_eq!(desc.direction, SortDirection::Descending);

        let loose = parse_order_by(Some("foo:ascendingbar")).unwrap();
        assert_eq!(loose.field, "foo");
        assert_eq!(loose.direction, SortDirection::Ascending);

        assert_eq!(parse_order_by(Some("garbage")), None);
        assert_eq!(parse_order_by(Some("nameascending")), None);
        assert_eq!(parse_order_by(Some(":ascending")), None);
        assert_eq!(parse_order_by(Some("name:up")), None);
        assert_eq!(parse_order_by(None), None);
    }

    #[test]
    fn filter_errors_are_malformed_input() {
        assert_eq!(parse_filter(None).unwrap(), Filter::match_all());
        assert_eq!(parse_filter(Some("")).unwrap(), Filter::match_all());
        assert!(matches!(
            parse_filter(Some("{not json")),
            Err(GatewayError::MalformedInput(_))
        ));
    }

    #[tokio::test]
    async fn add_then_get_round_trips_without_id() {
        let service = service_with_collection().await;
        let id = service.add("d1", "c1", r#"{"x":1}"#).await.unwrap();

        let doc = service.get_by_id("d1", "c1", &id, false).await.unwrap();
        assert_eq!(Value::Object(doc), json!({"x": 1}));

        let with_id = service.get_by_id("d1", "c1", &id, true).await.unwrap();
        assert_eq!(with_id[ID_FIELD], json!(id));
    }

    #[tokio::test]
    async fn add_validates_input() {
        let service = service_with_collection().await;
        assert!(matches!(
            service.add("", "c1", "{}").await,
            Err(GatewayError::MalformedInput(_))
        ));
        assert!(matches!(
            service.add("d1", "", "{}").await,
            Err(GatewayError::MalformedInput(_))
        ));
        assert!(matches!(
            service.add("d1", "c1", "  ").await,
            Err(GatewayError::MalformedInput(msg)) if msg.contains("body")
        ));
        assert!(matches!(
            service.add("d1", "c1", "{oops").await,
            Err(GatewayError::Deserialize(_))
        ));
        assert!(matches!(
            service.add("d1", "c1", "[1,2]").await,
            Err(GatewayError::Deserialize(_))
        ));
    }

    #[tokio::test]
    async fn add_creates_database_and_collection_implicitly() {
        let store = memory_store().await;
        let service = DocumentService::new(store.clone());
        let id = service.add("fresh", "things", r#"{"a":true}"#).await.unwrap();

        assert_eq!(store.list_database_names().await.unwrap(), vec!["fresh"]);
        assert!(service.get_by_id("fresh", "things", &id, false).await.is_ok());
    }

    #[tokio::test]
    async fn replace_overwrites_whole_body() {
        let service = service_with_collection().await;
        let id = service.add("d1", "c1", r#"{"x":1,"keep":"no"}"#).await.unwrap();

        service.replace_by_id("d1", "c1", &id, r#"{"y":2}"#).await.unwrap();
        let doc = service.get_by_id("d1", "c1", &id, false).await.unwrap();
        assert_eq!(Value::Object(doc), json!({"y": 2}));

        assert!(matches!(
            service.replace_by_id("d1", "c1", "missing", r#"{"y":2}"#).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            service.replace_by_id("d1", "c1", &id, "nope").await,
            Err(GatewayError::Deserialize(_))
        ));
        assert!(matches!(
            service.replace_by_id("d1", "c1", "", "{}").await,
            Err(GatewayError::MalformedInput(msg)) if msg.contains("identifier")
        ));
        assert!(matches!(
            service.replace_by_id("d1", "c1", &id, " ").await,
            Err(GatewayError::MalformedInput(msg)) if msg.contains("body")
        ));
    }

    #[tokio::test]
    async fn delete_by_id_then_get_is_not_found() {
        let service = service_with_collection().await;
        let id = service.add("d1", "c1", r#"{"x":1}"#).await.unwrap();

        service.delete_by_id("d1", "c1", &id).await.unwrap();
        assert!(matches!(
            service.get_by_id("d1", "c1", &id, false).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_by_id("d1", "c1", &id).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reads_require_existing_database_and_collection() {
        let service = service_with_collection().await;
        assert!(matches!(
            service.list("nope", "c1", &query()).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            service.list("d1", "nope", &query()).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            service.get_by_id("d1", "nope", "x", false).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_all("d1", "nope").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_all_clears_contents_only() {
        let store = memory_store().await;
        let service = DocumentService::new(store.clone());
        service.add("d1", "c1", r#"{"a":1}"#).await.unwrap();
        service.add("d1", "c1", r#"{"a":2}"#).await.unwrap();

        assert_eq!(service.delete_all("d1", "c1").await.unwrap(), 2);
        assert!(service.list("d1", "c1", &query()).await.unwrap().is_empty());
        assert_eq!(store.list_collection_names("d1").await.unwrap(), vec!["c1"]);
    }

    #[tokio::test]
    async fn list_sorts_pages_and_filters() {
        let service = service_with_collection().await;
        for name in ["carol", "alice", "bob", "dave"] {
            service
                .add("d1", "c1", &json!({"name": name, "len": name.len()}).to_string())
                .await
                .unwrap();
        }
        let names = |docs: Vec<Document>| -> Vec<String> {
            docs.iter()
                .map(|d| d["name"].as_str().unwrap_or_default().to_string())
                .collect()
        };

        let asc = DocumentQuery {
            order_by: Some("name:ascending".into()),
            ..query()
        };
        assert_eq!(
            names(service.list("d1", "c1", &asc).await.unwrap()),
            vec!["alice", "bob", "carol", "dave"]
        );

        let desc = DocumentQuery {
            order_by: Some("name:descending".into()),
            ..query()
        };
        assert_eq!(
            names(service.list("d1", "c1", &desc).await.unwrap()),
            vec!["dave", "carol", "bob", "alice"]
        );

        let garbage = DocumentQuery {
            order_by: Some("garbage".into()),
            ..query()
        };
        assert_eq!(
            names(service.list("d1", "c1", &garbage).await.unwrap()),
            vec!["carol", "alice", "bob", "dave"]
        );

        let lenient = DocumentQuery {
            skip: Some("abc".into()),
            limit: Some("xyz".into()),
            ..query()
        };
        let zeroes = DocumentQuery {
            skip: Some("0".into()),
            limit: Some("0".into()),
            ..query()
        };
        assert_eq!(
            service.list("d1", "c1", &lenient).await.unwrap(),
            service.list("d1", "c1", &zeroes).await.unwrap()
        );

        let paged = DocumentQuery {
            order_by: Some("name:ascending".into()),
            skip: Some("1".into()),
            limit: Some("2".into()),
            ..query()
        };
        assert_eq!(
            names(service.list("d1", "c1", &paged).await.unwrap()),
            vec!["bob", "carol"]
        );

        let filtered = DocumentQuery {
            filter: Some(r#"{"len": {"$gte": 5}}"#.into()),
            order_by: Some("name:ascending".into()),
            ..query()
        };
        assert_eq!(
            names(service.list("d1", "c1", &filtered).await.unwrap()),
            vec!["alice", "carol"]
        );

        let malformed = DocumentQuery {
            filter: Some("{".into()),
            ..query()
        };
        assert!(matches!(
            service.list("d1", "c1", &malformed).await,
            Err(GatewayError::MalformedInput(_))
        ));
    }

    #[tokio::test]
    async fn include_id_applies_to_listing() {
        let service = service_with_collection().await;
        let id = service.add("d1", "c1", r#"{"x":1}"#).await.unwrap();

        let hidden = service.list("d1", "c1", &query()).await.unwrap();
        assert!(hidden.iter().all(|d| !d.contains_key(ID_FIELD)));

        let shown = DocumentQuery {
            include_id: true,
            ..query()
        };
        let shown = service.list("d1", "c1", &shown).await.unwrap();
        assert_eq!(shown[0][ID_FIELD], json!(id));
    }

    #[tokio::test]
    async fn scenario_database_collection_document() {
        let store = memory_store().await;
        let databases = DatabaseService::new(store.clone());
        let collections = CollectionService::new(store.clone());
        let documents = DocumentService::new(store);

        assert!(matches!(databases.remove("d1").await, Err(GatewayError::NotFound(_))));
        databases.create("d1").await.unwrap();
        assert!(matches!(
            databases.create("d1").await,
            Err(GatewayError::AlreadyExists(_))
        ));
        collections.create("d1", "c1").await.unwrap();
        let id1 = documents.add("d1", "c1", "{\"x\":1}").await.unwrap();
        let doc = documents.get_by_id("d1", "c1", &id1, false).await.unwrap();
        assert_eq!(Value::Object(doc), json!({"x": 1}));
    }
}
