//! Defines routes for all database, collection, document and file operations.
//!
//! ## Structure
//! - **Databases**
//!   - `GET    /database`: list databases
//!   - `PUT    /database/{db}`: create database
//!   - `DELETE /database/{db}`: drop database
//!   - `GET    /database/{db}/stats`: usage statistics
//!
//! - **Collections**
//!   - `GET    /collection/{db}`: list user collections
//!   - `PUT    /collection/{db}/{coll}`: create collection
//!   - `DELETE /collection/{db}/{coll}`: drop collection
//!
//! - **Documents**
//!   - `GET    /document/{db}/{coll}`: list (skip, limit, orderBy, includeId)
//!   - `POST   /document/{db}/{coll}`: add, body is the document
//!   - `DELETE /document/{db}/{coll}`: delete every document
//!   - `POST   /document/{db}/{coll}/query`: list with the body as filter
//!   - `GET | PUT | DELETE /document/{db}/{coll}/{id}`
//!   - `POST   /document/document-upload`: url-encoded form upload
//!
//! - **Files**
//!   - `GET    /gridfs/{db}`: list buckets
//!   - `GET | POST | DELETE /gridfs/{db}/{bucket}`: list files, create, drop
//!   - `DELETE /gridfs/{db}/{bucket}/files`: remove every file
//!   - `GET | POST | PUT | DELETE /gridfs/{db}/{bucket}/{file}`
//!   - `POST   /gridfs/form-upload`: multipart upload
//!
//! Literal segments win over captures, so a document called `query` or a
//! file called `files` is only reachable through the listing endpoints.

use crate::{
    handlers::{
        collection_handlers::{create_collection, list_collections, remove_collection},
        database_handlers::{create_database, database_stats, list_databases, remove_database},
        document_handlers::{
            add_document, delete_all_documents, delete_document, document_upload, get_document,
            list_documents, query_documents, replace_document,
        },
        file_handlers::{
            create_bucket, download_file, form_upload, list_buckets, list_files,
            remove_all_files, remove_bucket, remove_file, upload_if_absent, upsert_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::Gateway,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::limit::RequestBodyLimitLayer;

/// Build and return the router for every gateway route.
///
/// The router carries shared state (`Gateway`) to all handlers.
pub fn routes() -> Router<Gateway> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Databases
        .route("/database", get(list_databases))
        .route(
            "/database/{db}",
            put(create_database).delete(remove_database),
        )
        .route("/database/{db}/stats", get(database_stats))
        // Collections
        .route("/collection/{db}", get(list_collections))
        .route(
            "/collection/{db}/{coll}",
            put(create_collection).delete(remove_collection),
        )
        // Documents
        .route("/document/document-upload", post(document_upload))
        .route(
            "/document/{db}/{coll}",
            get(list_documents)
                .post(add_document)
                .delete(delete_all_documents),
        )
        .route("/document/{db}/{coll}/query", post(query_documents))
        .route(
            "/document/{db}/{coll}/{id}",
            get(get_document)
                .put(replace_document)
                .delete(delete_document),
        )
        // Files
        .route("/gridfs/form-upload", post(form_upload))
        .route("/gridfs/{db}", get(list_buckets))
        .route(
            "/gridfs/{db}/{bucket}",
            get(list_files).post(create_bucket).delete(remove_bucket),
        )
        .route("/gridfs/{db}/{bucket}/files", delete(remove_all_files))
        .route(
            "/gridfs/{db}/{bucket}/{file}",
            get(download_file)
                .post(upload_if_absent)
                .put(upsert_file)
                .delete(remove_file),
        )
}

/// The routes with their state, every request body capped at
/// `max_body_bytes`.
///
/// `DefaultBodyLimit` sizes the buffering extractors (JSON text, forms,
/// multipart); `RequestBodyLimitLayer` caps the raw bodies that file uploads
/// stream from.
pub fn app(gateway: Gateway, max_body_bytes: usize) -> Router {
    routes()
        .with_state(gateway)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

#[cfg(test)]
mod tests {
    use super::app as build_app;
    use crate::{services::Gateway, store::testutil::memory_store};
    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> Router {
        build_app(Gateway::new(memory_store().await), 1024 * 1024)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body.to_string()).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let app = app().await;
        let (status, body) = send_json(&app, Method::GET, "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send_json(&app, Method::GET, "/readyz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["store"]["ok"], true);
    }

    #[tokio::test]
    async fn database_lifecycle_maps_errors_to_statuses() {
        let app = app().await;
        let (status, _) = send_json(&app, Method::PUT, "/database/d1", "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&app, Method::PUT, "/database/d1", "").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "AlreadyExists");

        let (status, body) = send_json(&app, Method::GET, "/database", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["d1"]));

        let (status, _) = send_json(&app, Method::DELETE, "/database/d1", "").await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send_json(&app, Method::DELETE, "/database/d1", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn documents_round_trip_over_http() {
        let app = app().await;
        let (status, body) =
            send_json(&app, Method::POST, "/document/d1/c1", r#"{"_id":"a","n":2}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "a");
        send_json(&app, Method::POST, "/document/d1/c1", r#"{"_id":"b","n":1}"#).await;

        let (status, body) =
            send_json(&app, Method::GET, "/document/d1/c1?orderBy=n:ascending", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([{"n": 1}, {"n": 2}]));

        let (_, body) = send_json(
            &app,
            Method::POST,
            "/document/d1/c1/query?includeId=TRUE",
            r#"{"n":{"$gt":1}}"#,
        )
        .await;
        assert_eq!(body, serde_json::json!([{"_id": "a", "n": 2}]));

        let (status, body) =
            send_json(&app, Method::POST, "/document/d1/c1/query", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "MalformedInput");

        let (status, _) =
            send_json(&app, Method::PUT, "/document/d1/c1/a", r#"{"n":5}"#).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send_json(&app, Method::GET, "/document/d1/c1/a?includeId=true", "").await;
        assert_eq!(body, serde_json::json!({"_id": "a", "n": 5}));

        let (status, _) = send_json(&app, Method::DELETE, "/document/d1/c1/zzz", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn document_upload_form_adds_or_replaces() {
        let app = app().await;
        let form = |body: &str| {
            Request::builder()
                .method(Method::POST)
                .uri("/document/document-upload")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(form(
                "databaseName=d1&collectionName=c1&content=%7B%22_id%22%3A%22x%22%2C%22v%22%3A1%7D",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(form(
                "databaseName=d1&collectionName=c1&documentId=x&overwrite=on&content=%7B%22v%22%3A2%7D",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, body) = send_json(&app, Method::GET, "/document/d1/c1/x", "").await;
        assert_eq!(body, serde_json::json!({"v": 2}));
    }

    #[tokio::test]
    async fn files_upload_download_and_remove() {
        let app = app().await;
        send_json(&app, Method::PUT, "/database/d1", "").await;

        let (status, body) =
            send_json(&app, Method::POST, "/gridfs/d1/b1/hello.txt", "hi there").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["id"].is_string());

        let (status, body) =
            send_json(&app, Method::POST, "/gridfs/d1/b1/hello.txt", "again").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "AlreadyExists");

        let request = Request::builder()
            .uri("/gridfs/d1/b1/hello.txt")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            r#"inline; filename="hello.txt""#
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hi there");

        let (_, body) = send_json(&app, Method::GET, "/gridfs/d1", "").await;
        assert_eq!(body, serde_json::json!(["b1"]));

        let (status, body) = send_json(&app, Method::DELETE, "/gridfs/d1/b1/files", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let (status, _) = send(&app, Method::GET, "/gridfs/d1/b1/hello.txt", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn form_upload_skips_unnamed_parts() {
        let app = app().await;
        send_json(&app, Method::PUT, "/database/d1", "").await;

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"databaseName\"\r\n\r\nd1\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"bucketName\"\r\n\r\nb1\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"inputFile\"\r\n\r\nno name\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"inputFile\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nalpha\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/gridfs/form-upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["id"].is_string());

        let (_, files) = send_json(&app, Method::GET, "/gridfs/d1/b1", "").await;
        let files = files.as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["filename"], "a.txt");
    }

    #[tokio::test]
    async fn raw_uploads_respect_the_body_limit() {
        let app = build_app(Gateway::new(memory_store().await), 16);
        send_json(&app, Method::PUT, "/database/d1", "").await;
        let big = "x".repeat(4096);

        // streamed, no length announced
        let (status, body) = send_json(&app, Method::POST, "/gridfs/d1/b1/big.txt", &big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["kind"], "PayloadTooLarge");
        let (status, _) = send_json(&app, Method::PUT, "/gridfs/d1/b1/big.txt", &big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        // announced length, rejected before the handler
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/gridfs/d1/b1/big.txt")
            .header(header::CONTENT_LENGTH, big.len())
            .body(Body::from(big.clone()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (status, _) = send(&app, Method::GET, "/gridfs/d1/b1/big.txt", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&app, Method::POST, "/gridfs/d1/b1/small.txt", "tiny").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn document_bodies_respect_the_body_limit() {
        let app = build_app(Gateway::new(memory_store().await), 16);
        let big = format!(r#"{{"text":"{}"}}"#, "x".repeat(4096));
        let (status, _) = send(&app, Method::POST, "/document/d1/c1", big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
