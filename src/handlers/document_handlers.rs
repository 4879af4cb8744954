//! HTTP handlers for document operations.
//!
//! Listing parameters are taken as raw text and normalized by
//! `DocumentService`, so a malformed `skip` or `limit` never rejects the
//! request.

use super::{flag, ok_body};
use crate::{
    errors::AppError,
    models::document::Document,
    services::{Gateway, document_service::DocumentQuery},
};
use axum::{
    Form, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Query params accepted by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub skip: Option<String>,
    pub limit: Option<String>,
    pub order_by: Option<String>,
    pub include_id: Option<String>,
}

impl ListParams {
    fn into_query(self, filter: Option<String>) -> DocumentQuery {
        DocumentQuery {
            filter,
            skip: self.skip,
            limit: self.limit,
            order_by: self.order_by,
            include_id: include_id(self.include_id.as_deref()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GetParams {
    #[serde(rename = "includeId")]
    pub include_id: Option<String>,
}

/// `application/x-www-form-urlencoded` body of `POST /document/document-upload`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentUploadForm {
    pub database_name: String,
    pub collection_name: String,
    pub document_id: String,
    pub content: String,
    pub overwrite: Option<String>,
}

/// Only a case-insensitive `true` turns the identifier on.
fn include_id(raw: Option<&str>) -> bool {
    raw.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// GET `/document/{db}/{coll}`
pub async fn list_documents(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>, AppError> {
    let query = params.into_query(None);
    Ok(Json(
        gateway.documents.list(&database, &collection, &query).await?,
    ))
}

/// POST `/document/{db}/{coll}/query`; the body is the filter.
pub async fn query_documents(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    filter: String,
) -> Result<Json<Vec<Document>>, AppError> {
    let query = params.into_query(Some(filter));
    Ok(Json(
        gateway.documents.list(&database, &collection, &query).await?,
    ))
}

pub async fn get_document(
    State(gateway): State<Gateway>,
    Path((database, collection, id)): Path<(String, String, String)>,
    Query(params): Query<GetParams>,
) -> Result<Json<Document>, AppError> {
    let include = include_id(params.include_id.as_deref());
    Ok(Json(
        gateway
            .documents
            .get_by_id(&database, &collection, &id, include)
            .await?,
    ))
}

/// POST `/document/{db}/{coll}`; responds with the new identifier.
pub async fn add_document(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
    body: String,
) -> Result<Json<Value>, AppError> {
    let id = gateway.documents.add(&database, &collection, &body).await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn replace_document(
    State(gateway): State<Gateway>,
    Path((database, collection, id)): Path<(String, String, String)>,
    body: String,
) -> Result<Json<Value>, AppError> {
    gateway
        .documents
        .replace_by_id(&database, &collection, &id, &body)
        .await?;
    Ok(Json(ok_body()))
}

pub async fn delete_document(
    State(gateway): State<Gateway>,
    Path((database, collection, id)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway
        .documents
        .delete_by_id(&database, &collection, &id)
        .await?;
    Ok(Json(ok_body()))
}

/// DELETE `/document/{db}/{coll}`: empties the collection.
pub async fn delete_all_documents(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let deleted = gateway.documents.delete_all(&database, &collection).await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

/// POST `/document/document-upload`
///
/// Replaces `documentId` when the `overwrite` box is ticked, otherwise adds
/// `content` as a new document.
pub async fn document_upload(
    State(gateway): State<Gateway>,
    Form(form): Form<DocumentUploadForm>,
) -> Result<Json<Value>, AppError> {
    if flag(form.overwrite.as_deref()) {
        gateway
            .documents
            .replace_by_id(
                &form.database_name,
                &form.collection_name,
                &form.document_id,
                &form.content,
            )
            .await?;
        return Ok(Json(ok_body()));
    }

    let id = gateway
        .documents
        .add(&form.database_name, &form.collection_name, &form.content)
        .await?;
    Ok(Json(json!({ "id": id })))
}
