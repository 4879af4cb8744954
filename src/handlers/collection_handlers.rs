//! HTTP handlers for collection operations.

use super::ok_body;
use crate::{errors::AppError, services::Gateway};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

/// GET `/collection/{db}`: user collections of a database.
pub async fn list_collections(
    State(gateway): State<Gateway>,
    Path(database): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(gateway.collections.list(&database).await?))
}

/// PUT `/collection/{db}/{coll}`
pub async fn create_collection(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway.collections.create(&database, &collection).await?;
    Ok(Json(ok_body()))
}

/// DELETE `/collection/{db}/{coll}`
pub async fn remove_collection(
    State(gateway): State<Gateway>,
    Path((database, collection)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway.collections.remove(&database, &collection).await?;
    Ok(Json(ok_body()))
}
