//! HTTP handlers for database operations.

use super::ok_body;
use crate::{errors::AppError, services::Gateway};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

/// GET `/database`: all database names.
pub async fn list_databases(State(gateway): State<Gateway>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(gateway.databases.list().await?))
}

/// PUT `/database/{db}`: create a database.
pub async fn create_database(
    State(gateway): State<Gateway>,
    Path(database): Path<String>,
) -> Result<Json<Value>, AppError> {
    gateway.databases.create(&database).await?;
    Ok(Json(ok_body()))
}

/// DELETE `/database/{db}`: drop a database and its contents.
pub async fn remove_database(
    State(gateway): State<Gateway>,
    Path(database): Path<String>,
) -> Result<Json<Value>, AppError> {
    gateway.databases.remove(&database).await?;
    Ok(Json(ok_body()))
}

/// GET `/database/{db}/stats`: store-reported usage.
pub async fn database_stats(
    State(gateway): State<Gateway>,
    Path(database): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(gateway.databases.stat(&database).await?))
}
