//! HTTP handlers for buckets and the files stored in them.
//!
//! Raw-body uploads stream straight into the chunk writer. Multipart form
//! uploads buffer each part, since the database and bucket fields may arrive
//! after the files they apply to. Both are bounded by the request body limit
//! layered onto the router; crossing it answers 413.

use super::ok_body;
use crate::{
    errors::AppError,
    models::file::FileInfo,
    services::{Gateway, GatewayResult, file_service::bytes_stream},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http_body_util::LengthLimitError;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, error, warn};

/// RFC 5987 `attr-char`: everything else in an extended value is escaped.
const RFC5987_ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// GET `/gridfs/{db}`: bucket names.
pub async fn list_buckets(
    State(gateway): State<Gateway>,
    Path(database): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(gateway.files.list_buckets(&database).await?))
}

/// POST `/gridfs/{db}/{bucket}`
pub async fn create_bucket(
    State(gateway): State<Gateway>,
    Path((database, bucket)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway.files.create_bucket(&database, &bucket).await?;
    Ok(Json(ok_body()))
}

/// DELETE `/gridfs/{db}/{bucket}`
pub async fn remove_bucket(
    State(gateway): State<Gateway>,
    Path((database, bucket)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway.files.remove_bucket(&database, &bucket).await?;
    Ok(Json(ok_body()))
}

/// GET `/gridfs/{db}/{bucket}`: metadata of every file in the bucket.
pub async fn list_files(
    State(gateway): State<Gateway>,
    Path((database, bucket)): Path<(String, String)>,
) -> Result<Json<Vec<FileInfo>>, AppError> {
    Ok(Json(gateway.files.list_files(&database, &bucket).await?))
}

/// DELETE `/gridfs/{db}/{bucket}/files`: empties the bucket, keeps it.
pub async fn remove_all_files(
    State(gateway): State<Gateway>,
    Path((database, bucket)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let removed = gateway.files.remove_all_files(&database, &bucket).await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

/// POST `/gridfs/form-upload`
///
/// Form fields: `databaseName`, `bucketName`, `overwrite` (a checkbox; its
/// presence alone means true) and one or more `inputFile` parts. A part that
/// cannot be stored for lack of a database, bucket or file name is skipped.
/// Responds with the identifier of the last stored file.
pub async fn form_upload(
    State(gateway): State<Gateway>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut database = String::new();
    let mut bucket = String::new();
    let mut overwrite = false;
    let mut parts: Vec<(Option<String>, Bytes)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "databaseName" => database = read_text(field).await?,
            "bucketName" => bucket = read_text(field).await?,
            "overwrite" => overwrite = true,
            "inputFile" => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                parts.push((file_name, data));
            }
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }

    let mut last_id = None;
    for (file_name, data) in parts {
        if database.is_empty() {
            error!("Could not save file without a database specified.");
            continue;
        }
        if bucket.is_empty() {
            error!("Could not save file without a bucket specified.");
            continue;
        }
        let Some(file_name) = file_name.filter(|n| !n.is_empty()) else {
            error!("Could not save file without a filename.");
            continue;
        };

        let id = gateway
            .files
            .upload(&database, &bucket, &file_name, overwrite, bytes_stream(data))
            .await?;
        last_id = Some(id);
    }

    Ok(Json(json!({ "id": last_id })))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(multipart_error)
}

/// A body cut off by the size limit is 413; any other decoding failure is
/// the client's malformed form.
fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large()
    } else {
        AppError::bad_request(err.body_text())
    }
}

/// POST `/gridfs/{db}/{bucket}/{file}`: store the body unless the name is taken.
pub async fn upload_if_absent(
    State(gateway): State<Gateway>,
    Path((database, bucket, file_name)): Path<(String, String, String)>,
    body: Body,
) -> Result<Json<Value>, AppError> {
    let (content, truncated) = body_stream(body);
    let result = gateway
        .files
        .upload_if_absent(&database, &bucket, &file_name, content)
        .await;
    let id = within_limit(result, &truncated)?;
    Ok(Json(json!({ "id": id })))
}

/// PUT `/gridfs/{db}/{bucket}/{file}`: create or replace.
pub async fn upsert_file(
    State(gateway): State<Gateway>,
    Path((database, bucket, file_name)): Path<(String, String, String)>,
    body: Body,
) -> Result<Json<Value>, AppError> {
    let (content, truncated) = body_stream(body);
    let result = gateway
        .files
        .upsert_by_name(&database, &bucket, &file_name, content)
        .await;
    let id = within_limit(result, &truncated)?;
    Ok(Json(json!({ "id": id })))
}

/// The request body as a byte stream, plus a flag raised if the body limit
/// cut the stream short.
fn body_stream(body: Body) -> (impl Stream<Item = io::Result<Bytes>> + Send, Arc<AtomicBool>) {
    let truncated = Arc::new(AtomicBool::new(false));
    let flag = truncated.clone();
    let stream = body.into_data_stream().map(move |chunk| {
        chunk.map_err(|err| {
            let err = err.into_inner();
            if err.is::<LengthLimitError>() {
                flag.store(true, Ordering::Relaxed);
            }
            io::Error::other(err)
        })
    });
    (stream, truncated)
}

/// A failure caused by the body limit is reported as 413 rather than as the
/// store fault it surfaced as.
fn within_limit<T>(result: GatewayResult<T>, truncated: &AtomicBool) -> Result<T, AppError> {
    result.map_err(|err| {
        if truncated.load(Ordering::Relaxed) {
            warn!("upload rejected: body exceeds the configured limit");
            AppError::payload_too_large()
        } else {
            err.into()
        }
    })
}

/// GET `/gridfs/{db}/{bucket}/{file}`
pub async fn download_file(
    State(gateway): State<Gateway>,
    Path((database, bucket, file_name)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let envelope = gateway
        .files
        .download(&database, &bucket, &file_name)
        .await?;

    let mut response = Response::new(Body::from(envelope.bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    let content_type = HeaderValue::from_str(&envelope.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Ok(disposition) = HeaderValue::from_str(&inline_disposition(&envelope.name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

/// `inline` disposition naming the file. Printable ASCII names are quoted
/// as-is; anything else also gets an RFC 5987 `filename*` with the UTF-8
/// name percent-encoded, next to an ASCII stand-in.
fn inline_disposition(name: &str) -> String {
    let printable = |c: char| c.is_ascii() && !c.is_ascii_control();
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if printable(c) => c,
            _ => '_',
        })
        .collect();

    if name.chars().all(printable) && !name.contains(['"', '\\']) {
        format!("inline; filename=\"{}\"", fallback)
    } else {
        format!(
            "inline; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            utf8_percent_encode(name, RFC5987_ATTR_CHAR)
        )
    }
}

/// DELETE `/gridfs/{db}/{bucket}/{file}`
pub async fn remove_file(
    State(gateway): State<Gateway>,
    Path((database, bucket, file_name)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    gateway
        .files
        .remove_by_name(&database, &bucket, &file_name)
        .await?;
    Ok(Json(ok_body()))
}
