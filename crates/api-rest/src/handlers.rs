//! HTTP handlers under `/api/v1/files`.

use api_shared::pb::{DirectoryRequest, FileRequest, OperationRequest};
use axum::extract::{Multipart, Query, State};
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::HeaderValue;
use axum::response::{Json, Response};
use fm_core::RequestScope;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::bridge::{self, DownloadKind, UploadKind};
use crate::{AppState, GatewayError};

/// RFC 5987 `attr-char` minus the characters we leave unescaped.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FilePathQuery {
    /// Path of the file relative to the storage root.
    file_path: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MoveQuery {
    /// Current path of the file.
    src_path: Option<String>,
    /// New path of the file; its parent directory must exist.
    dst_path: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Directory to list; `.` lists the storage root.
    path: Option<String>,
}

/// Multipart body accepted by the upload-shaped endpoints.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct FileUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Returns the named query parameter, treating an empty value as absent.
pub fn require_param(name: &'static str, value: Option<String>) -> Result<String, GatewayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingParameter(name))
}

fn status_text(status: &api_shared::StatusResponse) -> String {
    format!("Status: {}", status.status_name())
}

async fn upload_shaped(
    state: AppState,
    kind: UploadKind,
    operation: &'static str,
    query: FilePathQuery,
    multipart: Multipart,
) -> Result<String, GatewayError> {
    let file_name = require_param("file_path", query.file_path)?;
    let scope = RequestScope::new(operation);
    tracing::info!(parent: scope.span(), file = %file_name, "gateway request");

    let status = bridge::upload_multipart(&state, &scope, kind, file_name, multipart).await?;
    Ok(status_text(&status))
}

#[utoipa::path(
    post,
    path = "/api/v1/files/upload",
    params(FilePathQuery),
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "`Status: STATUS_SUCCESS`", body = String),
        (status = 400, description = "Missing `file_path` or malformed multipart body"),
        (status = 500, description = "Backend failure or transfer rejected by the backend")
    )
)]
/// Create or replace a file from the uploaded `file` part.
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    multipart: Multipart,
) -> Result<String, GatewayError> {
    upload_shaped(state, UploadKind::Upload, "upload", query, multipart).await
}

#[utoipa::path(
    post,
    path = "/api/v1/files/append",
    params(FilePathQuery),
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "`Status: STATUS_SUCCESS`", body = String),
        (status = 400, description = "Missing `file_path` or malformed multipart body"),
        (status = 500, description = "Backend failure or transfer rejected by the backend")
    )
)]
/// Append the uploaded `file` part to the end of an existing file.
pub async fn append(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    multipart: Multipart,
) -> Result<String, GatewayError> {
    upload_shaped(state, UploadKind::Append, "append", query, multipart).await
}

#[utoipa::path(
    put,
    path = "/api/v1/files/overwrite",
    params(FilePathQuery),
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "`Status: STATUS_SUCCESS`", body = String),
        (status = 400, description = "Missing `file_path` or malformed multipart body"),
        (status = 500, description = "Backend failure or transfer rejected by the backend")
    )
)]
/// Replace the content of an existing file.
pub async fn overwrite(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    multipart: Multipart,
) -> Result<String, GatewayError> {
    upload_shaped(state, UploadKind::Overwrite, "overwrite", query, multipart).await
}

#[utoipa::path(
    get,
    path = "/api/v1/files/download",
    params(FilePathQuery),
    responses(
        (status = 200, description = "File content as an `application/octet-stream` attachment"),
        (status = 400, description = "Missing `file_path`"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Backend failure")
    )
)]
/// Stream a file back as an attachment.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<Response, GatewayError> {
    let file_name = require_param("file_path", query.file_path)?;
    let scope = RequestScope::new("download");
    tracing::info!(parent: scope.span(), file = %file_name, "gateway request");

    let disposition = content_disposition(&file_name)?;
    let mut response =
        bridge::stream_download(&state, &scope, DownloadKind::Download, file_name).await?;
    response
        .headers_mut()
        .insert(CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/v1/files/read",
    params(FilePathQuery),
    responses(
        (status = 200, description = "File content as `application/octet-stream`"),
        (status = 400, description = "Missing `file_path`"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Backend failure")
    )
)]
/// Stream a file back inline.
pub async fn read(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<Response, GatewayError> {
    let file_name = require_param("file_path", query.file_path)?;
    let scope = RequestScope::new("read");
    tracing::info!(parent: scope.span(), file = %file_name, "gateway request");

    bridge::stream_download(&state, &scope, DownloadKind::Read, file_name).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/files/delete",
    params(FilePathQuery),
    responses(
        (status = 200, description = "`Status: STATUS_SUCCESS`", body = String),
        (status = 400, description = "Missing `file_path`"),
        (status = 500, description = "Backend failure")
    )
)]
/// Delete a file.
pub async fn delete(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<String, GatewayError> {
    let file_name = require_param("file_path", query.file_path)?;
    let scope = RequestScope::new("delete");
    tracing::info!(parent: scope.span(), file = %file_name, "gateway request");

    let request = bridge::scoped_request(&scope, FileRequest { file_name })?;
    let status = state.client().delete(request).await?.into_inner();
    Ok(status_text(&status))
}

#[utoipa::path(
    post,
    path = "/api/v1/files/move",
    params(MoveQuery),
    responses(
        (status = 200, description = "`Status: STATUS_SUCCESS`", body = String),
        (status = 400, description = "Missing `src_path` or `dst_path`"),
        (status = 500, description = "Backend failure")
    )
)]
/// Move or rename a file.
pub async fn move_file(
    State(state): State<AppState>,
    Query(query): Query<MoveQuery>,
) -> Result<String, GatewayError> {
    let source = require_param("src_path", query.src_path)?;
    let destination = require_param("dst_path", query.dst_path)?;
    let scope = RequestScope::new("move");
    tracing::info!(parent: scope.span(), %source, %destination, "gateway request");

    let request = bridge::scoped_request(
        &scope,
        OperationRequest {
            source,
            destination,
        },
    )?;
    let status = state.client().move_file(request).await?.into_inner();
    Ok(status_text(&status))
}

#[utoipa::path(
    get,
    path = "/api/v1/files/list",
    params(ListQuery),
    responses(
        (status = 200, description = "Immediate children of the directory", body = [ListEntry]),
        (status = 400, description = "Missing `path`"),
        (status = 500, description = "Backend failure")
    )
)]
/// List the immediate children of a directory.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ListEntry>>, GatewayError> {
    let path = require_param("path", query.path)?;
    let scope = RequestScope::new("list");
    tracing::info!(parent: scope.span(), %path, "gateway request");

    let request = bridge::scoped_request(&scope, DirectoryRequest { path })?;
    let entries = state
        .client()
        .list_directory(request)
        .await?
        .into_inner()
        .entries
        .into_iter()
        .map(|e| ListEntry {
            name: e.name,
            is_directory: e.is_dir,
        })
        .collect();
    Ok(Json(entries))
}

/// `attachment; filename*=UTF-8''<name>` for the last segment of `file_name`.
fn content_disposition(file_name: &str) -> Result<HeaderValue, GatewayError> {
    let name = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let value = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, FILENAME_ESCAPE)
    );
    HeaderValue::from_str(&value).map_err(|e| GatewayError::Write {
        src: "headers",
        message: e.to_string(),
    })
}
