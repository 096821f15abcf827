//! Translation between HTTP bodies and the chunked gRPC calls.
//!
//! Uploads read the multipart `file` part and re-slice it into chunks of the configured size,
//! feeding a client-stream call through a channel. Downloads open a server-stream call, wait
//! for its first message (so a missing file can still become a 404), then copy the remaining
//! messages into the response body through a write buffer of the same size.

use api_shared::pb::{FileChunk, FileRequest, Status, StatusResponse};
use api_shared::REQUEST_ID_HEADER;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::Multipart;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use fm_core::RequestScope;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::Streaming;

use crate::{AppState, GatewayError};

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

/// Chunks buffered between the body reader and the outgoing call.
const CHANNEL_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug)]
pub(crate) enum UploadKind {
    Upload,
    Append,
    Overwrite,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum DownloadKind {
    Download,
    Read,
}

/// Wraps `message` in a gRPC request carrying the scope's request id.
pub(crate) fn scoped_request<T>(
    scope: &RequestScope,
    message: T,
) -> Result<tonic::Request<T>, GatewayError> {
    let id: AsciiMetadataValue = scope
        .request_id()
        .to_string()
        .parse()
        .map_err(|_| GatewayError::Backend(tonic::Status::internal("unencodable request id")))?;

    let mut request = tonic::Request::new(message);
    request.metadata_mut().insert(REQUEST_ID_HEADER, id);
    Ok(request)
}

/// Streams the `file` part of `multipart` to the backend and returns its terminal status.
///
/// Any terminal status other than `STATUS_SUCCESS` becomes [`GatewayError::Rejected`].
pub(crate) async fn upload_multipart(
    state: &AppState,
    scope: &RequestScope,
    kind: UploadKind,
    file_name: String,
    mut multipart: Multipart,
) -> Result<StatusResponse, GatewayError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        return upload_field(state, scope, kind, file_name, field).await;
    }

    Err(GatewayError::MissingFileField(FILE_FIELD))
}

async fn upload_field(
    state: &AppState,
    scope: &RequestScope,
    kind: UploadKind,
    file_name: String,
    mut field: Field<'_>,
) -> Result<StatusResponse, GatewayError> {
    let (tx, rx) = mpsc::channel::<FileChunk>(CHANNEL_DEPTH);
    let request = scoped_request(scope, ReceiverStream::new(rx))?;

    let mut client = state.client();
    let call = tokio::spawn(async move {
        match kind {
            UploadKind::Upload => client.upload(request).await,
            UploadKind::Append => client.append(request).await,
            UploadKind::Overwrite => client.overwrite_file(request).await,
        }
    });

    let sent = match send_field(&mut field, &file_name, state.chunk_size(), &tx).await {
        Ok(sent) => sent,
        Err(e) => {
            // Cancelling the call resets the stream, so the backend never sees a clean end.
            call.abort();
            return Err(e);
        }
    };
    drop(tx);

    let response = call
        .await
        .map_err(|e| GatewayError::Backend(tonic::Status::internal(e.to_string())))??
        .into_inner();

    if response.status() != Status::Success {
        tracing::error!(
            parent: scope.span(),
            file = %file_name,
            chunks = sent,
            status = response.status_name(),
            "backend rejected upload"
        );
        return Err(GatewayError::Rejected(response.status_name()));
    }

    tracing::info!(
        parent: scope.span(),
        file = %file_name,
        chunks = sent,
        status = response.status_name(),
        "upload forwarded"
    );
    Ok(response)
}

/// Re-slices the field into `chunk_size` chunks. An empty part still yields one empty chunk so
/// the backend learns the file name.
///
/// Stops early without error if the backend has already closed the call.
async fn send_field(
    field: &mut Field<'_>,
    file_name: &str,
    chunk_size: usize,
    tx: &mpsc::Sender<FileChunk>,
) -> Result<usize, GatewayError> {
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut sent = 0;

    while let Some(bytes) = field.chunk().await? {
        buf.extend_from_slice(&bytes);
        while buf.len() >= chunk_size {
            let part = buf.split_to(chunk_size);
            if !send_chunk(tx, file_name, &part).await {
                return Ok(sent);
            }
            sent += 1;
        }
    }

    if (!buf.is_empty() || sent == 0) && send_chunk(tx, file_name, &buf).await {
        sent += 1;
    }
    Ok(sent)
}

async fn send_chunk(tx: &mpsc::Sender<FileChunk>, file_name: &str, content: &[u8]) -> bool {
    tx.send(FileChunk {
        file_name: file_name.to_string(),
        content: content.to_vec(),
    })
    .await
    .is_ok()
}

/// Opens a download or read call and turns it into a streaming `application/octet-stream`
/// response.
///
/// Errors before the first message map to HTTP errors (404 for a missing file). Once the body
/// has started, a backend failure can only truncate it: the error is logged and the body ends.
pub(crate) async fn stream_download(
    state: &AppState,
    scope: &RequestScope,
    kind: DownloadKind,
    file_name: String,
) -> Result<Response, GatewayError> {
    let request = scoped_request(scope, FileRequest { file_name })?;
    let mut client = state.client();
    let opened = match kind {
        DownloadKind::Download => client.download(request).await,
        DownloadKind::Read => client.read(request).await,
    };
    let mut stream = opened.map_err(GatewayError::from_read_status)?.into_inner();
    let first = stream
        .message()
        .await
        .map_err(GatewayError::from_read_status)?;

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(CHANNEL_DEPTH);
    tokio::spawn(forward_body(
        scope.clone(),
        first,
        stream,
        tx,
        state.chunk_size(),
    ));

    Response::builder()
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| GatewayError::Write {
            src: "response",
            message: e.to_string(),
        })
}

async fn forward_body(
    scope: RequestScope,
    first: Option<FileChunk>,
    mut stream: Streaming<FileChunk>,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    chunk_size: usize,
) {
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut next = first;
    let mut total: u64 = 0;

    while let Some(chunk) = next {
        total += chunk.content.len() as u64;
        buf.extend_from_slice(&chunk.content);
        if buf.len() >= chunk_size && tx.send(Ok(buf.split().freeze())).await.is_err() {
            let err = GatewayError::Write {
                src: "response",
                message: "client disconnected".into(),
            };
            tracing::warn!(parent: scope.span(), error = %err, "download abandoned");
            return;
        }

        next = match stream.message().await {
            Ok(next) => next,
            Err(status) => {
                let err = GatewayError::Read {
                    src: "stream",
                    message: status.to_string(),
                };
                tracing::error!(parent: scope.span(), error = %err, bytes = total, "download truncated");
                None
            }
        };
    }

    if !buf.is_empty() && tx.send(Ok(buf.freeze())).await.is_err() {
        tracing::debug!(parent: scope.span(), "client gone before the last bytes were sent");
    }
    tracing::info!(parent: scope.span(), bytes = total, "download forwarded");
}
