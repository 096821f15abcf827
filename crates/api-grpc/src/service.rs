//! gRPC binding of the transfer service.

use api_shared::pb::file_service_server::FileService;
use api_shared::pb::{
    self, DirectoryRequest, DirectoryResponse, FileChunk, FileRequest, OperationRequest,
    StatusResponse,
};
use api_shared::REQUEST_ID_HEADER;
use fm_core::{CoreConfig, FileRepository, RequestScope, StorageError, TransferService};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

use crate::transport::{ChannelChunkSink, GrpcChunkSource};

/// Chunks buffered between the file reader task and the response stream.
const STREAM_BUFFER: usize = 4;

type ChunkStream = ReceiverStream<Result<FileChunk, Status>>;

/// Stamps a request id on calls that arrive without one and logs the call start.
#[allow(clippy::result_large_err)]
pub fn request_id_interceptor(mut req: Request<()>) -> Result<Request<()>, Status> {
    if req.metadata().get(REQUEST_ID_HEADER).is_none() {
        let id: AsciiMetadataValue = uuid::Uuid::new_v4()
            .to_string()
            .parse()
            .map_err(|_| Status::internal("failed to encode request id"))?;
        req.metadata_mut().insert(REQUEST_ID_HEADER, id);
    }

    let request_id = req
        .metadata()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::info!(request_id, "request started");

    Ok(req)
}

/// Maps core errors onto gRPC status codes.
pub fn to_status(err: &StorageError) -> Status {
    match err {
        StorageError::NotFound(_) => Status::not_found(err.to_string()),
        StorageError::InvalidPath(_)
        | StorageError::EmptyStream
        | StorageError::MissingParent(_) => Status::invalid_argument(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

fn request_scope<T>(req: &Request<T>, operation: &'static str) -> RequestScope {
    RequestScope::from_header(
        operation,
        req.metadata()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Converts the outcome of a client-stream transfer into its terminal status.
fn terminal_status<T>(scope: &RequestScope, result: fm_core::StorageResult<T>) -> StatusResponse {
    match result {
        Ok(_) => StatusResponse::success(),
        Err(e) => {
            tracing::error!(parent: scope.span(), error = %e, "transfer failed");
            StatusResponse::error()
        }
    }
}

#[derive(Clone, Copy)]
enum SendKind {
    Download,
    Read,
}

#[derive(Debug, Clone)]
pub struct FileManagerService {
    transfer: TransferService,
}

impl FileManagerService {
    pub fn new(transfer: TransferService) -> Self {
        Self { transfer }
    }

    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self::new(TransferService::new(FileRepository::new(cfg)))
    }

    /// Runs the file read on its own task; the returned stream yields chunks as they are read.
    ///
    /// A failure before the first chunk (e.g. a missing file) arrives as the stream's first
    /// item, which lets the gateway answer with a proper status before writing any body.
    fn stream_file(&self, scope: RequestScope, file_name: String, kind: SendKind) -> ChunkStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let transfer = self.transfer.clone();
        let span = scope.span().clone();

        tokio::spawn(
            async move {
                let mut sink = ChannelChunkSink::new(tx.clone());
                let result = match kind {
                    SendKind::Download => transfer.download(&scope, &file_name, &mut sink).await,
                    SendKind::Read => transfer.read(&scope, &file_name, &mut sink).await,
                };

                if let Err(e) = result {
                    tracing::error!(parent: scope.span(), error = %e, "stream failed");
                    if tx.send(Err(to_status(&e))).await.is_err() {
                        tracing::debug!(parent: scope.span(), "client gone before error was sent");
                    }
                }
            }
            .instrument(span),
        );

        ReceiverStream::new(rx)
    }
}

#[tonic::async_trait]
impl FileService for FileManagerService {
    async fn upload(
        &self,
        req: Request<Streaming<FileChunk>>,
    ) -> Result<Response<StatusResponse>, Status> {
        let scope = request_scope(&req, "upload");
        let mut source = GrpcChunkSource::new(req.into_inner());
        let result = self.transfer.upload(&scope, &mut source).await;
        Ok(Response::new(terminal_status(&scope, result)))
    }

    async fn append(
        &self,
        req: Request<Streaming<FileChunk>>,
    ) -> Result<Response<StatusResponse>, Status> {
        let scope = request_scope(&req, "append");
        let mut source = GrpcChunkSource::new(req.into_inner());
        let result = self.transfer.append(&scope, &mut source).await;
        Ok(Response::new(terminal_status(&scope, result)))
    }

    async fn overwrite_file(
        &self,
        req: Request<Streaming<FileChunk>>,
    ) -> Result<Response<StatusResponse>, Status> {
        let scope = request_scope(&req, "overwrite");
        let mut source = GrpcChunkSource::new(req.into_inner());
        let result = self.transfer.overwrite(&scope, &mut source).await;
        Ok(Response::new(terminal_status(&scope, result)))
    }

    type DownloadStream = ChunkStream;

    async fn download(
        &self,
        req: Request<FileRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let scope = request_scope(&req, "download");
        let file_name = req.into_inner().file_name;
        Ok(Response::new(self.stream_file(
            scope,
            file_name,
            SendKind::Download,
        )))
    }

    type ReadStream = ChunkStream;

    async fn read(&self, req: Request<FileRequest>) -> Result<Response<Self::ReadStream>, Status> {
        let scope = request_scope(&req, "read");
        let file_name = req.into_inner().file_name;
        Ok(Response::new(self.stream_file(scope, file_name, SendKind::Read)))
    }

    async fn delete(&self, req: Request<FileRequest>) -> Result<Response<StatusResponse>, Status> {
        let scope = request_scope(&req, "delete");
        let file_name = req.into_inner().file_name;

        self.transfer
            .delete(&scope, &file_name)
            .await
            .map_err(|e| {
                tracing::error!(parent: scope.span(), error = %e, "delete failed");
                to_status(&e)
            })?;

        Ok(Response::new(StatusResponse::success()))
    }

    async fn move_file(
        &self,
        req: Request<OperationRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let scope = request_scope(&req, "move");
        let req = req.into_inner();

        self.transfer
            .move_file(&scope, &req.source, &req.destination)
            .await
            .map_err(|e| {
                tracing::error!(parent: scope.span(), error = %e, "move failed");
                to_status(&e)
            })?;

        Ok(Response::new(StatusResponse::success()))
    }

    async fn list_directory(
        &self,
        req: Request<DirectoryRequest>,
    ) -> Result<Response<DirectoryResponse>, Status> {
        let scope = request_scope(&req, "list");
        let path = req.into_inner().path;

        let entries = self
            .transfer
            .list_directory(&scope, &path)
            .await
            .map_err(|e| {
                tracing::error!(parent: scope.span(), error = %e, "list failed");
                to_status(&e)
            })?;

        Ok(Response::new(DirectoryResponse {
            entries: entries
                .into_iter()
                .map(|e| pb::DirectoryEntry {
                    name: e.name,
                    is_dir: e.is_directory,
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_core::PathError;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    fn service() -> (TempDir, FileManagerService) {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(temp.path(), 4).unwrap();
        (temp, FileManagerService::from_config(&cfg))
    }

    #[test]
    fn test_to_status_codes() {
        assert_eq!(
            to_status(&StorageError::NotFound(PathBuf::from("x"))).code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            to_status(&StorageError::InvalidPath(PathError::Empty)).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            to_status(&StorageError::Transport("x".into())).code(),
            tonic::Code::Internal
        );
    }

    #[test]
    fn test_interceptor_stamps_missing_request_id() {
        let req = request_id_interceptor(Request::new(())).unwrap();
        let id = req.metadata().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_interceptor_keeps_existing_request_id() {
        let mut req = Request::new(());
        req.metadata_mut()
            .insert(REQUEST_ID_HEADER, "upstream-id".parse().unwrap());

        let req = request_id_interceptor(req).unwrap();
        assert_eq!(
            req.metadata().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap(),
            "upstream-id"
        );
    }

    #[tokio::test]
    async fn test_read_streams_chunks() {
        let (temp, svc) = service();
        std::fs::write(temp.path().join("r.txt"), b"hello world").unwrap();

        let stream = svc
            .read(Request::new(FileRequest {
                file_name: "r.txt".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        let chunks: Vec<_> = stream.collect().await;

        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().content)
            .collect();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn test_download_missing_file_yields_not_found() {
        let (_temp, svc) = service();

        let mut stream = svc
            .download(Request::new(FileRequest {
                file_name: "missing.txt".into(),
            }))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().code(), tonic::Code::NotFound);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let (temp, svc) = service();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        std::fs::write(temp.path().join("dir/a.txt"), b"a").unwrap();

        let listed = svc
            .list_directory(Request::new(DirectoryRequest { path: "dir".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.entries.len(), 1);
        assert_eq!(listed.entries[0].name, "a.txt");
        assert!(!listed.entries[0].is_dir);

        let res = svc
            .delete(Request::new(FileRequest {
                file_name: "dir/a.txt".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(res.status_name(), "STATUS_SUCCESS");

        let err = svc
            .delete(Request::new(FileRequest {
                file_name: "dir/a.txt".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_move_file_into_missing_directory_fails() {
        let (temp, svc) = service();
        std::fs::write(temp.path().join("src.txt"), b"data").unwrap();

        let err = svc
            .move_file(Request::new(OperationRequest {
                source: "src.txt".into(),
                destination: "nowhere/dst.txt".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(temp.path().join("src.txt").exists());
    }
}
