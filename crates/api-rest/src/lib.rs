//! # API REST
//!
//! HTTP gateway for the file manager.
//!
//! Handles:
//! - HTTP endpoints with axum under [`BASE_PATH`]
//! - Bridging multipart uploads and streamed downloads onto the gRPC `FileService`
//! - OpenAPI/Swagger documentation and CORS
//!
//! The gateway holds no storage of its own; every request becomes one call against the
//! backend described by [`GatewayConfig`].

#![warn(rust_2018_idioms)]

mod bridge;
pub mod config;
pub mod error;
pub mod handlers;

pub use bridge::FILE_FIELD;
pub use config::GatewayConfig;
pub use error::GatewayError;

use api_shared::pb::file_service_client::FileServiceClient;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tonic::transport::{Channel, Endpoint};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub const BASE_PATH: &str = "/api/v1/files";

/// State shared by all handlers: a cloneable gRPC client and the chunk size.
#[derive(Clone)]
pub struct AppState {
    client: FileServiceClient<Channel>,
    chunk_size: usize,
}

impl AppState {
    pub fn new(client: FileServiceClient<Channel>, chunk_size: usize) -> Self {
        Self { client, chunk_size }
    }

    /// Builds state around a lazily connecting channel to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URI is invalid. Connection failures surface per call.
    pub fn connect_lazy(cfg: &GatewayConfig) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(cfg.grpc_endpoint().to_string())?.connect_lazy();
        Ok(Self::new(FileServiceClient::new(channel), cfg.chunk_size()))
    }

    pub(crate) fn client(&self) -> FileServiceClient<Channel> {
        self.client.clone()
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload,
        handlers::append,
        handlers::overwrite,
        handlers::download,
        handlers::read,
        handlers::delete,
        handlers::move_file,
        handlers::list,
    ),
    components(schemas(handlers::ListEntry, handlers::FileUpload))
)]
pub struct ApiDoc;

/// Builds the gateway router with its body limit, CORS and Swagger UI.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let files = Router::new()
        .route("/upload", post(handlers::upload))
        .route("/append", post(handlers::append))
        .route("/overwrite", put(handlers::overwrite))
        .route("/download", get(handlers::download))
        .route("/read", get(handlers::read))
        .route("/delete", delete(handlers::delete))
        .route("/move", post(handlers::move_file))
        .route("/list", get(handlers::list));

    Router::new()
        .nest(BASE_PATH, files)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
