use std::net::SocketAddr;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic_reflection::server::Builder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::{FileManagerService, request_id_interceptor};
use api_rest::{AppState, GatewayConfig, router};
use api_shared::FILE_DESCRIPTOR_SET;
use api_shared::pb::file_service_server::FileServiceServer;
use fm_core::CoreConfig;
use fm_core::config::{read_buffer_size_from_env_value, storage_root_from_env_value};

/// Main entry point for the file manager
///
/// Starts both servers concurrently:
/// - gRPC server on port 50051 (configurable via FM_GRPC_ADDR)
/// - REST gateway on port 8080 (configurable via FM_REST_ADDR), forwarding to the gRPC server
///
/// Ctrl-C or SIGTERM stops both servers gracefully.
///
/// # Environment Variables
/// - `FM_STORAGE_DIR`: Storage root (default: "storage")
/// - `FM_READ_BUFFER_KB`: Server read buffer per download chunk (default: 32)
/// - `FM_GRPC_ADDR`: gRPC bind address (default: "0.0.0.0:50051")
/// - `FM_REST_ADDR`: REST bind address (default: "0.0.0.0:8080")
/// - `FM_GRPC_ENDPOINT`: Backend the gateway calls (default: the local gRPC server)
/// - `FM_MAX_UPLOAD_MB`: Multipart body limit (default: 32)
/// - `FM_CHUNK_KB`: Gateway chunk size (default: 32)
/// - `FM_ENABLE_REFLECTION`: Enable gRPC reflection (default: false)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fm_run=info".parse()?)
                .add_directive("api_grpc=info".parse()?)
                .add_directive("api_rest=info".parse()?)
                .add_directive("fm_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let grpc_addr: SocketAddr = std::env::var("FM_GRPC_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:50051".into())
        .parse()?;
    let rest_addr = std::env::var("FM_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

    let core_cfg = CoreConfig::new(
        &storage_root_from_env_value(std::env::var("FM_STORAGE_DIR").ok()),
        read_buffer_size_from_env_value(std::env::var("FM_READ_BUFFER_KB").ok())?,
    )?;
    let gateway_cfg = GatewayConfig::from_env_values(
        Some(
            std::env::var("FM_GRPC_ENDPOINT")
                .unwrap_or_else(|_| format!("http://127.0.0.1:{}", grpc_addr.port())),
        ),
        std::env::var("FM_MAX_UPLOAD_MB").ok(),
        std::env::var("FM_CHUNK_KB").ok(),
    )?;

    tracing::info!("++ Starting file manager gRPC on {}", grpc_addr);
    tracing::info!("++ Starting file manager REST on {}", rest_addr);
    tracing::info!("++ Storage root {}", core_cfg.storage_root().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        shutdown_tx.send(true).ok();
    });

    // Start REST server
    let rest_app = router(
        AppState::connect_lazy(&gateway_cfg)?,
        gateway_cfg.max_upload_bytes(),
    );
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let rest_server = axum::serve(listener, rest_app)
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();

    // Start gRPC server
    let mut grpc_builder = Server::builder().add_service(FileServiceServer::with_interceptor(
        FileManagerService::from_config(&core_cfg),
        request_id_interceptor,
    ));
    if std::env::var("FM_ENABLE_REFLECTION").unwrap_or_else(|_| "false".to_string()) == "true" {
        let reflection_service = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;
        grpc_builder = grpc_builder.add_service(reflection_service);
        tracing::info!("gRPC server reflection enabled");
    }
    let grpc_server = grpc_builder.serve_with_shutdown(grpc_addr, wait_for(shutdown_rx));

    // Run both
    let (rest_result, grpc_result) = tokio::join!(rest_server, grpc_server);
    rest_result.map_err(anyhow::Error::from)?;
    grpc_result.map_err(anyhow::Error::from)?;

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
