//! Standalone gRPC server binary.
//!
//! The workspace's main `fm-run` binary runs the gRPC server and the HTTP gateway together;
//! this one serves only the native RPC surface.

use std::net::SocketAddr;
use tonic::transport::Server;
use tonic_reflection::server::Builder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::{request_id_interceptor, FileManagerService};
use api_shared::pb::file_service_server::FileServiceServer;
use api_shared::FILE_DESCRIPTOR_SET;
use fm_core::config::{read_buffer_size_from_env_value, storage_root_from_env_value};
use fm_core::CoreConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_grpc=info".parse()?)
                .add_directive("fm_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = std::env::var("FM_GRPC_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:50051".into())
        .parse()?;

    let cfg = CoreConfig::new(
        &storage_root_from_env_value(std::env::var("FM_STORAGE_DIR").ok()),
        read_buffer_size_from_env_value(std::env::var("FM_READ_BUFFER_KB").ok())?,
    )?;

    tracing::info!("-- Starting file manager gRPC on {}", addr);
    tracing::info!("-- Storage root {}", cfg.storage_root().display());

    let mut server_builder = Server::builder().add_service(FileServiceServer::with_interceptor(
        FileManagerService::from_config(&cfg),
        request_id_interceptor,
    ));

    if std::env::var("FM_ENABLE_REFLECTION").unwrap_or_else(|_| "false".to_string()) == "true" {
        let reflection_service = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;
        server_builder = server_builder.add_service(reflection_service);
        tracing::info!("gRPC server reflection enabled");
    } else {
        tracing::info!("gRPC server reflection disabled");
    }

    server_builder
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    Ok(())
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
    tracing::info!("shutting down gRPC server");
}
