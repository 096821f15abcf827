//! Standalone HTTP gateway binary.
//!
//! ## Purpose
//! Runs only the gateway, talking to a gRPC backend at `FM_GRPC_ENDPOINT`.
//!
//! ## Intended use
//! Useful when the gRPC server runs as a separate process. The workspace's main `fm-run` binary
//! runs gRPC and REST together.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("fm_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("FM_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let cfg = GatewayConfig::from_env_values(
        std::env::var("FM_GRPC_ENDPOINT").ok(),
        std::env::var("FM_MAX_UPLOAD_MB").ok(),
        std::env::var("FM_CHUNK_KB").ok(),
    )?;

    tracing::info!("-- Starting file manager REST gateway on {}", addr);
    tracing::info!("-- Forwarding to gRPC backend {}", cfg.grpc_endpoint());

    let app = router(AppState::connect_lazy(&cfg)?, cfg.max_upload_bytes());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
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
    tracing::info!("shutting down REST gateway");
}
