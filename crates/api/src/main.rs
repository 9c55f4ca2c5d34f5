use std::sync::Arc;
use std::time::Duration;

use stockgate_api::app::{build_app, build_services};
use stockgate_api::config::ServerConfig;
use stockgate_infra::EngineConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockgate_observability::init();

    let server = ServerConfig::from_env();
    let engine = EngineConfig::from_env();

    let services = Arc::new(build_services(&server, &engine).await?);
    let token = services.shutdown_token();
    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&server.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", server.bind_addr));

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    match Arc::try_unwrap(services) {
        Ok(services) => {
            if tokio::time::timeout(SHUTDOWN_GRACE, services.shutdown()).await.is_err() {
                tracing::warn!("background tasks did not stop within the grace period");
            }
        }
        Err(_) => token.cancel(),
    }

    Ok(())
}
