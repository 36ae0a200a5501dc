use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use rbac_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    rbac_observability::init(settings.log_format);
    tracing::info!(?settings, "starting rbac server");
    if settings.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set; tokens are signed with an insecure dev default");
    }

    let services = Arc::new(rbac_api::app::services::build_services(&settings).await?);
    let app = rbac_api::app::build_app(services.clone());

    let http_listener = tokio::net::TcpListener::bind(settings.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.http_addr))?;
    let rpc_listener = tokio::net::TcpListener::bind(settings.rpc_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.rpc_addr))?;

    tracing::info!("http gateway listening on {}", http_listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let http = axum::serve(http_listener, app)
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();
    let rpc = rbac_api::rpc::serve(rpc_listener, services, wait_for(shutdown_rx));

    let (http_result, rpc_result) = tokio::join!(http, rpc);
    http_result.context("http gateway failed")?;
    rpc_result.context("rpc gateway failed")?;

    tracing::info!("stopped");
    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
