use std::sync::Arc;

use n8n_mcp_server::{
    build_app, config::Config, logging, n8n_client::HttpConnector, AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_logging(config.n8n.debug);

    let connector = Arc::new(HttpConnector::new()?);
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(&config, connector)?;
    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(bind_socket).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, bind_socket = %bind_socket, "failed to bind listener");
            return Err(err.into());
        }
    };

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        auth = config.auth_key.is_some(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    sessions.clear().await;
    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and closes open SSE streams.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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

    info!("shutdown signal received");
    shutdown.cancel();
}
