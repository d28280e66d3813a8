use anyhow::Context;
use launchpad_agent::ServerController;
use launchpad_control::{routes, settings::ControlSettings, state::AppState};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = ControlSettings::from_env()?;
    let controller =
        ServerController::new(settings.agent).context("initialize server controller")?;
    tracing::info!(
        server_dir = %controller.settings().layout.dir().display(),
        jar_url = %controller.settings().jar_url,
        "server controller ready"
    );

    let app = routes::router(AppState::new(controller.clone()));

    let addr = settings.bind;
    tracing::info!(%addr, "launchpad-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    if let Err(e) = controller.shutdown().await {
        tracing::warn!(error = %e, "server did not stop cleanly");
    }

    Ok(())
}
