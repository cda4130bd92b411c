use std::env;

use mailback_core::{
    Config, authorize, build_processor, init_telemetry, resolve_reply_identity, run_scheduler,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("mailback/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let client = match authorize(&config, http).await {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "authorization failed");
            return Err(err.into());
        }
    };
    let identity = match resolve_reply_identity(&client, &config.reply).await {
        Ok(identity) => identity,
        Err(err) => {
            error!(error = %err, "could not resolve reply identity");
            return Err(err.into());
        }
    };
    let processor = build_processor(&config, client, identity);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    info!(config = %config_path, "mailback agent started");
    let cycles = run_scheduler(&processor, config.schedule.scheduler(), shutdown).await;
    info!(cycles, "mailback agent stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, finishing current cycle");
        }
        _ = terminate => {
            warn!("received terminate signal, finishing current cycle");
        }
    }

    shutdown.cancel();
}
