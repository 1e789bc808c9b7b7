use anyhow::Context;
use dashmart_api::{
    broadcast::Broadcaster,
    config::AppConfig,
    db,
    events::{process_events, EventSender},
    handlers,
    services::{notifications::LogNotifier, payments::HttpPaymentGateway},
};
use std::sync::Arc;
use tokio::{signal, sync::mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config);

    let db = db::establish_connection(&config)
        .await
        .context("connecting to database")?;
    if config.database_url.starts_with("sqlite") {
        db::bootstrap_schema(&db)
            .await
            .context("bootstrapping sqlite schema")?;
    }

    let broadcaster = Arc::new(Broadcaster::new(config.broadcast_capacity));
    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);

    let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
    let state = dashmart_api::build_state(
        db,
        config.clone(),
        gateway,
        event_sender,
        broadcaster.clone(),
    );

    tokio::spawn(process_events(
        event_rx,
        broadcaster,
        Arc::new(LogNotifier),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, environment = %config.environment, "server listening");

    axum::serve(listener, handlers::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install terminate handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
