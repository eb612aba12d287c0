//! Webhook service entry point

use anyhow::Context;
use billing_core::config::EngineConfig;
use billing_core::store::{
    InMemoryAccountRepo, InMemoryAttemptRepo, InMemoryProfileRepo, InMemoryWebhookEventRepo,
};
use billing_core::InMemoryBlacklist;
use billing_engine::{ChargebackProcessor, Dispatcher, ReconciliationSweeper};
use gateway_client::GatewayClient;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webhook_service::{http, queue::JobQueue, AppState, WebhookIngestor, WebhookProcessor, Worker};

const WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => EngineConfig::from_env().context("loading configuration from environment")?,
    };
    config.validate().context("validating configuration")?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        gateway = %config.gateway.endpoint,
        "Starting webhook service"
    );

    let accounts = Arc::new(InMemoryAccountRepo::new());
    let profiles = Arc::new(InMemoryProfileRepo::new());
    let attempts = Arc::new(InMemoryAttemptRepo::new());
    let events = Arc::new(InMemoryWebhookEventRepo::new());
    let blacklist = Arc::new(InMemoryBlacklist::new());

    let gateway = Arc::new(GatewayClient::new(&config.gateway)?);

    let chargebacks = Arc::new(ChargebackProcessor::new(
        config.webhook.clone(),
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        events.clone(),
        blacklist.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        gateway.clone(),
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        blacklist.clone(),
    ));
    let sweeper = Arc::new(ReconciliationSweeper::new(
        config.reconciliation.clone(),
        gateway.clone(),
        accounts.clone(),
        attempts.clone(),
        chargebacks.clone(),
    ));
    let processor = Arc::new(WebhookProcessor::new(
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        events.clone(),
        chargebacks.clone(),
    ));

    let queue = JobQueue::new();
    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for id in 0..WORKER_COUNT {
        let worker = Worker::new(
            id,
            config.webhook.clone(),
            queue.clone(),
            processor.clone(),
            Some(dispatcher.clone()),
            Some(sweeper.clone()),
            events.clone(),
        );
        workers.push(tokio::spawn(worker.run()));
    }

    let ingestor = Arc::new(WebhookIngestor::new(
        config.webhook.clone(),
        events.clone(),
        queue.clone(),
    ));
    let app = http::router(AppState { ingestor });

    let addr = std::env::var("BILLING_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, workers = WORKER_COUNT, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("serving")?;

    // Let in-flight jobs drain before exit
    queue.close();
    for worker in workers {
        let _ = worker.await;
    }
    info!("Webhook service stopped");
    Ok(())
}
