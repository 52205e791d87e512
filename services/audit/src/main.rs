use anyhow::{Context, Result};
use catalog_audit::{AuditConsumer, AuditProducer, AuditSinkHandler, PgAuditStore, SinkConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SinkConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        topic = %config.kafka.topics.audit,
        group = %config.kafka.consumer.group_id,
        "Starting audit sink"
    );

    let store = PgAuditStore::new(&config.database)
        .await
        .context("Failed to initialize audit store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let dlq_producer = Arc::new(
        AuditProducer::new(config.kafka.clone()).context("Failed to create DLQ producer")?,
    );

    let consumer = AuditConsumer::new(config.kafka.clone())
        .context("Failed to create Kafka consumer")?
        .with_dlq_producer(dlq_producer);
    consumer
        .subscribe_audit()
        .context("Failed to subscribe to audit topic")?;

    let handler = Arc::new(AuditSinkHandler::new(Arc::new(store)));

    let shutdown = consumer.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown.send(());
    });

    if let Err(e) = consumer.run(handler).await {
        error!(error = %e, "Audit consumer error");
        return Err(e.into());
    }

    info!("Audit sink stopped");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
