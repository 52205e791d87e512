use anyhow::{Context, Result};
use catalog_service::api::{start_api_server, AppState};
use catalog_service::config::{AuditBackend, BlobBackend, Config, StoreBackend};
use catalog_service::{
    AuditEmitter, BlobStore, ItemService, KafkaAuditEmitter, LogAuditEmitter, MemoryBlobStore,
    MemoryRecordStore, PgRecordStore, RecordStore, S3BlobStore, ServiceSettings,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        collection = %config.store.collection,
        "Starting catalog service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store = init_record_store(&config).await?;
    let blobs = init_blob_store(&config).await?;
    let audit = init_audit_emitter(&config)?;

    let service = Arc::new(ItemService::new(
        store,
        blobs,
        audit,
        ServiceSettings::from(&config),
    ));
    let state = AppState::new(service, &config.auth);

    if state.token_key.is_none() {
        warn!("auth.token_secret not set; mutating routes are unauthenticated");
    }

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Catalog service stopped");

    Ok(())
}

async fn init_record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match (config.store.backend, &config.store.database) {
        (StoreBackend::Postgres, Some(database)) => {
            let store = PgRecordStore::new(database)
                .await
                .context("Failed to initialize record store")?;

            // Run migrations if enabled
            if database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Ok(Arc::new(store))
        }
        (StoreBackend::Postgres, None) => {
            anyhow::bail!("store.database is required for the postgres backend")
        }
        (StoreBackend::Memory, _) => {
            warn!("Using in-memory record store; items are lost on restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

async fn init_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    match config.s3.backend {
        BlobBackend::S3 => {
            let store = S3BlobStore::new(&config.s3)
                .await
                .context("Failed to initialize S3 blob store")?;
            Ok(Arc::new(store))
        }
        BlobBackend::Memory => {
            warn!("Using in-memory blob store; images are lost on restart");
            Ok(Arc::new(MemoryBlobStore::new(
                config.s3.public_base_url.clone(),
                config.s3.bucket.clone(),
            )))
        }
    }
}

fn init_audit_emitter(config: &Config) -> Result<Arc<dyn AuditEmitter>> {
    match config.audit.backend {
        AuditBackend::Kafka => {
            let emitter = KafkaAuditEmitter::new(config.audit.kafka.clone())
                .context("Failed to create audit producer")?;
            info!(topic = %config.audit.kafka.topics.audit, "Publishing audit records to Kafka");
            Ok(Arc::new(emitter))
        }
        AuditBackend::Log => Ok(Arc::new(LogAuditEmitter)),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
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
