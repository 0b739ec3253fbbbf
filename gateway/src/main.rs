use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use db_pool::{create_pool, DbConfig};
use idempotency_registry::IdempotencyRegistry;
use ingest_gateway::handlers;
use ingest_gateway::metrics;
use ingest_gateway::producer::EventProducer;
use ingest_gateway::Config;

/// Request bodies above this are rejected at the transport layer.
const MAX_BODY_BYTES: usize = 256 * 1024;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting ingest-gateway v{}", env!("CARGO_PKG_VERSION"));
    if let Some(endpoint) = &config.otel_endpoint {
        tracing::info!(endpoint = %endpoint, "Observability collector configured");
    }

    let db_cfg = match DbConfig::from_env("ingest-gateway") {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Database configuration failed: {}", e);
            std::process::exit(1);
        }
    };
    db_cfg.log_config();

    let db_pool = match create_pool(db_cfg).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {:#}", e);
            std::process::exit(1);
        }
    };

    event_store::ensure_schema(&db_pool)
        .await
        .context("Schema creation failed")?;

    let registry = IdempotencyRegistry::new(db_pool.clone());
    let producer = EventProducer::new(&config.kafka.brokers, &config.kafka.events_topic)
        .context("Producer creation failed")?;

    let registry_data = web::Data::new(registry);
    let producer_data = web::Data::new(producer);
    let pool_data = web::Data::new(db_pool);

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {}", bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
            .app_data(registry_data.clone())
            .app_data(producer_data.clone())
            .app_data(pool_data.clone())
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/", web::get().to(handlers::liveness))
            .route("/health", web::get().to(handlers::liveness))
            .route("/health/ready", web::get().to(handlers::readiness))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/v1/events", web::post().to(handlers::ingest_event))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received; draining in-flight requests");
    // Graceful stop: stop accepting, wait for in-flight requests, then the
    // producer drops (flushing its queue) on exit.
    server_handle.stop(true).await;

    server_task
        .await
        .context("HTTP server task failed")?
        .context("HTTP server error")?;
    Ok(())
}
