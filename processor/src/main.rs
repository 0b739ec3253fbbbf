use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use std::io;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use db_pool::{create_pool, DbConfig};
use event_processor::consumer::EventsConsumer;
use event_processor::fanout::BroadcastClient;
use event_processor::metrics;
use event_processor::pipeline::Pipeline;
use event_processor::Config;
use event_store::EventStore;

async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "event-processor",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rdkafka=warn,sqlx=warn".into()),
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

    tracing::info!("Starting event-processor v{}", env!("CARGO_PKG_VERSION"));
    if let Some(endpoint) = &config.otel_endpoint {
        tracing::info!(endpoint = %endpoint, "Observability collector configured");
    }

    let db_cfg = match DbConfig::from_env("event-processor") {
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

    let store = EventStore::new(db_pool.clone());
    let sink = BroadcastClient::new(&config.broadcast_sink_url);
    let pipeline = Pipeline::new(store, sink);

    let consumer =
        EventsConsumer::new(&config.kafka, pipeline).context("Consumer creation failed")?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();

    // Consumer loop task
    let consumer_shutdown = shutdown_tx.subscribe();
    tasks.spawn(async move {
        consumer
            .run(consumer_shutdown)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    });

    // Health / metrics sidecar server
    let bind_address = format!("0.0.0.0:{}", config.http_port);
    tracing::info!("Starting health/metrics server at {}", bind_address);

    let server = HttpServer::new(|| {
        App::new()
            .route("/", web::get().to(liveness))
            .route("/health", web::get().to(liveness))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    tasks.spawn(async move { server.await });

    let mut first_error: Option<io::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("Background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("Task returned error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Task join error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                        }
                        let _ = shutdown_tx.send(());
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
                server_handle.stop(true).await;
                // The consumer finishes its current message's terminal
                // transition before observing the signal.
                while let Some(result) = tasks.join_next().await {
                    if let Ok(Err(e)) = result {
                        tracing::error!("Task error during shutdown: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
                break;
            }
        }
    }

    tracing::info!("event-processor shutting down");

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
