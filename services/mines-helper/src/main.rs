use anyhow::{Context, Result};
use clap::Parser;
use mines_helper::{
    build_config, Args, MemoryStore, PickupConfig, PostgresPickupSource, PostgresStore,
    RedisPickupSource, SessionCoordinator, SessionStore, SqliteStore, StoreConfig, WsGateway,
};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "mines-helper".to_string());
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("mines-helper");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>> {
    Ok(match config {
        StoreConfig::Memory => {
            warn!("using in-memory store; sessions from other processes are invisible");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::Sqlite(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("open sqlite store at {}", path.display()))?,
        ),
        StoreConfig::Postgres(url) => Arc::new(
            PostgresStore::connect(url)
                .await
                .context("open postgres store")?,
        ),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();
    let config = build_config(&args)?;

    let store = open_store(&config.store).await?;
    let (pickup_tx, pickup_rx) = mpsc::channel(config.channel_buffer);
    let (action_tx, action_rx) = mpsc::channel(config.channel_buffer);

    match &config.pickup {
        PickupConfig::Disabled => warn!("no pickup source configured"),
        PickupConfig::Redis { url, channel } => {
            RedisPickupSource::new(url, channel.clone())
                .context("open redis pickup source")?
                .start(pickup_tx.clone());
        }
        PickupConfig::Postgres { url, channel } => {
            PostgresPickupSource::new(url.clone(), channel.clone())?.start(pickup_tx.clone());
        }
    }
    // Sources hold their own senders; the loop keeps running on actions alone otherwise.
    drop(pickup_tx);

    let gateway = WsGateway::new(action_tx);
    let (coordinator, expiries) =
        SessionCoordinator::new(config.coordinator.clone(), store, Arc::new(gateway.clone()));
    info!(worker_id = coordinator.worker_id(), "mines helper starting");
    let coordinator_task = tokio::spawn(async move {
        coordinator.run(pickup_rx, action_rx, expiries).await;
    });

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    info!(addr = %config.listen, "mines helper listening");

    tokio::select! {
        result = axum::serve(listener, gateway.router()) => result.context("gateway server")?,
        result = coordinator_task => result.context("coordinator task")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
