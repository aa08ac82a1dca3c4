use anyhow::{Context, Result};
use event_processor_service::{
    AcknowledgeHandler, Config, EventConsumer, HandlerRegistry, KafkaMessageSource, PipelineHandle,
};
use event_schema::{EventType, SchemaValidator};
use tracing::{info, warn};

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "event_processor_service=info,event_schema=info,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting Event Processor Service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.kafka.brokers,
        group_id = %config.kafka.group_id,
        topics = ?config.kafka.topics,
        max_retries = config.retry.max_retries(),
        dlq_max_size = config.dlq.max_size,
        "Configuration loaded"
    );

    let validator = match &config.schema.dir {
        Some(dir) => SchemaValidator::from_dir(dir)
            .with_context(|| format!("Failed to load schemas from {}", dir.display()))?,
        None => {
            warn!("SCHEMA_DIR not set, schema validation disabled");
            SchemaValidator::new()
        }
    };

    let mut registry = HandlerRegistry::new();
    for event_type in EventType::ALL {
        registry.register(event_type, AcknowledgeHandler::new());
    }

    let source =
        KafkaMessageSource::connect(&config.kafka).context("Failed to connect to Kafka")?;

    let mut consumer = EventConsumer::new(
        source,
        registry,
        validator,
        config.retry.clone(),
        config.consumer_options(),
        config.dlq.max_size,
    );
    let handle = consumer.handle();

    tokio::spawn(stop_on_signal(handle.clone()));

    consumer.run().await;

    info!(
        statistics = %serde_json::to_string(&handle.get_statistics())
            .unwrap_or_else(|_| "unavailable".to_string()),
        "Event Processor Service shut down"
    );
    Ok(())
}

async fn stop_on_signal(handle: PipelineHandle) {
    shutdown_signal().await;
    info!("Shutdown signal received");
    handle.stop();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
