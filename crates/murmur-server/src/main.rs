use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use murmur_agent::AgentRegistry;
use murmur_auth::TokenAuthority;
use murmur_bus::DeliveryBus;
use murmur_provider::create_provider;
use murmur_queue::MessageQueue;
use murmur_server::config::ServerConfig;
use murmur_server::state::AppState;
use murmur_store::Store;
use murmur_worker::Worker;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur=info,murmurd=info,tower_http=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("MURMUR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("murmur.yaml"));
    let config = ServerConfig::load(&config_path)?;

    let store = Arc::new(Store::open(&config.database_path)?);
    let queue = Arc::new(MessageQueue::open(&config.queue_path)?);
    let bus = Arc::new(DeliveryBus::new(config.bus_capacity));
    let tokens = Arc::new(TokenAuthority::new(
        &config.jwt_secret,
        config.token_ttl_hours,
    ));
    let provider = create_provider(&config.provider)?;
    let registry = Arc::new(AgentRegistry::new(store.clone(), provider));

    let cancel = CancellationToken::new();
    let worker = Worker::new(
        store.clone(),
        queue.clone(),
        registry,
        bus.publisher(),
        config.worker_config(),
    );
    let worker_cancel = cancel.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_cancel).await });

    let state = AppState {
        store,
        queue,
        bus,
        tokens,
    };
    let shutdown_cancel = cancel.clone();
    let shutdown = async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received SIGINT, shutting down...");
        shutdown_cancel.cancel();
    };

    murmur_server::serve(state, &config.bind, shutdown).await?;

    // Let the in-flight message finish before exiting.
    cancel.cancel();
    worker_task.await??;
    Ok(())
}
