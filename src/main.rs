use std::sync::Arc;

use newsmesh::api::build_router;
use newsmesh::cluster::monitor::HealthMonitor;
use newsmesh::config::ClusterConfig;
use newsmesh::dispatch::dispatcher::Dispatcher;
use newsmesh::dispatch::types::WorkerId;
use newsmesh::store::replication::Replicator;
use newsmesh::store::store::TaskStore;
use newsmesh::store::types::TaskKind;
use newsmesh::worker::agent::WorkerAgent;
use newsmesh::worker::executors::{
    register_crawl_executor, register_remote_executor, register_summarize_executor,
    ExecutorRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut replica_ordinal: Option<usize> = None;
    let mut worker_id: Option<String> = None;
    let mut crawler_endpoint: Option<String> = None;
    let mut summarizer_endpoint: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--replica" => {
                replica_ordinal = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--worker" => {
                worker_id = Some(args[i + 1].clone());
                i += 2;
            }
            "--crawler-endpoint" => {
                crawler_endpoint = Some(args[i + 1].clone());
                i += 2;
            }
            "--summarizer-endpoint" => {
                summarizer_endpoint = Some(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let config = Arc::new(ClusterConfig::from_env()?);

    match (replica_ordinal, worker_id) {
        (Some(ordinal), None) => run_replica(config, ordinal).await,
        (None, Some(id)) => {
            run_worker(config, id, crawler_endpoint, summarizer_endpoint).await
        }
        _ => {
            eprintln!("Usage: {} --replica <ordinal>", args[0]);
            eprintln!(
                "       {} --worker <id> [--crawler-endpoint <url>] [--summarizer-endpoint <url>]",
                args[0]
            );
            std::process::exit(1);
        }
    }
}

async fn run_replica(config: Arc<ClusterConfig>, ordinal: usize) -> anyhow::Result<()> {
    let spec = config
        .replicas
        .get(ordinal)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no replica configured at ordinal {}", ordinal))?;
    tracing::info!("Starting replica {} (ordinal {})", spec.id, ordinal);

    // 1. Leadership and failure detection:
    let monitor = HealthMonitor::new(config.clone(), ordinal).await?;

    // 2. Replicated task store:
    let replicator = Replicator::new(config.clone(), monitor.clone());
    let store = TaskStore::new(config.clone(), monitor.watch(), Some(replicator.clone()));
    replicator.start(store.clone()).await;

    // 3. Worker dispatch:
    let dispatcher = Dispatcher::new(config.clone(), store.clone(), monitor.clone());
    dispatcher.clone().start().await;

    monitor.clone().start().await;

    // 4. Queue depth feeder for heartbeats:
    let depth_monitor = monitor.clone();
    let depth_store = store.clone();
    let depth_interval = config.heartbeat_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(depth_interval);
        loop {
            interval.tick().await;
            depth_monitor.set_queue_depth(depth_store.queue_depth());
        }
    });

    // 5. HTTP surface:
    let app = build_router(store, monitor.clone(), dispatcher);
    let listener = tokio::net::TcpListener::bind(spec.http_addr).await?;
    tracing::info!("HTTP server listening on {}", spec.http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Announce the step-down on shutdown so peers fail over immediately.
    let shutdown_monitor = monitor.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
        shutdown_monitor.step_down().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn run_worker(
    config: Arc<ClusterConfig>,
    id: String,
    crawler_endpoint: Option<String>,
    summarizer_endpoint: Option<String>,
) -> anyhow::Result<()> {
    let worker = WorkerId(id);
    if !config.is_known_worker(&worker) {
        anyhow::bail!("worker {} is not in the configured topology", worker);
    }
    tracing::info!("Starting worker {}", worker);

    let client = reqwest::Client::new();
    let executors = ExecutorRegistry::new(config.executor_timeout);

    match crawler_endpoint {
        Some(endpoint) => {
            register_remote_executor(&executors, TaskKind::Crawl, client.clone(), endpoint)
        }
        None => register_crawl_executor(&executors, client.clone()),
    }
    match summarizer_endpoint {
        Some(endpoint) => {
            register_remote_executor(&executors, TaskKind::Summarize, client, endpoint)
        }
        None => register_summarize_executor(&executors),
    }

    let agent = WorkerAgent::new(worker, config, executors);
    agent.clone().start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    agent.shutdown();
    Ok(())
}
