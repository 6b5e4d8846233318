use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use feedwatch::metrics::register_custom_metrics;
use feedwatch::metrics::REGISTRY;
use feedwatch::utils::file_io::open_file_for_append;
use feedwatch::BatchHandler;
use feedwatch::DbInfo;
use feedwatch::Error;
use feedwatch::Event;
use feedwatch::MemoryChangeLog;
use feedwatch::Result;
use feedwatch::Scheduler;
use feedwatch::SledTokenStore;
use feedwatch::StaticLeadership;
use feedwatch::Task;
use feedwatch::WatchConfig;
use regex::Regex;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Logs every event it receives; stands in for a real consumer.
struct LoggingHandler;

#[async_trait]
impl BatchHandler for LoggingHandler {
    async fn handle_batch(
        &self,
        db: &DbInfo,
        events: &[Event],
    ) -> bool {
        for event in events {
            info!(db = %db.uuid, task = %event.task_id, %event, "event received");
        }
        false
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = WatchConfig::load(None)?;

    // Initializing Logs
    let _guard = init_observability(&settings.monitoring.log_dir, &settings.monitoring.log_level)?;

    if settings.monitoring.metrics_enabled {
        register_custom_metrics(&REGISTRY);
    }

    let store = Arc::new(SledTokenStore::open(&settings.storage.token_db_path)?);
    // Demo source: an empty in-process log; a deployment plugs its change-feed adapter in here.
    let source = Arc::new(MemoryChangeLog::new());
    let oracle = Arc::new(StaticLeadership::default());

    let task = Task::builder("log")
        .collection_regex(Regex::new(".*").map_err(|e| Error::Fatal(e.to_string()))?)
        .handler(Arc::new(LoggingHandler))
        .build()?;

    let mut scheduler = Scheduler::new(settings, source, store, oracle);
    scheduler.add_tasks([task])?;
    scheduler.start().await?;

    info!("Application started. Waiting for CTRL+C signal...");
    if let Err(e) = graceful_shutdown().await {
        error!("Failed to wait for shutdown signal: {:?}", e);
    }

    scheduler.shutdown().await;
    info!("Shutdown completed");
    Ok(())
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    info!("Shutdown watch scheduler..");
    Ok(())
}

pub fn init_observability(
    log_dir: &Path,
    log_level: &str,
) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(&log_dir.join("feedwatch.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| Error::Fatal(format!("invalid log filter {log_level}: {e}")))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(filter);
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
