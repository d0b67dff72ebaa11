//! Process assembly: facades, broker, workers, control surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::config::Settings;
use crate::llm::LlmGateway;
use crate::orchestrator::{self, Orchestrator};
use crate::persistence::SupabaseFacade;
use crate::queue::{names, Broker, InMemoryBroker, Worker};
use crate::server::{self, AppState};
use crate::services::Billing;
use crate::storage::{FileCache, HttpStorageFacade};
use crate::subtasks::{concurrency_for, handler_for, SubtaskContext};
use crate::tools::{check_binary, OfficeToolkit, PdfToolkit, TesseractTool};

const ORCHESTRATOR_CONCURRENCY: usize = 5;
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the worker process until a shutdown signal arrives.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let settings = Arc::new(settings);
    info!(
        "Starting docgather engine v{} (broker: {})",
        settings.worker_version,
        settings.redis_url.as_deref().unwrap_or("in-process")
    );

    // External tools are only reached when their MIME families show up;
    // warn early so a missing install doesn't surface as job failures.
    for binary in ["docgather-pdf", "soffice", "mutool", "tesseract"] {
        if !check_binary(binary) {
            tracing::warn!("{} not found on PATH; dependent subtasks will fail", binary);
        }
    }

    let storage = Arc::new(HttpStorageFacade::new(
        &settings.worker_url,
        &settings.worker_api_key,
    ));
    let files = Arc::new(FileCache::new(storage, settings.file_cache_keep_on_disk));
    files.spawn_sweeper(CACHE_SWEEP_INTERVAL, crate::storage::DEFAULT_MAX_AGE);

    let db: Arc<dyn crate::persistence::PersistenceFacade> = Arc::new(SupabaseFacade::new(
        &settings.supabase_url,
        &settings.sb_secret_key,
    ));
    let llm: Arc<dyn crate::llm::LlmService> = Arc::new(LlmGateway::new(settings.clone()));
    let billing = Arc::new(Billing::new(db.clone()));

    let broker: Arc<dyn Broker> = InMemoryBroker::new();
    broker
        .set_final_failure_handler(
            names::ORCHESTRATOR,
            orchestrator::failure_handler(db.clone(), settings.worker_version.clone()),
        )
        .await;

    let ctx = Arc::new(SubtaskContext {
        settings: settings.clone(),
        files,
        db,
        llm,
        broker: broker.clone(),
        billing,
        pdf: PdfToolkit::new(),
        office: OfficeToolkit::new(),
        tesseract: TesseractTool::new(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    let orchestrator_worker = Worker::new(
        broker.clone(),
        names::ORCHESTRATOR,
        ORCHESTRATOR_CONCURRENCY,
        Arc::new(Orchestrator::new(ctx.clone())),
    );
    worker_handles.extend(orchestrator_worker.start(shutdown_rx.clone()));

    for queue in names::SUBTASKS {
        let worker = Worker::new(
            broker.clone(),
            *queue,
            concurrency_for(queue),
            handler_for(queue, ctx.clone()),
        );
        worker_handles.extend(worker.start(shutdown_rx.clone()));
    }

    let state = AppState {
        broker: broker.clone(),
        settings: settings.clone(),
    };
    let server_shutdown = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.changed().await;
        }
    };
    let server_handle = tokio::spawn(server::serve(state, server_shutdown));

    wait_for_signal().await;
    info!("Shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = server_handle.await;
    info!("Engine stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
