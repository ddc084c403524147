use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gpuq::config::Config;
use gpuq::core::error::SchedulerError;
use gpuq::core::probe::SmiProbe;
use gpuq::core::scheduler::Scheduler;
use gpuq::core::store::TaskStore;
use gpuq::core::task::{SubmitRequest, TaskSummary};
use gpuq::tmux::TmuxRunner;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};

pub type SharedScheduler = Arc<RwLock<Scheduler>>;

/// Server state: the scheduler behind its state lock, plus the handle used
/// to wake the tick loop right after a submission.
#[derive(Clone)]
struct ServerState {
    scheduler: SharedScheduler,
    notify: Arc<Notify>,
}

#[derive(Deserialize)]
struct LogsQuery {
    tail: Option<usize>,
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let runtime_dir = config.scheduler.resolve_runtime_dir()?;
    std::fs::create_dir_all(&runtime_dir)
        .with_context(|| format!("failed to create runtime dir {}", runtime_dir.display()))?;

    let store_path = config.scheduler.resolve_store_path(&runtime_dir);
    tracing::info!("Opening task store at {}", store_path.display());
    let store = TaskStore::open(&store_path)?;

    let scheduler = Scheduler::builder()
        .with_store(store)
        .with_probe(Arc::new(SmiProbe::new()))
        .with_runner(Arc::new(TmuxRunner))
        .with_runtime_dir(runtime_dir)
        .with_setup_script(config.scheduler.setup_script.clone())
        .with_log_tail(
            config.scheduler.log_tail_default,
            config.scheduler.log_tail_max,
        )
        .build()?;

    let shared = Arc::new(RwLock::new(scheduler));
    let notify = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tick_handle = tokio::spawn(scheduler_loop(
        Arc::clone(&shared),
        Arc::clone(&notify),
        config.scheduler.poll_interval(),
        shutdown_rx,
    ));

    let app = router(ServerState {
        scheduler: shared,
        notify,
    });

    let bind_addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("Listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the tick loop; live tmux sessions are deliberately left running
    // and re-adopted on the next startup.
    let _ = shutdown_tx.send(true);
    let _ = tick_handle.await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/gpus", get(gpu_status))
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/logs", get(task_logs))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .with_state(state);
    Router::new().nest("/api", api)
}

/// Periodic tick driver. A submission wakes it early through `notify`; the
/// tick itself always runs with the state lock held exclusively.
async fn scheduler_loop(
    shared: SharedScheduler,
    notify: Arc<Notify>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = notify.notified() => {
                tracing::debug!("Scheduler woken by submission");
            }
            _ = shutdown.changed() => {
                tracing::info!("Scheduler loop stopping");
                return;
            }
        }

        let mut scheduler = shared.write().await;
        scheduler.scheduling_tick();
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

fn error_response(err: SchedulerError) -> Response {
    let status = match &err {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::IllegalState { .. } => StatusCode::CONFLICT,
        SchedulerError::ProbeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[axum::debug_handler]
async fn health() -> impl IntoResponse {
    let pid = std::process::id();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "pid": pid })),
    )
}

#[axum::debug_handler]
async fn gpu_status(State(state): State<ServerState>) -> Response {
    let scheduler = state.scheduler.read().await;
    match scheduler.gpu_status() {
        Ok(gpus) => (StatusCode::OK, Json(gpus)).into_response(),
        Err(err) => error_response(err),
    }
}

#[axum::debug_handler]
async fn list_tasks(State(state): State<ServerState>) -> Response {
    let scheduler = state.scheduler.read().await;
    match scheduler.list() {
        Ok(tasks) => {
            let summaries: Vec<TaskSummary> = tasks.iter().map(TaskSummary::from).collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[axum::debug_handler]
async fn submit_task(
    State(state): State<ServerState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    tracing::info!(
        name = %request.name,
        gpu_type = %request.gpu_type,
        gpu_count = request.gpu_count,
        "Received task submission"
    );

    let result = {
        let mut scheduler = state.scheduler.write().await;
        scheduler.submit(request)
    };

    match result {
        Ok(task) => {
            // Wake the tick loop so the task can launch without waiting out
            // the poll interval.
            state.notify.notify_one();
            (StatusCode::CREATED, Json(task)).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[axum::debug_handler]
async fn get_task(State(state): State<ServerState>, Path(id): Path<i64>) -> Response {
    let scheduler = state.scheduler.read().await;
    match scheduler.get(id) {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(err) => error_response(err),
    }
}

#[axum::debug_handler]
async fn task_logs(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let scheduler = state.scheduler.read().await;
    match scheduler.logs(id, query.tail) {
        Ok(tail) => (StatusCode::OK, Json(tail)).into_response(),
        Err(err) => error_response(err),
    }
}

#[axum::debug_handler]
async fn cancel_task(State(state): State<ServerState>, Path(id): Path<i64>) -> Response {
    tracing::info!(task_id = id, "Cancelling task");
    let result = {
        let mut scheduler = state.scheduler.write().await;
        scheduler.cancel(id)
    };
    match result {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(err) => error_response(err),
    }
}
