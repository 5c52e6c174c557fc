//! Local stand-in for the rendering/staging backend.
//!
//! Serves the same routes the API client calls (see `api::protocol`) from
//! in-memory state, so the poller, the reorder flow and the editor can be run
//! and tested without the real service.
//!
//! ## Behavior
//!
//! - Jobs advance `units_per_poll` units per status request
//! - Every `fail_every`th status request answers 503
//! - Unknown videos are seeded with demo scenes

mod state;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::api::protocol::{CreateJobRequest, ErrorBody, PersistOrderRequest};
use crate::config::SimulatorConfig;
use crate::core::models::{JobStatus, Scene, SubmissionStatus};

pub use state::{SimError, SimState};

/// Shared state for the simulator routes
#[derive(Clone)]
pub struct SimulatorState {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatorState {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// HTTP server for the simulated backend.
pub struct SimulatorServer {
    bind_addr: SocketAddr,
    state: SimulatorState,
    shutdown_tx: broadcast::Sender<()>,
}

impl SimulatorServer {
    pub fn new(config: SimulatorConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr: config.bind,
            state: SimulatorState::new(config),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Backend simulator listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub fn router(state: SimulatorState) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}/status", get(job_status))
        .route("/submissions/{id}", get(submission_status))
        .route("/videos/{id}/scenes", get(list_scenes))
        .route("/videos/{id}/scenes/order", put(persist_order))
        .with_state(state)
}

impl IntoResponse for SimError {
    fn into_response(self) -> Response {
        let status = match self {
            SimError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            SimError::OrderMismatch => StatusCode::CONFLICT,
            SimError::EmptyJob => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

async fn create_job(
    State(state): State<SimulatorState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobStatus>), SimError> {
    let status = state.lock().create_job(request.total)?;
    debug!(job_id = %status.id, total = status.total, "Simulated job created");
    Ok((StatusCode::CREATED, Json(status)))
}

async fn job_status(
    State(state): State<SimulatorState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, SimError> {
    state.lock().job_status(&id).map(Json)
}

async fn submission_status(
    State(state): State<SimulatorState>,
    Path(id): Path<String>,
) -> Result<Json<SubmissionStatus>, SimError> {
    state.lock().submission_status(&id).map(Json)
}

async fn list_scenes(
    State(state): State<SimulatorState>,
    Path(id): Path<String>,
) -> Json<Vec<Scene>> {
    Json(state.lock().scenes(&id))
}

async fn persist_order(
    State(state): State<SimulatorState>,
    Path(id): Path<String>,
    Json(request): Json<PersistOrderRequest>,
) -> Result<StatusCode, SimError> {
    state.lock().persist_order(&id, &request.ordered_ids)?;
    debug!(video_id = %id, count = request.ordered_ids.len(), "Simulated order saved");
    Ok(StatusCode::NO_CONTENT)
}
