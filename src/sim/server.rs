//! HTTP front for a [`Backend`], speaking the same REST dialect as the real
//! server so the console can be pointed at it with `--server`.
//!
//! ## Endpoints
//!
//! - `GET  /api2/json/tape/drive`
//! - `GET  /api2/json/tape/drive/{drive}/status`
//! - `POST /api2/json/tape/drive/{drive}/{command}`
//! - `GET  /api2/json/nodes/{node}/tasks?running=&limit=`
//! - `GET  /api2/json/nodes/{node}/tasks/{upid}/status`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::api::{Backend, Envelope, ErrorBody};
use crate::error::ApiError;

#[derive(Clone)]
struct ServerState {
    backend: Arc<dyn Backend>,
}

/// Build the REST router for `backend`.
pub fn router(backend: Arc<dyn Backend>) -> Router {
    Router::new()
        .route("/api2/json/tape/drive", get(list_drives))
        .route("/api2/json/tape/drive/{drive}/status", get(drive_status))
        .route("/api2/json/tape/drive/{drive}/{command}", post(run_command))
        .route("/api2/json/nodes/{node}/tasks", get(list_tasks))
        .route("/api2/json/nodes/{node}/tasks/{upid}/status", get(task_status))
        .with_state(ServerState { backend })
}

pub struct SimServer {
    bind_addr: SocketAddr,
    backend: Arc<dyn Backend>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SimServer {
    pub fn new(backend: Arc<dyn Backend>, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr,
            backend,
            shutdown_tx,
        }
    }

    /// Bind and serve until [`SimServer::shutdown`] is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Simulated tape API listening");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, router(self.backend.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

struct ApiFailure(ApiError);

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::DriveNotFound(_) | ApiError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Rejected(_) | ApiError::UnknownCommand(_) | ApiError::InvalidUpid(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Transport { .. } | ApiError::Decode { .. } | ApiError::InvalidUrl(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        let body = ErrorBody {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ApiError> for ApiFailure {
    fn from(e: ApiError) -> Self {
        ApiFailure(e)
    }
}

type Reply<T> = Result<Json<Envelope<T>>, ApiFailure>;

fn reply<T: Serialize>(data: T) -> Reply<T> {
    Ok(Json(Envelope { data }))
}

async fn list_drives(State(state): State<ServerState>) -> Reply<Vec<crate::api::Device>> {
    reply(state.backend.list_drives().await?)
}

async fn drive_status(
    State(state): State<ServerState>,
    Path(drive): Path<String>,
) -> Reply<crate::api::DriveStatus> {
    reply(state.backend.drive_status(&drive).await?)
}

async fn run_command(
    State(state): State<ServerState>,
    Path((drive, command)): Path<(String, String)>,
    body: Bytes,
) -> Reply<Value> {
    let params = if body.is_empty() {
        None
    } else {
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Rejected(format!("invalid parameters: {e}")))?;
        Some(value)
    };
    debug!(drive, command, "Command request");
    reply(state.backend.run_command(&drive, &command, params).await?)
}

#[derive(Debug, Deserialize)]
struct TaskQuery {
    #[serde(default)]
    running: u8,
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<ServerState>,
    Path(_node): Path<String>,
    Query(query): Query<TaskQuery>,
) -> Reply<Vec<crate::api::TaskSummary>> {
    let limit = query.limit.unwrap_or(50);
    reply(state.backend.list_tasks(query.running != 0, limit).await?)
}

async fn task_status(
    State(state): State<ServerState>,
    Path((_node, upid)): Path<(String, String)>,
) -> Reply<crate::api::TaskStatus> {
    reply(state.backend.task_status(&upid).await?)
}
