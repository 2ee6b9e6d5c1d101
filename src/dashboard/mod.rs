use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::dispatcher::{Dispatcher, RegistrationInfo};
use crate::store::StoreError;
use crate::types::{Node, Task};

#[derive(Clone)]
pub struct DashboardState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Durable node record joined with its live registration, if any.
#[derive(Serialize)]
struct NodeView {
    id: String,
    status: String,
    hostname: String,
    version: u64,
    updated_at: String,
    registration: Option<RegistrationInfo>,
}

impl NodeView {
    fn new(node: Node, registration: Option<RegistrationInfo>) -> Self {
        Self {
            id: node.id,
            status: node.status.to_string(),
            hostname: node.description.hostname,
            version: node.version,
            updated_at: node.updated_at.to_rfc3339(),
            registration,
        }
    }
}

#[derive(Serialize)]
struct TaskView {
    id: String,
    node_id: String,
    status: String,
    message: Option<String>,
    version: u64,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            node_id: task.node_id,
            status: task.status.to_string(),
            message: task.message,
            version: task.version,
        }
    }
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Read-only status API over the dispatcher and its store.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/nodes", get(list_nodes_handler))
        .route("/api/nodes/:id", get(get_node_handler))
        .route("/api/tasks", get(list_tasks_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_nodes_handler(State(state): State<DashboardState>) -> Response {
    let nodes = match state.dispatcher.store().list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let views: Vec<NodeView> = nodes
        .into_iter()
        .map(|node| {
            let registration = state.dispatcher.registration(&node.id);
            NodeView::new(node, registration)
        })
        .collect();

    Json(views).into_response()
}

async fn get_node_handler(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> Response {
    match state.dispatcher.store().get_node(&id).await {
        Ok(node) => {
            let registration = state.dispatcher.registration(&node.id);
            Json(NodeView::new(node, registration)).into_response()
        }
        Err(StoreError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, format!("node not found: {}", id))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn list_tasks_handler(State(state): State<DashboardState>) -> Response {
    match state.dispatcher.store().list_tasks().await {
        Ok(tasks) => {
            let views: Vec<TaskView> = tasks.into_iter().map(TaskView::from).collect();
            Json(views).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
