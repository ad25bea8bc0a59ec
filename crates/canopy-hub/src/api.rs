use crate::hub::HubHandle;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use canopy_core::wire::{AgentPayload, HealthPayload, WorkspacePayload};
use canopy_core::Snapshot;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// Latest snapshot, replaced wholesale by each discovery pass and read by
/// the pull endpoints.
#[derive(Clone)]
pub struct SharedSnapshot(Arc<RwLock<Arc<Snapshot>>>);

impl SharedSnapshot {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(Arc::new(Snapshot::empty()))))
    }

    pub async fn current(&self) -> Arc<Snapshot> {
        self.0.read().await.clone()
    }

    pub async fn replace(&self, snapshot: Snapshot) {
        *self.0.write().await = Arc::new(snapshot);
    }
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub hub: HubHandle,
    pub snapshot: SharedSnapshot,
}

/// GET /api/workspaces
pub async fn workspaces(State(ctx): State<AppContext>) -> Response {
    let snapshot = ctx.snapshot.current().await;
    let payload: Vec<WorkspacePayload> = snapshot
        .workspaces
        .iter()
        .map(WorkspacePayload::from)
        .collect();
    json_response(&payload)
}

/// GET /api/agents
pub async fn agents(State(ctx): State<AppContext>) -> Response {
    let snapshot = ctx.snapshot.current().await;
    let payload: Vec<AgentPayload> = snapshot.agents.iter().map(AgentPayload::from).collect();
    json_response(&payload)
}

/// GET /api/health
pub async fn health() -> Response {
    json_response(&HealthPayload::ok_now())
}

fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(event = "encode_error", error = %err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
