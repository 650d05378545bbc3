//! Admin API Server
//!
//! HTTP API for operators: inspect topologies and their published endpoints,
//! read recent run events, request a manual failover, resolve a halted
//! topology and change membership.

use crate::application::{CoordinatorSupervisor, EndpointRouter, TopologyView};
use crate::domain::entities::Replica;
use crate::domain::errors::FailoverError;
use crate::domain::ports::EventSink;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Manual failover request.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverRequest {
    pub candidate_replica_id: String,
}

/// Operator declaration of the true primary.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub primary_replica_id: String,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub topologies: usize,
}

/// One line of the topology listing.
#[derive(Debug, Serialize)]
pub struct TopologySummary {
    pub id: String,
    pub state: String,
    pub primary: Option<String>,
    pub replicas: usize,
}

#[derive(Debug, Serialize)]
pub struct TopologiesListResponse {
    pub topologies: Vec<TopologySummary>,
    pub total: usize,
}

/// API Server state.
#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<CoordinatorSupervisor>,
    pub router: Arc<EndpointRouter>,
    pub events: Arc<dyn EventSink>,
}

impl ApiState {
    pub fn new(
        supervisor: Arc<CoordinatorSupervisor>,
        router: Arc<EndpointRouter>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            supervisor,
            router,
            events,
        }
    }
}

/// Admin API server.
pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(listen_addr: String, state: ApiState) -> Self {
        Self { listen_addr, state }
    }

    /// Build the router with every admin route.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/v1/topologies", get(list_topologies_handler))
            .route("/api/v1/topologies/:id", get(get_topology_handler))
            .route("/api/v1/topologies/:id/endpoints", get(endpoints_handler))
            .route("/api/v1/topologies/:id/events", get(events_handler))
            .route("/api/v1/topologies/:id/failover", post(failover_handler))
            .route("/api/v1/topologies/:id/resolve", post(resolve_handler))
            .route("/api/v1/topologies/:id/replicas", post(add_replica_handler))
            .route(
                "/api/v1/topologies/:id/replicas/:replica_id",
                delete(remove_replica_handler),
            )
            .with_state(state)
    }

    /// Serve until the listener fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Self::router(self.state.clone()).layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("admin API listening on {}", self.listen_addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error_status(e: &FailoverError) -> StatusCode {
    match e {
        FailoverError::UnknownTopology(_) | FailoverError::UnknownReplica { .. } => {
            StatusCode::NOT_FOUND
        }
        FailoverError::IneligibleCandidate { .. }
        | FailoverError::InvariantViolation { .. }
        | FailoverError::FailoverInProgress(_) => StatusCode::CONFLICT,
        FailoverError::InvalidTopology(_) | FailoverError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: FailoverError) -> (StatusCode, Json<serde_json::Value>) {
    (
        error_status(&e),
        Json(serde_json::json!({
            "error": e.to_string(),
            "kind": e.kind(),
        })),
    )
}

fn view_response(view: TopologyView) -> (StatusCode, Json<serde_json::Value>) {
    match serde_json::to_value(view) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

// Handler functions

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        topologies: state.supervisor.len(),
    })
}

async fn list_topologies_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let topologies: Vec<TopologySummary> = state
        .supervisor
        .topology_ids()
        .into_iter()
        .filter_map(|id| state.supervisor.get(&id).ok())
        .map(|c| {
            let view = c.view();
            TopologySummary {
                state: serde_json::to_value(&view.state)
                    .ok()
                    .and_then(|v| v.get("state").and_then(|s| s.as_str()).map(String::from))
                    .unwrap_or_default(),
                primary: view.primary().map(|r| r.id.clone()),
                replicas: view.replicas.len(),
                id: view.topology_id,
            }
        })
        .collect();
    let total = topologies.len();
    Json(TopologiesListResponse { topologies, total })
}

async fn get_topology_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.supervisor.get(&id) {
        Ok(coordinator) => view_response(coordinator.view()),
        Err(e) => error_response(e),
    }
}

async fn endpoints_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.supervisor.get(&id) {
        return error_response(e);
    }
    match state.router.routes(&id) {
        Some(routes) => (StatusCode::OK, Json(serde_json::json!(routes))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "id": id,
                "error": "routes not published yet"
            })),
        ),
    }
}

async fn events_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.supervisor.get(&id) {
        return error_response(e);
    }
    let events = state.events.recent(&id);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": id,
            "total": events.len(),
            "events": events,
        })),
    )
}

async fn failover_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<FailoverRequest>,
) -> impl IntoResponse {
    let result = state
        .supervisor
        .get(&id)
        .and_then(|c| c.request_failover(&req.candidate_replica_id));

    match result {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "id": id,
                "candidate_replica_id": req.candidate_replica_id,
                "accepted": true
            })),
        ),
        Err(e) => error_response(e),
    }
}

async fn resolve_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    let coordinator = match state.supervisor.get(&id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    match coordinator.resolve_halt(&req.primary_replica_id).await {
        Ok(()) => view_response(coordinator.view()),
        Err(e) => error_response(e),
    }
}

async fn add_replica_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(replica): Json<Replica>,
) -> impl IntoResponse {
    let coordinator = match state.supervisor.get(&id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    match coordinator.add_secondary(replica, Utc::now()).await {
        Ok(()) => {
            let (_, body) = view_response(coordinator.view());
            (StatusCode::CREATED, body)
        }
        Err(e) => error_response(e),
    }
}

async fn remove_replica_handler(
    State(state): State<ApiState>,
    Path((id, replica_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let coordinator = match state.supervisor.get(&id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    match coordinator.remove_secondary(&replica_id).await {
        Ok(removed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "removed": removed.id
            })),
        ),
        Err(e) => error_response(e),
    }
}
