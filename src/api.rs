use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};

use crate::config::OpsConfig;
use crate::crisis::{CrisisEngine, CrisisOutcome, DivertedView, FuelQueueView, PenaltySummary};
use crate::error::OpsError;
use crate::registry::{MemoryRegistry, Registry};
use crate::turnaround::{DashboardSummary, TurnaroundService};
use crate::types::{
    AssignGateRequest, CreateFlightRequest, CrisisState, Flight, FlightId, FlightQuery, Gate,
    GateId, PredictRequest, PredictionResult, SimulationResult,
};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TurnaroundService>,
    pub crisis: Arc<CrisisEngine>,
    pub config: Arc<OpsConfig>,
}

impl AppState {
    /// Wires the in-memory registry, crisis engine and turnaround service.
    pub fn new(config: OpsConfig) -> Self {
        let config = Arc::new(config);
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::with_gates(&config.gates));
        let crisis = Arc::new(CrisisEngine::new(registry.clone(), config.clone()));
        let service = Arc::new(TurnaroundService::new(registry, config.clone(), crisis.clone()));
        Self {
            service,
            crisis,
            config,
        }
    }
}

// ---------- Errors ----------

#[derive(Debug)]
pub enum ApiError {
    Ops(OpsError),
    Body(String),
}

impl From<OpsError> for ApiError {
    fn from(err: OpsError) -> Self {
        ApiError::Ops(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Body(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Ops(OpsError::InvalidParameters { field, reason }) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("invalid {}: {}", field, reason), "field": field }),
            ),
            ApiError::Ops(e @ OpsError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, json!({ "error": e.to_string() }))
            }
            ApiError::Ops(e @ OpsError::ConflictState(_)) => {
                (StatusCode::CONFLICT, json!({ "error": e.to_string() }))
            }
            ApiError::Ops(e @ OpsError::InternalComputation(_)) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------- Response types ----------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisStatusOut {
    pub active: bool,
    pub state: Option<CrisisState>,
}

#[derive(Serialize)]
pub struct AssignOut {
    pub gate: Gate,
    pub flight: Flight,
}

#[derive(Serialize)]
pub struct ReleaseOut {
    pub gate: Gate,
    pub flight: Option<Flight>,
}

// ---------- Handlers ----------

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<PredictionResult> {
    let Json(req) = payload?;
    let out = state.service.predict(&req)?;
    tracing::debug!(tat = out.predicted_tat, bottleneck = ?out.bottleneck, penalty = out.penalty_risk, "predict");
    Ok(Json(out))
}

async fn simulate(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<SimulationResult> {
    let Json(req) = payload?;
    let mut rng = StdRng::from_entropy();
    Ok(Json(state.service.simulate(&req, &mut rng)?))
}

async fn list_flights(State(state): State<AppState>, Query(q): Query<FlightQuery>) -> Json<Vec<Flight>> {
    Json(state.service.flights(q.status))
}

async fn get_flight(State(state): State<AppState>, Path(id): Path<FlightId>) -> ApiResult<Flight> {
    Ok(Json(state.service.flight(id)?))
}

async fn create_flight(
    State(state): State<AppState>,
    payload: Result<Json<CreateFlightRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Flight>), ApiError> {
    let Json(req) = payload?;
    let flight = state.service.create_flight(req, Utc::now())?;
    Ok((StatusCode::CREATED, Json(flight)))
}

async fn refresh_flight(State(state): State<AppState>, Path(id): Path<FlightId>) -> ApiResult<Flight> {
    Ok(Json(state.service.refresh_prediction(id, Utc::now())?))
}

async fn list_gates(State(state): State<AppState>) -> Json<Vec<Gate>> {
    Json(state.service.gates())
}

async fn assign_gate(
    State(state): State<AppState>,
    Path(id): Path<GateId>,
    payload: Result<Json<AssignGateRequest>, JsonRejection>,
) -> ApiResult<AssignOut> {
    let Json(req) = payload?;
    let (gate, flight) = state.service.assign_gate(id, req.flight_id)?;
    Ok(Json(AssignOut { gate, flight }))
}

async fn release_gate(State(state): State<AppState>, Path(id): Path<GateId>) -> ApiResult<ReleaseOut> {
    let (gate, flight) = state.service.release_gate(id, Utc::now())?;
    Ok(Json(ReleaseOut { gate, flight }))
}

async fn clear_gate(State(state): State<AppState>, Path(id): Path<GateId>) -> ApiResult<Gate> {
    Ok(Json(state.service.clear_gate(id)?))
}

async fn crisis_status(State(state): State<AppState>) -> Json<CrisisStatusOut> {
    let current = state.crisis.state();
    Json(CrisisStatusOut {
        active: current.as_ref().map_or(false, |s| s.active),
        state: current,
    })
}

async fn activate_crisis(State(state): State<AppState>) -> ApiResult<CrisisOutcome> {
    Ok(Json(state.crisis.activate(Utc::now())?))
}

async fn deactivate_crisis(State(state): State<AppState>) -> ApiResult<CrisisOutcome> {
    Ok(Json(state.crisis.deactivate(Utc::now())?))
}

// Polled views first apply arrivals seen since the last poll, then read.

async fn diverted(State(state): State<AppState>) -> ApiResult<DivertedView> {
    let now = Utc::now();
    state.crisis.sync(now)?;
    Ok(Json(state.crisis.diverted_view(now)))
}

async fn fuel_queue(State(state): State<AppState>) -> ApiResult<FuelQueueView> {
    let now = Utc::now();
    state.crisis.sync(now)?;
    Ok(Json(state.crisis.fuel_queue_view(now)))
}

async fn penalties(State(state): State<AppState>) -> ApiResult<PenaltySummary> {
    let now = Utc::now();
    state.crisis.sync(now)?;
    Ok(Json(state.crisis.penalty_summary(now)))
}

async fn dashboard(State(state): State<AppState>) -> Json<DashboardSummary> {
    Json(state.service.dashboard())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn crisis_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_snapshots(socket, state))
}

/// Pushes a crisis snapshot every `pushIntervalSecs` until the client leaves.
async fn push_snapshots(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.push_interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                if let Err(e) = state.crisis.sync(now) {
                    tracing::error!(error = %e, "crisis sync failed during push");
                }
                let text = match serde_json::to_string(&state.crisis.snapshot(now)) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "snapshot serialisation failed");
                        break;
                    }
                };
                if tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!("crisis feed closed");
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/predict", post(predict))
        .route("/api/simulate", post(simulate))
        .route("/api/flights", get(list_flights).post(create_flight))
        .route("/api/flights/:id", get(get_flight))
        .route("/api/flights/:id/predict", post(refresh_flight))
        .route("/api/gates", get(list_gates))
        .route("/api/gates/:id/assign", post(assign_gate))
        .route("/api/gates/:id/release", post(release_gate))
        .route("/api/gates/:id/clear", post(clear_gate))
        .route("/api/crisis", get(crisis_status))
        .route("/api/crisis/activate", post(activate_crisis))
        .route("/api/crisis/deactivate", post(deactivate_crisis))
        .route("/api/crisis/diverted", get(diverted))
        .route("/api/crisis/fuel-queue", get(fuel_queue))
        .route("/api/crisis/penalties", get(penalties))
        .route("/api/dashboard", get(dashboard))
        .route("/ws/crisis", get(crisis_feed))
        .route("/health", get(health))
        .with_state(state)
}
