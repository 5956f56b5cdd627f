//! Request-level operations: stateless predict/simulate, flight intake and
//! the gate lifecycle FREE -> ACTIVE -> CLEARING -> FREE.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

use crate::config::OpsConfig;
use crate::crisis::{diverted_prediction, CrisisEngine};
use crate::error::{OpsError, OpsResult};
use crate::model::estimate;
use crate::registry::{FlightPatch, GatePatch, Registry};
use crate::simulation::simulate;
use crate::types::{
    CreateFlightRequest, Flight, FlightId, FlightKind, FlightStatus, FuelTiming, Gate, GateId,
    GateStatus, GateZone, NewFlight, PredictRequest, PredictionResult, SimulationResult,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCounts {
    pub free: usize,
    pub active: usize,
    pub clearing: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightCounts {
    pub scheduled: usize,
    pub active: usize,
    pub completed: usize,
    pub diverted: usize,
    pub fuel_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub crisis_active: bool,
    pub gates: GateCounts,
    pub flights: FlightCounts,
    /// Sum of `penaltyRisk` over flights still on the ground or due.
    pub open_penalty_risk: i64,
}

pub struct TurnaroundService {
    registry: Arc<dyn Registry>,
    config: Arc<OpsConfig>,
    crisis: Arc<CrisisEngine>,
}

impl TurnaroundService {
    pub fn new(registry: Arc<dyn Registry>, config: Arc<OpsConfig>, crisis: Arc<CrisisEngine>) -> Self {
        Self {
            registry,
            config,
            crisis,
        }
    }

    pub fn predict(&self, req: &PredictRequest) -> OpsResult<PredictionResult> {
        let params = req.parameters()?;
        let rate = req.penalty_rate(self.config.domestic_penalty_rate)?;
        estimate(&params, self.config.fuel_mode(req.fuel_crisis_active), rate)
    }

    pub fn simulate<R: Rng + ?Sized>(&self, req: &PredictRequest, rng: &mut R) -> OpsResult<SimulationResult> {
        let params = req.parameters()?;
        let rate = req.penalty_rate(self.config.domestic_penalty_rate)?;
        let trials = req.trials.unwrap_or(self.config.simulation_trials);
        if trials > self.config.max_simulation_trials {
            return Err(OpsError::invalid(
                "trials",
                format!("must be at most {}", self.config.max_simulation_trials),
            ));
        }
        simulate(&params, self.config.fuel_mode(req.fuel_crisis_active), rate, trials, rng)
    }

    pub fn flight(&self, id: FlightId) -> OpsResult<Flight> {
        self.registry.get_flight(id).ok_or_else(|| OpsError::not_found("flight", id))
    }

    pub fn flights(&self, status: Option<FlightStatus>) -> Vec<Flight> {
        self.registry.list_flights(status)
    }

    pub fn gates(&self) -> Vec<Gate> {
        self.registry.list_gates()
    }

    fn gate(&self, id: GateId) -> OpsResult<Gate> {
        self.registry.get_gate(id).ok_or_else(|| OpsError::not_found("gate", id))
    }

    /// Registers a domestic flight as SCHEDULED with its hydrant estimate.
    /// During a crisis it joins the back of the domestic bowser queue.
    pub fn create_flight(&self, req: CreateFlightRequest, now: DateTime<Utc>) -> OpsResult<Flight> {
        let params = req.ground.parameters()?;
        let rate = req.ground.penalty_rate(self.config.domestic_penalty_rate)?;
        let prediction = estimate(&params, self.config.hydrant(), rate)?;
        let flight = self.registry.create_flight(NewFlight {
            flight_number: req.flight_number,
            origin: req.origin,
            kind: FlightKind::Domestic,
            status: FlightStatus::Scheduled,
            penalty_rate_per_min: rate,
            arrival_at: None,
            params,
            prediction,
        })?;
        tracing::info!(flight_id = flight.id, flight = %flight.flight_number, tat = flight.prediction.predicted_tat, "flight created");

        if self.crisis.requeue_if_active(now)? {
            return self.flight(flight.id);
        }
        Ok(flight)
    }

    /// Loads the configured seed flights. Meant for an empty registry at boot.
    pub fn seed(&self, now: DateTime<Utc>) -> OpsResult<usize> {
        let hydrant = self.config.hydrant();
        for seed in &self.config.seed_flights {
            let prediction = estimate(&seed.params, hydrant, self.config.domestic_penalty_rate)?;
            self.registry.create_flight(NewFlight {
                flight_number: seed.flight_number.clone(),
                origin: seed.origin.clone(),
                kind: FlightKind::Domestic,
                status: FlightStatus::Scheduled,
                penalty_rate_per_min: self.config.domestic_penalty_rate,
                arrival_at: None,
                params: seed.params.clone(),
                prediction,
            })?;
        }
        self.crisis.requeue_if_active(now)?;
        Ok(self.config.seed_flights.len())
    }

    /// Recomputes and stores a flight's prediction under the current fuel regime.
    pub fn refresh_prediction(&self, id: FlightId, now: DateTime<Utc>) -> OpsResult<Flight> {
        let flight = self.flight(id)?;
        match flight.kind {
            FlightKind::Diverted => {
                let prediction =
                    diverted_prediction(&flight.params, self.config.manual(), flight.penalty_rate_per_min)?;
                self.registry.update_flight(id, FlightPatch::prediction(prediction))
            }
            FlightKind::Domestic => {
                if flight.status != FlightStatus::Completed && self.crisis.requeue_if_active(now)? {
                    return self.flight(id);
                }
                let prediction = estimate(&flight.params, self.config.hydrant(), flight.penalty_rate_per_min)?;
                self.registry.update_flight(id, FlightPatch::prediction(prediction))
            }
        }
    }

    /// SCHEDULED (or queued, mid-crisis) domestic flight onto a FREE
    /// domestic gate.
    pub fn assign_gate(&self, gate_id: GateId, flight_id: FlightId) -> OpsResult<(Gate, Flight)> {
        let gate = self.gate(gate_id)?;
        let flight = self.flight(flight_id)?;

        if gate.status != GateStatus::Free || gate.current_flight_id.is_some() {
            return Err(OpsError::ConflictState(format!("gate {} is not free", gate.label)));
        }
        if flight.kind != FlightKind::Domestic || gate.zone != GateZone::Domestic {
            return Err(OpsError::ConflictState(format!(
                "gate {} is reserved for international arrivals",
                gate.label
            )));
        }
        if flight.gate_id.is_some() {
            return Err(OpsError::ConflictState(format!(
                "flight {} already holds a gate",
                flight.flight_number
            )));
        }
        let status = match flight.status {
            FlightStatus::Scheduled => FlightStatus::Active,
            FlightStatus::FuelQueue => FlightStatus::FuelQueue,
            other => {
                return Err(OpsError::ConflictState(format!(
                    "flight {} is {:?} and cannot take a gate",
                    flight.flight_number, other
                )))
            }
        };
        let prediction = if status == FlightStatus::Active {
            Some(estimate(&flight.params, self.config.hydrant(), flight.penalty_rate_per_min)?)
        } else {
            None
        };

        let gate = self.registry.update_gate(gate_id, GatePatch::occupy(flight_id))?;
        let flight = self.registry.update_flight(
            flight_id,
            FlightPatch {
                status: Some(status),
                gate_id: Some(Some(gate_id)),
                prediction,
                ..FlightPatch::default()
            },
        )?;
        tracing::info!(gate = %gate.label, flight = %flight.flight_number, "gate assigned");
        Ok((gate, flight))
    }

    /// Turnaround done: flight COMPLETED, gate CLEARING.
    pub fn release_gate(&self, gate_id: GateId, now: DateTime<Utc>) -> OpsResult<(Gate, Option<Flight>)> {
        let gate = self.gate(gate_id)?;
        if gate.status != GateStatus::Active {
            return Err(OpsError::ConflictState(format!("gate {} is not active", gate.label)));
        }

        let released = match gate.current_flight_id {
            Some(flight_id) => {
                let flight = self.flight(flight_id)?;
                // Diverted flights keep their fuel start so accrual stays frozen.
                let fueling = match flight.kind {
                    FlightKind::Diverted => FuelTiming {
                        bowser_slot: None,
                        queue_position: None,
                        fuel_started_at: flight.fueling.fuel_started_at,
                    },
                    FlightKind::Domestic => FuelTiming::default(),
                };
                Some(self.registry.update_flight(
                    flight_id,
                    FlightPatch {
                        status: Some(FlightStatus::Completed),
                        gate_id: Some(None),
                        fueling: Some(fueling),
                        ..FlightPatch::default()
                    },
                )?)
            }
            None => None,
        };
        let gate = self.registry.update_gate(
            gate_id,
            GatePatch {
                status: Some(GateStatus::Clearing),
                current_flight_id: Some(None),
            },
        )?;
        tracing::info!(gate = %gate.label, flight_id = ?released.as_ref().map(|f| f.id), "gate released");

        let was_queued = released
            .as_ref()
            .map_or(false, |f| f.kind == FlightKind::Domestic);
        if was_queued {
            self.crisis.requeue_if_active(now)?;
        }
        Ok((gate, released))
    }

    pub fn clear_gate(&self, gate_id: GateId) -> OpsResult<Gate> {
        let gate = self.gate(gate_id)?;
        if gate.status != GateStatus::Clearing {
            return Err(OpsError::ConflictState(format!("gate {} is not clearing", gate.label)));
        }
        let gate = self.registry.update_gate(gate_id, GatePatch::free())?;
        tracing::debug!(gate = %gate.label, "gate free");
        Ok(gate)
    }

    pub fn dashboard(&self) -> DashboardSummary {
        let mut gates = GateCounts::default();
        for g in self.registry.list_gates() {
            match g.status {
                GateStatus::Free => gates.free += 1,
                GateStatus::Active => gates.active += 1,
                GateStatus::Clearing => gates.clearing += 1,
            }
        }
        let mut flights = FlightCounts::default();
        let mut open_penalty_risk = 0;
        for f in self.registry.list_flights(None) {
            match f.status {
                FlightStatus::Scheduled => flights.scheduled += 1,
                FlightStatus::Active => flights.active += 1,
                FlightStatus::Completed => flights.completed += 1,
                FlightStatus::Diverted => flights.diverted += 1,
                FlightStatus::FuelQueue => flights.fuel_queue += 1,
            }
            if f.status != FlightStatus::Completed {
                open_penalty_risk += f.prediction.penalty_risk;
            }
        }
        DashboardSummary {
            crisis_active: self.crisis.is_active(),
            gates,
            flights,
            open_penalty_risk,
        }
    }
}
