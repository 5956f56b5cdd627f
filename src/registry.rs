//! Storage seam for flights, gates and the crisis singleton.
//!
//! The service only talks to [`Registry`]; [`MemoryRegistry`] is the
//! in-process implementation the binary and the tests run on.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::config::GateSeed;
use crate::error::{OpsError, OpsResult};
use crate::types::{
    CrisisState, Flight, FlightId, FlightStatus, FuelTiming, Gate, GateId, GateStatus, NewFlight,
    PredictionResult,
};

/// Partial flight update. Prediction and fuel-timing fields are independent
/// so either can be written without touching the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightPatch {
    pub status: Option<FlightStatus>,
    pub gate_id: Option<Option<GateId>>,
    pub prediction: Option<PredictionResult>,
    pub fueling: Option<FuelTiming>,
}

impl FlightPatch {
    pub fn prediction(prediction: PredictionResult) -> Self {
        Self {
            prediction: Some(prediction),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn fueling(fueling: FuelTiming) -> Self {
        Self {
            fueling: Some(fueling),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatePatch {
    pub status: Option<GateStatus>,
    pub current_flight_id: Option<Option<FlightId>>,
}

impl GatePatch {
    pub fn occupy(flight_id: FlightId) -> Self {
        Self {
            status: Some(GateStatus::Active),
            current_flight_id: Some(Some(flight_id)),
        }
    }

    pub fn free() -> Self {
        Self {
            status: Some(GateStatus::Free),
            current_flight_id: Some(None),
        }
    }
}

pub trait Registry: Send + Sync {
    fn get_flight(&self, id: FlightId) -> Option<Flight>;
    /// Flights in creation order, optionally restricted to one status.
    fn list_flights(&self, status: Option<FlightStatus>) -> Vec<Flight>;
    fn create_flight(&self, flight: NewFlight) -> OpsResult<Flight>;
    fn update_flight(&self, id: FlightId, patch: FlightPatch) -> OpsResult<Flight>;
    fn delete_flight(&self, id: FlightId) -> OpsResult<()>;

    fn list_gates(&self) -> Vec<Gate>;
    fn get_gate(&self, id: GateId) -> Option<Gate>;
    /// Fails with `ConflictState` if the flight is already referenced by
    /// another gate.
    fn update_gate(&self, id: GateId, patch: GatePatch) -> OpsResult<Gate>;

    fn crisis_state(&self) -> Option<CrisisState>;
    fn upsert_crisis_state(&self, state: CrisisState) -> CrisisState;
}

#[derive(Default)]
struct Tables {
    flights: BTreeMap<FlightId, Flight>,
    gates: BTreeMap<GateId, Gate>,
    crisis: Option<CrisisState>,
    next_flight_id: FlightId,
}

#[derive(Default)]
pub struct MemoryRegistry {
    tables: RwLock<Tables>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gates(seeds: &[GateSeed]) -> Self {
        let gates = seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| {
                let id = i as GateId + 1;
                let gate = Gate {
                    id,
                    label: seed.label.clone(),
                    zone: seed.zone,
                    status: GateStatus::Free,
                    current_flight_id: None,
                };
                (id, gate)
            })
            .collect();
        Self {
            tables: RwLock::new(Tables {
                gates,
                ..Tables::default()
            }),
        }
    }
}

impl Registry for MemoryRegistry {
    fn get_flight(&self, id: FlightId) -> Option<Flight> {
        self.tables.read().flights.get(&id).cloned()
    }

    fn list_flights(&self, status: Option<FlightStatus>) -> Vec<Flight> {
        self.tables
            .read()
            .flights
            .values()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .cloned()
            .collect()
    }

    fn create_flight(&self, new: NewFlight) -> OpsResult<Flight> {
        if new.flight_number.trim().is_empty() {
            return Err(OpsError::invalid("flightNumber", "must not be empty"));
        }
        let mut t = self.tables.write();
        t.next_flight_id += 1;
        let flight = Flight {
            id: t.next_flight_id,
            flight_number: new.flight_number,
            origin: new.origin,
            kind: new.kind,
            status: new.status,
            gate_id: None,
            penalty_rate_per_min: new.penalty_rate_per_min,
            arrival_at: new.arrival_at,
            params: new.params,
            prediction: new.prediction,
            fueling: FuelTiming::default(),
        };
        t.flights.insert(flight.id, flight.clone());
        Ok(flight)
    }

    fn update_flight(&self, id: FlightId, patch: FlightPatch) -> OpsResult<Flight> {
        let mut t = self.tables.write();
        let flight = t
            .flights
            .get_mut(&id)
            .ok_or_else(|| OpsError::not_found("flight", id))?;
        if let Some(status) = patch.status {
            flight.status = status;
        }
        if let Some(gate_id) = patch.gate_id {
            flight.gate_id = gate_id;
        }
        if let Some(prediction) = patch.prediction {
            flight.prediction = prediction;
        }
        if let Some(fueling) = patch.fueling {
            flight.fueling = fueling;
        }
        Ok(flight.clone())
    }

    fn delete_flight(&self, id: FlightId) -> OpsResult<()> {
        self.tables
            .write()
            .flights
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| OpsError::not_found("flight", id))
    }

    fn list_gates(&self) -> Vec<Gate> {
        self.tables.read().gates.values().cloned().collect()
    }

    fn get_gate(&self, id: GateId) -> Option<Gate> {
        self.tables.read().gates.get(&id).cloned()
    }

    fn update_gate(&self, id: GateId, patch: GatePatch) -> OpsResult<Gate> {
        let mut t = self.tables.write();
        if !t.gates.contains_key(&id) {
            return Err(OpsError::not_found("gate", id));
        }
        if let Some(Some(flight_id)) = patch.current_flight_id {
            if !t.flights.contains_key(&flight_id) {
                return Err(OpsError::not_found("flight", flight_id));
            }
            if let Some(other) = t
                .gates
                .values()
                .find(|g| g.id != id && g.current_flight_id == Some(flight_id))
            {
                return Err(OpsError::ConflictState(format!(
                    "flight {} already occupies gate {}",
                    flight_id, other.label
                )));
            }
        }
        let gate = t
            .gates
            .get_mut(&id)
            .ok_or_else(|| OpsError::not_found("gate", id))?;
        if let Some(status) = patch.status {
            gate.status = status;
        }
        if let Some(current) = patch.current_flight_id {
            gate.current_flight_id = current;
        }
        Ok(gate.clone())
    }

    fn crisis_state(&self) -> Option<CrisisState> {
        self.tables.read().crisis.clone()
    }

    fn upsert_crisis_state(&self, state: CrisisState) -> CrisisState {
        self.tables.write().crisis = Some(state.clone());
        state
    }
}
