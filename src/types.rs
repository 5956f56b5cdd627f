use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, OpsError, OpsResult};

pub type FlightId = u64;
pub type GateId = u64;

/// Fixed minutes added to every turnaround on top of the sub-processes.
pub const BASE_PAD_MIN: i64 = 10;
/// Safety check takes the same time regardless of aircraft or load.
pub const SAFETY_CHECK_MIN: i64 = 15;

/// Largest fuel load accepted from a request, liters.
pub const MAX_FUEL_LITERS: f64 = 1.0e6;
/// Largest per-minute penalty rate accepted from a request.
pub const MAX_PENALTY_RATE: f64 = 1.0e7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AircraftType {
    #[serde(alias = "narrow", alias = "NARROW")]
    Narrow,
    #[serde(alias = "wide", alias = "WIDE")]
    Wide,
}

impl AircraftType {
    /// Contractual turnaround SLA in minutes.
    pub fn target_tat(self) -> i64 {
        match self {
            AircraftType::Wide => 60,
            AircraftType::Narrow => 35,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "narrow" => Some(AircraftType::Narrow),
            "wide" => Some(AircraftType::Wide),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bottleneck {
    Baggage,
    Fuel,
    Catering,
}

/// Ground-service inputs for one turnaround.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightParameters {
    pub aircraft_type: AircraftType,
    pub bags_count: u32,
    pub priority_bags: u32,
    pub fuel_liters: f64,
    pub meals_qty: u32,
    pub special_meals: u32,
    pub catering_required: bool,
    pub safety_check: bool,
    #[serde(default)]
    pub arrival_delay: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub predicted_tat: i64,
    pub bottleneck: Option<Bottleneck>,
    pub penalty_risk: i64,
    pub baggage_duration: i64,
    pub fuel_duration: i64,
    pub catering_duration: i64,
    pub safety_check_duration: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileOutcome {
    pub tat: i64,
    pub penalty_risk: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub bin: i64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub trials: usize,
    pub p50: PercentileOutcome,
    pub p75: PercentileOutcome,
    pub p90: PercentileOutcome,
    pub mean_tat: f64,
    /// Percentage of trials in which baggage was the dominant driver.
    pub bottleneck_consistency: u32,
    pub histogram_data: Vec<HistogramBin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Active,
    Completed,
    Diverted,
    FuelQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightKind {
    Domestic,
    /// International arrival synthesised by a fuel-crisis activation.
    Diverted,
}

/// Bowser and queue bookkeeping, updated independently of the prediction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelTiming {
    pub bowser_slot: Option<u8>,
    pub queue_position: Option<u32>,
    pub fuel_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub id: FlightId,
    pub flight_number: String,
    pub origin: Option<String>,
    pub kind: FlightKind,
    pub status: FlightStatus,
    pub gate_id: Option<GateId>,
    pub penalty_rate_per_min: i64,
    pub arrival_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub params: FlightParameters,
    #[serde(flatten)]
    pub prediction: PredictionResult,
    #[serde(flatten)]
    pub fueling: FuelTiming,
}

impl Flight {
    pub fn has_landed(&self, now: DateTime<Utc>) -> bool {
        self.arrival_at.map_or(true, |at| at <= now)
    }
}

/// Everything needed to create a flight; the registry assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFlight {
    pub flight_number: String,
    pub origin: Option<String>,
    pub kind: FlightKind,
    pub status: FlightStatus,
    pub penalty_rate_per_min: i64,
    pub arrival_at: Option<DateTime<Utc>>,
    pub params: FlightParameters,
    pub prediction: PredictionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Free,
    Active,
    Clearing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateZone {
    Domestic,
    International,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub id: GateId,
    pub label: String,
    pub zone: GateZone,
    pub status: GateStatus,
    pub current_flight_id: Option<FlightId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisState {
    pub active: bool,
    pub bowser_count: u8,
    pub manual_pump_speed: f64,
    pub activated_at: Option<DateTime<Utc>>,
}

// ---------- Request payloads ----------

/// Body of `/api/predict`, `/api/simulate` and flight creation. Numbers arrive
/// loosely typed and are checked field by field in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub aircraft_type: Option<String>,
    pub fuel_liters: Option<f64>,
    #[serde(default)]
    pub bags_count: f64,
    #[serde(default)]
    pub priority_bags: f64,
    #[serde(default)]
    pub meals_qty: f64,
    #[serde(default)]
    pub special_meals: f64,
    #[serde(default)]
    pub catering_required: bool,
    #[serde(default)]
    pub safety_check: bool,
    #[serde(default)]
    pub arrival_delay: f64,
    pub penalty_rate_per_min: Option<f64>,
    #[serde(default)]
    pub fuel_crisis_active: bool,
    pub trials: Option<usize>,
}

fn whole_count(field: &'static str, value: f64) -> OpsResult<u32> {
    let v = check_non_negative(field, value)?;
    if v.fract() != 0.0 {
        return Err(OpsError::invalid(field, format!("must be a whole number, got {}", v)));
    }
    if v > u32::MAX as f64 {
        return Err(OpsError::invalid(field, "is too large"));
    }
    Ok(v as u32)
}

impl PredictRequest {
    pub fn parameters(&self) -> OpsResult<FlightParameters> {
        let raw_type = self
            .aircraft_type
            .as_deref()
            .ok_or_else(|| OpsError::invalid("aircraftType", "is required"))?;
        let aircraft_type = AircraftType::parse(raw_type).ok_or_else(|| {
            OpsError::invalid("aircraftType", format!("expected Narrow or Wide, got {:?}", raw_type))
        })?;
        let fuel_liters = self
            .fuel_liters
            .ok_or_else(|| OpsError::invalid("fuelLiters", "is required"))?;
        let fuel_liters = check_non_negative("fuelLiters", fuel_liters)?;
        if fuel_liters > MAX_FUEL_LITERS {
            return Err(OpsError::invalid("fuelLiters", "is too large"));
        }

        Ok(FlightParameters {
            aircraft_type,
            fuel_liters,
            bags_count: whole_count("bagsCount", self.bags_count)?,
            priority_bags: whole_count("priorityBags", self.priority_bags)?,
            meals_qty: whole_count("mealsQty", self.meals_qty)?,
            special_meals: whole_count("specialMeals", self.special_meals)?,
            catering_required: self.catering_required,
            safety_check: self.safety_check,
            arrival_delay: check_non_negative("arrivalDelay", self.arrival_delay)?,
        })
    }

    pub fn penalty_rate(&self, default_rate: i64) -> OpsResult<i64> {
        match self.penalty_rate_per_min {
            None => Ok(default_rate),
            Some(rate) => {
                let rate = check_non_negative("penaltyRatePerMin", rate)?;
                if rate > MAX_PENALTY_RATE {
                    return Err(OpsError::invalid("penaltyRatePerMin", "is too large"));
                }
                Ok(rate.round() as i64)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlightRequest {
    pub flight_number: String,
    pub origin: Option<String>,
    #[serde(flatten)]
    pub ground: PredictRequest,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignGateRequest {
    pub flight_id: FlightId,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FlightQuery {
    pub status: Option<FlightStatus>,
}
