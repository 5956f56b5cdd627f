use serde::{Deserialize, Serialize};

use crate::error::{check_finite, check_non_negative, OpsError, OpsResult};
use crate::stats::round_half_up;
use crate::types::{
    AircraftType, Bottleneck, FlightParameters, PredictionResult, BASE_PAD_MIN, SAFETY_CHECK_MIN,
};

pub const HYDRANT_RATE_PER_LITER: f64 = 0.002;
pub const MANUAL_PUMP_SPEED_LPM: f64 = 500.0;

const BAG_MIN: f64 = 0.15;
const PRIORITY_BAG_MIN: f64 = 0.1;
const MEAL_MIN: f64 = 0.08;
const SPECIAL_MEAL_MIN: f64 = 0.1;

/// How fuel reaches the aircraft. Callers choose explicitly; nothing here
/// looks at crisis state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum FuelMode {
    /// Fixed hydrant infrastructure, minutes per liter.
    Hydrant { rate_per_liter: f64 },
    /// Bowser truck pumping at liters per minute.
    Manual { pump_speed_lpm: f64 },
}

impl FuelMode {
    pub fn hydrant() -> Self {
        FuelMode::Hydrant {
            rate_per_liter: HYDRANT_RATE_PER_LITER,
        }
    }

    pub fn manual() -> Self {
        FuelMode::Manual {
            pump_speed_lpm: MANUAL_PUMP_SPEED_LPM,
        }
    }

    /// Unrounded fueling minutes for `liters`.
    pub fn minutes_for(&self, liters: f64) -> OpsResult<f64> {
        let liters = check_non_negative("fuelLiters", liters)?;
        let minutes = match *self {
            FuelMode::Hydrant { rate_per_liter } => {
                check_non_negative("hydrantRatePerLiter", rate_per_liter)?;
                liters * rate_per_liter
            }
            FuelMode::Manual { pump_speed_lpm } => {
                if !(pump_speed_lpm.is_finite() && pump_speed_lpm > 0.0) {
                    return Err(OpsError::invalid(
                        "manualPumpSpeed",
                        format!("must be a positive number, got {}", pump_speed_lpm),
                    ));
                }
                liters / pump_speed_lpm
            }
        };
        check_finite("fuel duration", minutes)
    }
}

/// Real-valued sub-process durations before rounding; the simulator draws
/// its noise around these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseDurations {
    pub baggage: f64,
    pub fuel: f64,
    pub catering: f64,
    pub safety: f64,
}

impl BaseDurations {
    pub fn from_params(params: &FlightParameters, fuel: FuelMode) -> OpsResult<Self> {
        check_non_negative("arrivalDelay", params.arrival_delay)?;
        let baggage = params.bags_count as f64 * BAG_MIN + params.priority_bags as f64 * PRIORITY_BAG_MIN;
        let catering = if params.catering_required {
            params.meals_qty as f64 * MEAL_MIN + params.special_meals as f64 * SPECIAL_MEAL_MIN
        } else {
            0.0
        };
        let safety = if params.safety_check { SAFETY_CHECK_MIN as f64 } else { 0.0 };

        Ok(Self {
            baggage,
            fuel: fuel.minutes_for(params.fuel_liters)?,
            catering,
            safety,
        })
    }
}

/// Largest of the three variable sub-processes. Candidates are checked
/// baggage, fuel, catering and a later one must be strictly greater to win,
/// so ties go to the earlier. `None` when every candidate is zero.
pub fn pick_bottleneck(baggage: i64, fuel: i64, catering: i64) -> Option<Bottleneck> {
    let mut best = (Bottleneck::Baggage, baggage);
    if fuel > best.1 {
        best = (Bottleneck::Fuel, fuel);
    }
    if catering > best.1 {
        best = (Bottleneck::Catering, catering);
    }
    if best.1 > 0 {
        Some(best.0)
    } else {
        None
    }
}

/// Penalty for minutes over the aircraft's target turnaround.
pub fn penalty_for(tat: i64, aircraft: AircraftType, rate_per_min: i64) -> OpsResult<i64> {
    tat.checked_sub(aircraft.target_tat())
        .map(|over| over.max(0))
        .and_then(|over| over.checked_mul(rate_per_min))
        .ok_or_else(|| {
            OpsError::InternalComputation(format!(
                "penalty overflow: tat {} at rate {}",
                tat, rate_per_min
            ))
        })
}

fn total_tat(parts: [i64; 4]) -> OpsResult<i64> {
    parts
        .iter()
        .try_fold(BASE_PAD_MIN, |acc, part| acc.checked_add(*part))
        .ok_or_else(|| OpsError::InternalComputation(format!("turnaround overflow: {:?}", parts)))
}

/// Deterministic turnaround estimate. Pure: same inputs, same output.
pub fn estimate(
    params: &FlightParameters,
    fuel: FuelMode,
    penalty_rate_per_min: i64,
) -> OpsResult<PredictionResult> {
    if penalty_rate_per_min < 0 {
        return Err(OpsError::invalid("penaltyRatePerMin", "must be >= 0"));
    }
    let base = BaseDurations::from_params(params, fuel)?;

    let baggage_duration = round_half_up(base.baggage);
    let fuel_duration = round_half_up(base.fuel);
    let catering_duration = round_half_up(base.catering);
    let safety_check_duration = base.safety as i64;

    let predicted_tat = total_tat([
        baggage_duration,
        fuel_duration,
        catering_duration,
        safety_check_duration,
    ])?;

    Ok(PredictionResult {
        predicted_tat,
        bottleneck: pick_bottleneck(baggage_duration, fuel_duration, catering_duration),
        penalty_risk: penalty_for(predicted_tat, params.aircraft_type, penalty_rate_per_min)?,
        baggage_duration,
        fuel_duration,
        catering_duration,
        safety_check_duration,
    })
}
