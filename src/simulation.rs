//! Monte Carlo turnaround risk.
//!
//! Each trial perturbs the estimator's real-valued sub-durations with
//! normal noise and sums them. Noisy components are not clamped at zero,
//! so a very small base can produce an implausibly low trial TAT; that is
//! accepted as part of the heuristic.

use rand::Rng;

use crate::error::{check_finite, OpsError, OpsResult};
use crate::model::{penalty_for, BaseDurations, FuelMode};
use crate::stats::{histogram, mean, normal_sample, order_statistic, round_half_up};
use crate::types::{FlightParameters, PercentileOutcome, SimulationResult, BASE_PAD_MIN};

pub const DEFAULT_TRIALS: usize = 1000;

const BAGGAGE_SIGMA: f64 = 0.10;
const FUEL_SIGMA: f64 = 0.05;
const CATERING_SIGMA: f64 = 0.08;
/// Safety noise is absolute, not proportional to its base.
const SAFETY_STD_DEV_MIN: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Trial {
    tat: i64,
    baggage_dominant: bool,
}

fn run_trial<R: Rng + ?Sized>(base: &BaseDurations, rng: &mut R) -> Trial {
    let baggage = normal_sample(rng, base.baggage, base.baggage * BAGGAGE_SIGMA);
    let fuel = normal_sample(rng, base.fuel, base.fuel * FUEL_SIGMA);
    let catering = normal_sample(rng, base.catering, base.catering * CATERING_SIGMA);
    let safety = normal_sample(rng, base.safety, SAFETY_STD_DEV_MIN);

    Trial {
        tat: round_half_up(baggage + fuel + catering + safety + BASE_PAD_MIN as f64),
        baggage_dominant: baggage > fuel && baggage > catering,
    }
}

pub fn simulate<R: Rng + ?Sized>(
    params: &FlightParameters,
    fuel: FuelMode,
    penalty_rate_per_min: i64,
    trials: usize,
    rng: &mut R,
) -> OpsResult<SimulationResult> {
    if trials == 0 {
        return Err(OpsError::invalid("trials", "must be at least 1"));
    }
    if penalty_rate_per_min < 0 {
        return Err(OpsError::invalid("penaltyRatePerMin", "must be >= 0"));
    }
    let base = BaseDurations::from_params(params, fuel)?;

    let mut tats = Vec::with_capacity(trials);
    let mut baggage_hits = 0usize;
    for _ in 0..trials {
        let t = run_trial(&base, rng);
        if t.baggage_dominant {
            baggage_hits += 1;
        }
        tats.push(t.tat);
    }
    tats.sort_unstable();

    let target = params.aircraft_type;
    let outcome = |f: f64| -> OpsResult<PercentileOutcome> {
        let tat = order_statistic(&tats, f)
            .ok_or_else(|| OpsError::InternalComputation("empty trial set".to_string()))?;
        Ok(PercentileOutcome {
            tat,
            penalty_risk: penalty_for(tat, target, penalty_rate_per_min)?,
        })
    };

    let as_f64: Vec<f64> = tats.iter().map(|t| *t as f64).collect();
    let mean_tat = check_finite("mean simulated TAT", mean(&as_f64))?;
    let consistency = round_half_up(baggage_hits as f64 * 100.0 / trials as f64) as u32;

    let result = SimulationResult {
        trials,
        p50: outcome(0.50)?,
        p75: outcome(0.75)?,
        p90: outcome(0.90)?,
        mean_tat,
        bottleneck_consistency: consistency,
        histogram_data: histogram(&tats),
    };
    tracing::debug!(
        trials,
        p50 = result.p50.tat,
        p90 = result.p90.tat,
        consistency,
        "simulation finished"
    );
    Ok(result)
}
