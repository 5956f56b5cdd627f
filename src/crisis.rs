//! Fuel-supply crisis: bowser allocation between diverted international
//! arrivals and the domestic queue.
//!
//! Bowsers `1..bowser_count` serve diverted flights in landing order; the
//! last bowser works through domestic flights one at a time. All mutations
//! go through [`CrisisEngine::activate`], [`CrisisEngine::deactivate`] and
//! [`CrisisEngine::sync`], which are serialised by one transition lock.
//! The `*_view` methods only read.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::model::{estimate, penalty_for, pick_bottleneck, FuelMode};
use crate::registry::{FlightPatch, GatePatch, Registry};
use crate::stats::round_half_up;
use crate::types::{
    AircraftType, CrisisState, Flight, FlightId, FlightKind, FlightParameters, FlightStatus,
    FuelTiming, GateStatus, GateZone, NewFlight, PredictionResult, SAFETY_CHECK_MIN,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisOutcome {
    pub state: CrisisState,
    pub changed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub released: usize,
    pub assigned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelProgress {
    pub elapsed_min: f64,
    pub remaining_min: f64,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelPhase {
    Inbound,
    AwaitingBowser,
    Fueling,
    Fueled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivertedFlightView {
    pub id: FlightId,
    pub flight_number: String,
    pub origin: Option<String>,
    pub aircraft_type: AircraftType,
    pub phase: FuelPhase,
    pub arrival_at: Option<DateTime<Utc>>,
    pub minutes_to_arrival: Option<i64>,
    pub bowser_slot: Option<u8>,
    pub gate_label: Option<String>,
    pub fuel_duration: i64,
    pub predicted_tat: i64,
    pub progress: Option<FuelProgress>,
    pub accrued_penalty: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivertedView {
    pub active: bool,
    pub priority_bowsers: u8,
    pub pump_speed_lpm: f64,
    pub flights: Vec<DivertedFlightView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: FlightId,
    pub flight_number: String,
    pub position: u32,
    pub fuel_duration: i64,
    pub estimated_wait: i64,
    pub predicted_tat: i64,
    pub penalty_risk: i64,
    pub progress: Option<FuelProgress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelQueueView {
    pub active: bool,
    pub bowser: u8,
    pub entries: Vec<QueueEntry>,
    pub total_wait: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyLine {
    pub flight_id: FlightId,
    pub flight_number: String,
    pub penalty: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltySummary {
    pub active: bool,
    pub international_total: i64,
    pub domestic_total: i64,
    pub total: i64,
    pub international: Vec<PenaltyLine>,
    pub domestic: Vec<PenaltyLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisSnapshot {
    pub state: Option<CrisisState>,
    pub diverted: DivertedView,
    pub fuel_queue: FuelQueueView,
    pub penalties: PenaltySummary,
}

/// Wait in front of each queue position: the sum of fuel durations strictly
/// ahead of it.
pub fn queue_waits(fuel_durations: &[i64]) -> Vec<i64> {
    fuel_durations
        .iter()
        .scan(0i64, |ahead, d| {
            let wait = *ahead;
            *ahead += d;
            Some(wait)
        })
        .collect()
}

pub fn fuel_progress(started: DateTime<Utc>, fuel_duration: i64, now: DateTime<Utc>) -> FuelProgress {
    let elapsed = ((now - started).num_milliseconds() as f64 / 60_000.0).max(0.0);
    if fuel_duration <= 0 {
        return FuelProgress {
            elapsed_min: elapsed,
            remaining_min: 0.0,
            progress_pct: 100.0,
        };
    }
    let total = fuel_duration as f64;
    FuelProgress {
        elapsed_min: elapsed,
        remaining_min: (total - elapsed).max(0.0),
        progress_pct: (elapsed / total * 100.0).min(100.0),
    }
}

/// Bowser-fuelled diverted turnaround: manual fuel time plus the fixed
/// safety pad; baggage and catering are not part of it.
pub fn diverted_prediction(
    params: &FlightParameters,
    manual: FuelMode,
    rate_per_min: i64,
) -> OpsResult<PredictionResult> {
    let fuel_duration = round_half_up(manual.minutes_for(params.fuel_liters)?);
    let predicted_tat = fuel_duration
        .checked_add(SAFETY_CHECK_MIN)
        .ok_or_else(|| OpsError::InternalComputation(format!("fuel duration overflow: {}", fuel_duration)))?;
    Ok(PredictionResult {
        predicted_tat,
        bottleneck: pick_bottleneck(0, fuel_duration, 0),
        penalty_risk: penalty_for(predicted_tat, params.aircraft_type, rate_per_min)?,
        baggage_duration: 0,
        fuel_duration,
        catering_duration: 0,
        safety_check_duration: SAFETY_CHECK_MIN,
    })
}

/// Adds queue wait on top of an estimate and re-prices the penalty.
pub fn with_queue_wait(
    mut prediction: PredictionResult,
    wait: i64,
    aircraft: AircraftType,
    rate_per_min: i64,
) -> OpsResult<PredictionResult> {
    prediction.predicted_tat = prediction
        .predicted_tat
        .checked_add(wait)
        .ok_or_else(|| OpsError::InternalComputation(format!("queue wait overflow: {}", wait)))?;
    prediction.penalty_risk = penalty_for(prediction.predicted_tat, aircraft, rate_per_min)?;
    Ok(prediction)
}

fn saturating_total(lines: &[PenaltyLine]) -> i64 {
    lines.iter().fold(0i64, |acc, l| acc.saturating_add(l.penalty))
}

fn is_queueable(f: &Flight) -> bool {
    f.kind == FlightKind::Domestic
        && matches!(
            f.status,
            FlightStatus::Scheduled | FlightStatus::Active | FlightStatus::FuelQueue
        )
}

fn whole_minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes().max(0)
}

pub struct CrisisEngine {
    registry: Arc<dyn Registry>,
    config: Arc<OpsConfig>,
    transition: Mutex<()>,
}

impl CrisisEngine {
    pub fn new(registry: Arc<dyn Registry>, config: Arc<OpsConfig>) -> Self {
        Self {
            registry,
            config,
            transition: Mutex::new(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry.crisis_state().map_or(false, |s| s.active)
    }

    pub fn state(&self) -> Option<CrisisState> {
        self.registry.crisis_state()
    }

    fn priority_bowsers(&self) -> u8 {
        self.config.bowser_count.saturating_sub(1)
    }

    fn domestic_bowser(&self) -> u8 {
        self.config.bowser_count
    }

    fn diverted_flights(&self) -> Vec<Flight> {
        self.registry
            .list_flights(None)
            .into_iter()
            .filter(|f| f.kind == FlightKind::Diverted)
            .collect()
    }

    /// NORMAL -> CRISIS_ACTIVE. Repeating it while active changes nothing.
    pub fn activate(&self, now: DateTime<Utc>) -> OpsResult<CrisisOutcome> {
        let _guard = self.transition.lock();
        if let Some(state) = self.registry.crisis_state().filter(|s| s.active) {
            return Ok(CrisisOutcome {
                state,
                changed: false,
                message: "Fuel crisis already active".to_string(),
            });
        }

        let synthesized = if self.diverted_flights().is_empty() {
            self.synthesize_roster(now)?
        } else {
            0
        };

        let state = self.registry.upsert_crisis_state(CrisisState {
            active: true,
            bowser_count: self.config.bowser_count,
            manual_pump_speed: self.config.manual_pump_speed_lpm,
            activated_at: Some(now),
        });
        let assigned = self.assign_landed(now)?;
        let queued = self.requeue_domestic(now)?;

        tracing::warn!(
            synthesized,
            assigned,
            queued,
            bowsers = state.bowser_count,
            pump_speed_lpm = state.manual_pump_speed,
            "fuel crisis activated"
        );
        Ok(CrisisOutcome {
            message: format!(
                "Fuel crisis active: {} bowsers at {} L/min, {} diverted flights on bowsers, {} domestic flights queued on bowser {}",
                state.bowser_count,
                state.manual_pump_speed,
                assigned,
                queued,
                self.domestic_bowser()
            ),
            state,
            changed: true,
        })
    }

    /// CRISIS_ACTIVE -> NORMAL. A no-op when no crisis is running.
    pub fn deactivate(&self, _now: DateTime<Utc>) -> OpsResult<CrisisOutcome> {
        let _guard = self.transition.lock();
        let mut state = match self.registry.crisis_state() {
            Some(s) if s.active => s,
            other => {
                return Ok(CrisisOutcome {
                    state: other.unwrap_or_else(|| self.inactive_state()),
                    changed: false,
                    message: "Fuel crisis not active".to_string(),
                })
            }
        };

        let diverted: HashSet<FlightId> = self.diverted_flights().iter().map(|f| f.id).collect();
        for gate in self.registry.list_gates() {
            if gate.current_flight_id.map_or(false, |id| diverted.contains(&id)) {
                self.registry.update_gate(gate.id, GatePatch::free())?;
            }
        }
        for id in &diverted {
            self.registry.delete_flight(*id)?;
        }

        let hydrant = self.config.hydrant();
        let mut restored = 0usize;
        for f in self.registry.list_flights(None).into_iter().filter(is_queueable) {
            let status = match f.status {
                FlightStatus::FuelQueue if f.gate_id.is_some() => FlightStatus::Active,
                FlightStatus::FuelQueue => FlightStatus::Scheduled,
                other => other,
            };
            let prediction = estimate(&f.params, hydrant, f.penalty_rate_per_min)?;
            self.registry.update_flight(
                f.id,
                FlightPatch {
                    status: Some(status),
                    prediction: Some(prediction),
                    fueling: Some(FuelTiming::default()),
                    ..FlightPatch::default()
                },
            )?;
            restored += 1;
        }

        state.active = false;
        let state = self.registry.upsert_crisis_state(state);
        tracing::info!(removed = diverted.len(), restored, "fuel crisis deactivated");
        Ok(CrisisOutcome {
            message: format!(
                "Hydrant fueling restored: {} diverted flights cleared, {} domestic predictions recomputed",
                diverted.len(),
                restored
            ),
            state,
            changed: true,
        })
    }

    fn inactive_state(&self) -> CrisisState {
        CrisisState {
            active: false,
            bowser_count: self.config.bowser_count,
            manual_pump_speed: self.config.manual_pump_speed_lpm,
            activated_at: None,
        }
    }

    /// Creates the configured diverted roster. If any creation fails the
    /// flights created so far are removed again.
    fn synthesize_roster(&self, now: DateTime<Utc>) -> OpsResult<usize> {
        let manual = self.config.manual();
        let rate = self.config.international_penalty_rate;
        let mut created: Vec<FlightId> = Vec::with_capacity(self.config.diverted_roster.len());

        let result = (|| -> OpsResult<()> {
            for template in &self.config.diverted_roster {
                let prediction = diverted_prediction(&template.params, manual, rate)?;
                let flight = self.registry.create_flight(NewFlight {
                    flight_number: template.flight_number.clone(),
                    origin: Some(template.origin.clone()),
                    kind: FlightKind::Diverted,
                    status: FlightStatus::Diverted,
                    penalty_rate_per_min: rate,
                    arrival_at: Some(now + Duration::minutes(template.arrival_offset_min)),
                    params: template.params.clone(),
                    prediction,
                })?;
                created.push(flight.id);
            }
            Ok(())
        })();

        if let Err(e) = result {
            tracing::error!(error = %e, created = created.len(), "roster synthesis failed, rolling back");
            for id in &created {
                if let Err(cleanup) = self.registry.delete_flight(*id) {
                    tracing::error!(flight_id = id, error = %cleanup, "rollback could not delete flight");
                }
            }
            return Err(e);
        }
        tracing::info!(count = created.len(), "diverted roster synthesized");
        Ok(created.len())
    }

    /// Puts landed, unserved diverted flights on free priority bowsers and
    /// free international gates, earliest arrival first.
    fn assign_landed(&self, now: DateTime<Utc>) -> OpsResult<usize> {
        let diverted = self.diverted_flights();
        let mut taken: BTreeSet<u8> = diverted.iter().filter_map(|f| f.fueling.bowser_slot).collect();

        let mut waiting: Vec<Flight> = diverted
            .into_iter()
            .filter(|f| {
                f.status == FlightStatus::Diverted
                    && f.fueling.bowser_slot.is_none()
                    && f.fueling.fuel_started_at.is_none()
                    && f.has_landed(now)
            })
            .collect();
        waiting.sort_by_key(|f| (f.arrival_at, f.id));

        let mut free_gates = self.registry.list_gates().into_iter().filter(|g| {
            g.zone == GateZone::International && g.status == GateStatus::Free && g.current_flight_id.is_none()
        });

        let manual = self.config.manual();
        let mut assigned = 0;
        for flight in waiting {
            let Some(slot) = (1..=self.priority_bowsers()).find(|s| !taken.contains(s)) else {
                break;
            };
            let Some(gate) = free_gates.next() else {
                tracing::warn!(flight = %flight.flight_number, "no free international gate for landed diverted flight");
                break;
            };
            let prediction = diverted_prediction(&flight.params, manual, flight.penalty_rate_per_min)?;
            self.registry.update_gate(gate.id, GatePatch::occupy(flight.id))?;
            self.registry.update_flight(
                flight.id,
                FlightPatch {
                    gate_id: Some(Some(gate.id)),
                    prediction: Some(prediction),
                    fueling: Some(FuelTiming {
                        bowser_slot: Some(slot),
                        queue_position: None,
                        fuel_started_at: Some(now),
                    }),
                    ..FlightPatch::default()
                },
            )?;
            taken.insert(slot);
            assigned += 1;
            tracing::info!(flight = %flight.flight_number, slot, gate = %gate.label, "diverted flight on bowser");
        }
        Ok(assigned)
    }

    /// Re-prices every queueable domestic flight on the domestic bowser in
    /// registry order. Returns the queue length.
    pub(crate) fn requeue_domestic(&self, now: DateTime<Utc>) -> OpsResult<usize> {
        let manual = self.config.manual();
        let queue: Vec<Flight> = self.registry.list_flights(None).into_iter().filter(is_queueable).collect();

        let mut wait = 0i64;
        for (i, f) in queue.iter().enumerate() {
            let base = estimate(&f.params, manual, f.penalty_rate_per_min)?;
            let fuel_duration = base.fuel_duration;
            let prediction = with_queue_wait(base, wait, f.params.aircraft_type, f.penalty_rate_per_min)?;
            let fueling = if i == 0 {
                FuelTiming {
                    bowser_slot: Some(self.domestic_bowser()),
                    queue_position: Some(1),
                    fuel_started_at: f.fueling.fuel_started_at.or(Some(now)),
                }
            } else {
                FuelTiming {
                    bowser_slot: None,
                    queue_position: Some(i as u32 + 1),
                    fuel_started_at: None,
                }
            };
            self.registry.update_flight(
                f.id,
                FlightPatch {
                    status: Some(FlightStatus::FuelQueue),
                    prediction: Some(prediction),
                    fueling: Some(fueling),
                    ..FlightPatch::default()
                },
            )?;
            wait = wait.saturating_add(fuel_duration);
        }
        tracing::debug!(queued = queue.len(), total_wait = wait, "domestic bowser queue rebuilt");
        Ok(queue.len())
    }

    /// Re-runs the domestic queue under the transition lock when a crisis
    /// is on; used when a flight is added or refreshed. `false` means normal
    /// operations and nothing was touched.
    pub fn requeue_if_active(&self, now: DateTime<Utc>) -> OpsResult<bool> {
        let _guard = self.transition.lock();
        if !self.is_active() {
            return Ok(false);
        }
        self.requeue_domestic(now)?;
        Ok(true)
    }

    /// Applies what has happened since the last poll: finished diverted
    /// flights give their bowser back, newly landed ones take free bowsers.
    pub fn sync(&self, now: DateTime<Utc>) -> OpsResult<SyncReport> {
        let _guard = self.transition.lock();
        if !self.is_active() {
            return Ok(SyncReport::default());
        }

        let mut released = 0;
        for f in self.diverted_flights() {
            let (Some(_slot), Some(started)) = (f.fueling.bowser_slot, f.fueling.fuel_started_at) else {
                continue;
            };
            if fuel_progress(started, f.prediction.fuel_duration, now).remaining_min > 0.0 {
                continue;
            }
            self.registry.update_flight(
                f.id,
                FlightPatch {
                    status: Some(FlightStatus::Completed),
                    fueling: Some(FuelTiming {
                        bowser_slot: None,
                        ..f.fueling.clone()
                    }),
                    ..FlightPatch::default()
                },
            )?;
            released += 1;
            tracing::info!(flight = %f.flight_number, "diverted flight fueled, bowser released");
        }

        let assigned = self.assign_landed(now)?;
        Ok(SyncReport { released, assigned })
    }

    // ---------- read-only views ----------

    pub fn diverted_view(&self, now: DateTime<Utc>) -> DivertedView {
        if !self.is_active() {
            return DivertedView::default();
        }
        let gates = self.registry.list_gates();
        let mut flights = self.diverted_flights();
        flights.sort_by_key(|f| (f.arrival_at, f.id));

        let flights = flights
            .into_iter()
            .map(|f| {
                let landed = f.has_landed(now);
                let progress = f
                    .fueling
                    .fuel_started_at
                    .map(|started| fuel_progress(started, f.prediction.fuel_duration, now));
                let phase = if !landed {
                    FuelPhase::Inbound
                } else if f.status == FlightStatus::Completed
                    || progress.map_or(false, |p| p.remaining_min <= 0.0)
                {
                    FuelPhase::Fueled
                } else if f.fueling.bowser_slot.is_some() {
                    FuelPhase::Fueling
                } else {
                    FuelPhase::AwaitingBowser
                };
                let gate_label = f
                    .gate_id
                    .and_then(|gid| gates.iter().find(|g| g.id == gid))
                    .map(|g| g.label.clone());
                DivertedFlightView {
                    id: f.id,
                    minutes_to_arrival: f
                        .arrival_at
                        .filter(|_| !landed)
                        .map(|at| (at - now).num_minutes().max(0)),
                    accrued_penalty: self.international_accrual(&f, now),
                    flight_number: f.flight_number,
                    origin: f.origin,
                    aircraft_type: f.params.aircraft_type,
                    phase,
                    arrival_at: f.arrival_at,
                    bowser_slot: f.fueling.bowser_slot,
                    gate_label,
                    fuel_duration: f.prediction.fuel_duration,
                    predicted_tat: f.prediction.predicted_tat,
                    progress,
                }
            })
            .collect();

        DivertedView {
            active: true,
            priority_bowsers: self.priority_bowsers(),
            pump_speed_lpm: self.config.manual_pump_speed_lpm,
            flights,
        }
    }

    pub fn fuel_queue_view(&self, now: DateTime<Utc>) -> FuelQueueView {
        if !self.is_active() {
            return FuelQueueView::default();
        }
        let mut queued: Vec<Flight> = self
            .registry
            .list_flights(Some(FlightStatus::FuelQueue))
            .into_iter()
            .filter(|f| f.kind == FlightKind::Domestic && f.fueling.queue_position.is_some())
            .collect();
        queued.sort_by_key(|f| (f.fueling.queue_position, f.id));

        let durations: Vec<i64> = queued.iter().map(|f| f.prediction.fuel_duration).collect();
        let waits = queue_waits(&durations);
        let entries: Vec<QueueEntry> = queued
            .into_iter()
            .zip(waits)
            .enumerate()
            .map(|(i, (f, wait))| QueueEntry {
                id: f.id,
                position: i as u32 + 1,
                fuel_duration: f.prediction.fuel_duration,
                estimated_wait: wait,
                predicted_tat: f.prediction.predicted_tat,
                penalty_risk: f.prediction.penalty_risk,
                progress: if i == 0 {
                    f.fueling
                        .fuel_started_at
                        .map(|started| fuel_progress(started, f.prediction.fuel_duration, now))
                } else {
                    None
                },
                flight_number: f.flight_number,
            })
            .collect();

        FuelQueueView {
            active: true,
            bowser: self.domestic_bowser(),
            total_wait: durations.iter().sum(),
            entries,
        }
    }

    /// Penalty for minutes on the ground beyond the class target, counted
    /// from landing until fueling finished (or now).
    fn international_accrual(&self, f: &Flight, now: DateTime<Utc>) -> i64 {
        let Some(landed_at) = f.arrival_at.filter(|at| *at <= now) else {
            return 0;
        };
        let until = match (f.status, f.fueling.fuel_started_at) {
            (FlightStatus::Completed, Some(started)) => {
                (started + Duration::minutes(f.prediction.fuel_duration)).min(now)
            }
            _ => now,
        };
        penalty_for(
            whole_minutes_between(landed_at, until),
            f.params.aircraft_type,
            f.penalty_rate_per_min,
        )
        .unwrap_or_else(|err| {
            tracing::warn!(flight = %f.flight_number, %err, "international accrual saturated");
            i64::MAX
        })
    }

    pub fn penalty_summary(&self, now: DateTime<Utc>) -> PenaltySummary {
        if !self.is_active() {
            return PenaltySummary::default();
        }
        let flights = self.registry.list_flights(None);

        let international: Vec<PenaltyLine> = flights
            .iter()
            .filter(|f| f.kind == FlightKind::Diverted && f.has_landed(now))
            .map(|f| PenaltyLine {
                flight_id: f.id,
                flight_number: f.flight_number.clone(),
                penalty: self.international_accrual(f, now),
            })
            .collect();
        let domestic: Vec<PenaltyLine> = flights
            .iter()
            .filter(|f| f.kind == FlightKind::Domestic && f.status == FlightStatus::FuelQueue)
            .map(|f| PenaltyLine {
                flight_id: f.id,
                flight_number: f.flight_number.clone(),
                penalty: f.prediction.penalty_risk,
            })
            .collect();

        let international_total = saturating_total(&international);
        let domestic_total = saturating_total(&domestic);
        PenaltySummary {
            active: true,
            international_total,
            domestic_total,
            total: international_total.saturating_add(domestic_total),
            international,
            domestic,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> CrisisSnapshot {
        CrisisSnapshot {
            state: self.state(),
            diverted: self.diverted_view(now),
            fuel_queue: self.fuel_queue_view(now),
            penalties: self.penalty_summary(now),
        }
    }
}
