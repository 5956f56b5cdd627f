/// Engine-level scenarios for the turnaround service
///
/// Run with: cargo test --test integration_tests -- --nocapture

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

use turnaround_ops::api::AppState;
use turnaround_ops::config::{DivertedTemplate, OpsConfig};
use turnaround_ops::crisis::FuelPhase;
use turnaround_ops::model::{estimate, FuelMode};
use turnaround_ops::types::{
    AircraftType, Bottleneck, CreateFlightRequest, Flight, FlightKind, FlightParameters,
    FlightStatus, GateStatus, PredictRequest,
};
use turnaround_ops::OpsError;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn fuel_only(number: &str, liters: f64) -> CreateFlightRequest {
    CreateFlightRequest {
        flight_number: number.to_string(),
        origin: Some("BLR".to_string()),
        ground: PredictRequest {
            aircraft_type: Some("Narrow".to_string()),
            fuel_liters: Some(liters),
            ..PredictRequest::default()
        },
    }
}

fn narrow_request() -> PredictRequest {
    PredictRequest {
        aircraft_type: Some("Narrow".to_string()),
        fuel_liters: Some(5000.0),
        bags_count: 150.0,
        priority_bags: 20.0,
        meals_qty: 180.0,
        special_meals: 5.0,
        catering_required: true,
        safety_check: true,
        ..PredictRequest::default()
    }
}

fn diverted(flights: &[Flight]) -> HashSet<(String, u64)> {
    flights
        .iter()
        .filter(|f| f.kind == FlightKind::Diverted)
        .map(|f| (f.flight_number.clone(), f.id))
        .collect()
}

fn assert_gates_exclusive(state: &AppState) {
    let mut seen = HashSet::new();
    for gate in state.service.gates() {
        if let Some(id) = gate.current_flight_id {
            assert!(seen.insert(id), "flight {} referenced by two gates", id);
        }
    }
}

#[test]
fn test_wide_body_end_to_end() {
    println!("\n=== Test: Wide-body End to End ===");
    let state = AppState::new(OpsConfig::default());
    let req = PredictRequest {
        aircraft_type: Some("Wide".to_string()),
        fuel_liters: Some(15200.0),
        bags_count: 245.0,
        priority_bags: 22.0,
        meals_qty: 248.0,
        special_meals: 14.0,
        catering_required: true,
        safety_check: true,
        ..PredictRequest::default()
    };
    let r = state.service.predict(&req).unwrap();
    println!("  tat={} bottleneck={:?} penalty={}", r.predicted_tat, r.bottleneck, r.penalty_risk);

    assert_eq!(
        (r.baggage_duration, r.fuel_duration, r.catering_duration, r.safety_check_duration),
        (39, 30, 21, 15)
    );
    assert_eq!(r.predicted_tat, 115);
    assert_eq!(r.bottleneck, Some(Bottleneck::Baggage));
    assert_eq!(r.penalty_risk, 297_000);
    println!("✓ Scenario matches");
}

#[test]
fn test_prediction_invariants_hold() {
    println!("\n=== Test: Prediction Invariants ===");
    let rates = [0i64, 5400, 15000];
    for bags in [0u32, 37, 150, 400] {
        for liters in [0.0, 2500.0, 9999.0, 30000.0] {
            for aircraft_type in [AircraftType::Narrow, AircraftType::Wide] {
                let params = FlightParameters {
                    aircraft_type,
                    bags_count: bags,
                    priority_bags: bags / 10,
                    fuel_liters: liters,
                    meals_qty: bags,
                    special_meals: 3,
                    catering_required: bags % 2 == 0,
                    safety_check: liters > 0.0,
                    arrival_delay: 0.0,
                };
                for rate in rates {
                    for mode in [FuelMode::hydrant(), FuelMode::manual()] {
                        let r = estimate(&params, mode, rate).unwrap();
                        assert_eq!(
                            r.predicted_tat,
                            r.baggage_duration + r.fuel_duration + r.catering_duration + r.safety_check_duration + 10
                        );
                        assert_eq!(
                            r.penalty_risk,
                            (r.predicted_tat - aircraft_type.target_tat()).max(0) * rate
                        );
                    }
                }
            }
        }
    }
    println!("✓ TAT sum and penalty formula hold across the grid");
}

#[test]
fn test_first_failing_field_is_reported() {
    println!("\n=== Test: Validation ===");
    let state = AppState::new(OpsConfig::default());

    let mut req = narrow_request();
    req.aircraft_type = None;
    req.bags_count = -1.0;
    match state.service.predict(&req) {
        Err(OpsError::InvalidParameters { field, .. }) => assert_eq!(field, "aircraftType"),
        other => panic!("expected InvalidParameters, got {:?}", other),
    }

    let mut req = narrow_request();
    req.aircraft_type = Some("Jumbo".to_string());
    assert!(matches!(
        state.service.predict(&req),
        Err(OpsError::InvalidParameters { field: "aircraftType", .. })
    ));

    let mut req = narrow_request();
    req.bags_count = -1.0;
    req.meals_qty = 2.5;
    assert!(matches!(
        state.service.predict(&req),
        Err(OpsError::InvalidParameters { field: "bagsCount", .. })
    ));

    let mut req = narrow_request();
    req.fuel_liters = Some(f64::INFINITY);
    assert!(matches!(
        state.service.predict(&req),
        Err(OpsError::InvalidParameters { field: "fuelLiters", .. })
    ));
    println!("✓ First failing field named");
}

#[test]
fn test_oversized_values_are_rejected() {
    println!("\n=== Test: Upper Bounds ===");
    let state = AppState::new(OpsConfig::default());
    let mut rng = StdRng::seed_from_u64(7);

    let mut req = narrow_request();
    req.fuel_liters = Some(1e19);
    assert!(matches!(
        state.service.predict(&req),
        Err(OpsError::InvalidParameters { field: "fuelLiters", .. })
    ));
    assert!(matches!(
        state.service.simulate(&req, &mut rng),
        Err(OpsError::InvalidParameters { field: "fuelLiters", .. })
    ));

    let mut req = narrow_request();
    req.penalty_rate_per_min = Some(1e30);
    assert!(matches!(
        state.service.predict(&req),
        Err(OpsError::InvalidParameters { field: "penaltyRatePerMin", .. })
    ));

    let mut req = narrow_request();
    req.fuel_liters = Some(1.0e6);
    req.penalty_rate_per_min = Some(1.0e7);
    assert!(state.service.predict(&req).is_ok());

    assert!(matches!(
        state.service.create_flight(fuel_only("AI 101", 1e19), t0()),
        Err(OpsError::InvalidParameters { field: "fuelLiters", .. })
    ));
    assert!(state.service.flights(None).is_empty());
    println!("✓ Oversized fuel and rate fail validation");
}

#[test]
fn test_simulation_scenario() {
    println!("\n=== Test: Monte Carlo Scenario ===");
    let state = AppState::new(OpsConfig::default());
    let mut rng = StdRng::seed_from_u64(2024);

    for round in 0..10 {
        let r = state.service.simulate(&narrow_request(), &mut rng).unwrap();
        assert_eq!(r.trials, 1000);
        assert!(r.p50.tat <= r.p75.tat && r.p75.tat <= r.p90.tat);
        let total: u32 = r.histogram_data.iter().map(|b| b.count).sum();
        assert_eq!(total, 1000);
        if round == 0 {
            println!(
                "  p50={} p75={} p90={} consistency={}% bins={}",
                r.p50.tat,
                r.p75.tat,
                r.p90.tat,
                r.bottleneck_consistency,
                r.histogram_data.len()
            );
        }
    }

    let mut too_many = narrow_request();
    too_many.trials = Some(1_000_000);
    assert!(matches!(
        state.service.simulate(&too_many, &mut rng),
        Err(OpsError::InvalidParameters { field: "trials", .. })
    ));
    println!("✓ Percentiles ordered, histogram complete");
}

#[test]
fn test_activate_is_idempotent() {
    println!("\n=== Test: Crisis Idempotence ===");
    let state = AppState::new(OpsConfig::default());

    let first = state.crisis.activate(t0()).unwrap();
    assert!(first.changed);
    let once = diverted(&state.service.flights(None));

    let second = state.crisis.activate(t0() + Duration::minutes(1)).unwrap();
    assert!(!second.changed);
    assert_eq!(second.state.activated_at, Some(t0()));
    let twice = diverted(&state.service.flights(None));

    assert_eq!(once.len(), 5);
    assert_eq!(once, twice);
    println!("✓ {} diverted flights after two activations", twice.len());
}

#[test]
fn test_domestic_queue_waits() {
    println!("\n=== Test: Domestic Queue Ordering ===");
    let state = AppState::new(OpsConfig::default());
    // 500 L/min: 10, 14 and 8 minutes of pumping
    for (number, liters) in [("6E 101", 5000.0), ("6E 102", 7000.0), ("6E 103", 4000.0)] {
        state.service.create_flight(fuel_only(number, liters), t0()).unwrap();
    }
    state.crisis.activate(t0()).unwrap();

    let view = state.crisis.fuel_queue_view(t0() + Duration::minutes(4));
    assert!(view.active);
    assert_eq!(view.bowser, 4);
    let waits: Vec<i64> = view.entries.iter().map(|e| e.estimated_wait).collect();
    let fuel: Vec<i64> = view.entries.iter().map(|e| e.fuel_duration).collect();
    println!("  fuel={:?} waits={:?}", fuel, waits);
    assert_eq!(fuel, vec![10, 14, 8]);
    assert_eq!(waits, vec![0, 10, 24]);

    // own fuel + pad + wait; Narrow target is 35
    let tats: Vec<i64> = view.entries.iter().map(|e| e.predicted_tat).collect();
    assert_eq!(tats, vec![20, 34, 42]);
    assert_eq!(view.entries[2].penalty_risk, 7 * 5400);

    let head = view.entries[0].progress.expect("head of queue is fueling");
    assert_eq!(head.elapsed_min, 4.0);
    assert_eq!(head.remaining_min, 6.0);
    assert!(view.entries[1..].iter().all(|e| e.progress.is_none()));

    let penalties = state.crisis.penalty_summary(t0());
    assert_eq!(penalties.domestic_total, 7 * 5400);
    println!("✓ Third flight waits 24 minutes");
}

#[test]
fn test_deactivate_reverts_everything() {
    println!("\n=== Test: Crisis Reversibility ===");
    let config = OpsConfig {
        manual_pump_speed_lpm: 250.0,
        ..OpsConfig::default()
    };
    let state = AppState::new(config);
    let a = state.service.create_flight(fuel_only("UK 801", 6000.0), t0()).unwrap();
    let b = state.service.create_flight(fuel_only("UK 802", 9000.0), t0()).unwrap();
    state.service.assign_gate(1, a.id).unwrap();
    let before: Vec<Flight> = state.service.flights(None);

    state.crisis.activate(t0()).unwrap();
    let during_b = state.service.flight(b.id).unwrap();
    assert_eq!(during_b.status, FlightStatus::FuelQueue);
    // 9000 L at 250 L/min, behind 24 min of UK 801
    assert_eq!(during_b.prediction.fuel_duration, 36);
    assert_eq!(during_b.prediction.predicted_tat, 36 + 10 + 24);
    assert_gates_exclusive(&state);

    let out = state.crisis.deactivate(t0() + Duration::minutes(10)).unwrap();
    assert!(out.changed && !out.state.active);
    let after = state.service.flights(None);
    assert!(after.iter().all(|f| f.kind == FlightKind::Domestic));
    assert_eq!(after, before);
    assert!(state
        .service
        .gates()
        .iter()
        .filter(|g| g.label.starts_with('I'))
        .all(|g| g.status == GateStatus::Free && g.current_flight_id.is_none()));
    assert_gates_exclusive(&state);

    let again = state.crisis.deactivate(t0() + Duration::minutes(11)).unwrap();
    assert!(!again.changed);
    println!("✓ Diverted flights removed, hydrant predictions restored");
}

#[test]
fn test_reactivation_after_deactivation() {
    println!("\n=== Test: Re-activation ===");
    let state = AppState::new(OpsConfig::default());
    state.crisis.activate(t0()).unwrap();
    state.crisis.deactivate(t0() + Duration::minutes(5)).unwrap();
    state.crisis.activate(t0() + Duration::minutes(10)).unwrap();

    let flights = state.service.flights(None);
    assert_eq!(diverted(&flights).len(), 5);
    let view = state.crisis.diverted_view(t0() + Duration::minutes(10));
    let fueling = view.flights.iter().filter(|f| f.phase == FuelPhase::Fueling).count();
    assert_eq!(fueling, 3);
    assert_gates_exclusive(&state);
    println!("✓ Fresh roster on second activation");
}

#[test]
fn test_gate_exclusion_through_crisis_lifecycle() {
    println!("\n=== Test: Gate Mutual Exclusion ===");
    let state = AppState::new(OpsConfig::default());
    let flights: Vec<Flight> = (0..4)
        .map(|i| {
            state
                .service
                .create_flight(fuel_only(&format!("SG {}", 300 + i), 3000.0 + 500.0 * i as f64), t0())
                .unwrap()
        })
        .collect();
    for (i, f) in flights.iter().enumerate().take(3) {
        state.service.assign_gate(i as u64 + 1, f.id).unwrap();
        assert_gates_exclusive(&state);
    }
    assert!(matches!(
        state.service.assign_gate(4, flights[0].id),
        Err(OpsError::ConflictState(_))
    ));

    state.crisis.activate(t0()).unwrap();
    assert_gates_exclusive(&state);
    for minutes in [10, 20, 40, 60, 90] {
        state.crisis.sync(t0() + Duration::minutes(minutes)).unwrap();
        assert_gates_exclusive(&state);
    }
    // the fourth flight can still take a domestic gate mid-crisis
    let (_, f) = state.service.assign_gate(4, flights[3].id).unwrap();
    assert_eq!(f.status, FlightStatus::FuelQueue);
    assert_gates_exclusive(&state);

    state.crisis.deactivate(t0() + Duration::minutes(95)).unwrap();
    assert_gates_exclusive(&state);
    assert_eq!(state.service.flight(flights[3].id).unwrap().status, FlightStatus::Active);
    println!("✓ No gate ever shared");
}

#[test]
fn test_gate_lifecycle() {
    println!("\n=== Test: Gate Lifecycle ===");
    let state = AppState::new(OpsConfig::default());
    let f = state.service.create_flight(fuel_only("AI 501", 5000.0), t0()).unwrap();
    assert_eq!(f.status, FlightStatus::Scheduled);

    // I1 is international
    let intl = state.service.gates().into_iter().find(|g| g.label == "I1").unwrap();
    assert!(matches!(
        state.service.assign_gate(intl.id, f.id),
        Err(OpsError::ConflictState(_))
    ));

    let (gate, flight) = state.service.assign_gate(1, f.id).unwrap();
    assert_eq!(gate.status, GateStatus::Active);
    assert_eq!(gate.current_flight_id, Some(f.id));
    assert_eq!(flight.status, FlightStatus::Active);
    assert_eq!(flight.gate_id, Some(1));

    let (gate, released) = state.service.release_gate(1, t0()).unwrap();
    assert_eq!(gate.status, GateStatus::Clearing);
    assert_eq!(released.unwrap().status, FlightStatus::Completed);
    assert!(matches!(state.service.release_gate(1, t0()), Err(OpsError::ConflictState(_))));

    let gate = state.service.clear_gate(1).unwrap();
    assert_eq!(gate.status, GateStatus::Free);
    assert!(matches!(state.service.clear_gate(1), Err(OpsError::ConflictState(_))));
    assert!(matches!(state.service.assign_gate(99, f.id), Err(OpsError::NotFound { .. })));
    println!("✓ FREE -> ACTIVE -> CLEARING -> FREE");
}

#[test]
fn test_flight_created_mid_crisis_joins_queue_tail() {
    println!("\n=== Test: Mid-crisis Intake ===");
    let state = AppState::new(OpsConfig::default());
    state.service.create_flight(fuel_only("6E 201", 5000.0), t0()).unwrap();
    state.crisis.activate(t0()).unwrap();

    let late = state.service.create_flight(fuel_only("6E 202", 6000.0), t0() + Duration::minutes(3)).unwrap();
    assert_eq!(late.status, FlightStatus::FuelQueue);
    assert_eq!(late.fueling.queue_position, Some(2));
    assert_eq!(late.prediction.predicted_tat, 12 + 10 + 10);

    let view = state.crisis.fuel_queue_view(t0() + Duration::minutes(3));
    // head keeps its original start time
    assert_eq!(view.entries[0].progress.unwrap().elapsed_min, 3.0);

    let refreshed = state.service.refresh_prediction(late.id, t0() + Duration::minutes(4)).unwrap();
    assert_eq!(refreshed.prediction, late.prediction);
    println!("✓ Late flight queued behind existing one");
}

#[test]
fn test_roster_rolls_back_on_failure() {
    println!("\n=== Test: Roster Rollback ===");
    let mut config = OpsConfig::default();
    let mut broken: DivertedTemplate = config.diverted_roster[0].clone();
    broken.flight_number = "  ".to_string();
    config.diverted_roster.insert(2, broken);
    let state = AppState::new(config);

    let err = state.crisis.activate(t0()).unwrap_err();
    assert!(matches!(err, OpsError::InvalidParameters { field: "flightNumber", .. }));
    assert!(diverted(&state.service.flights(None)).is_empty());
    assert!(!state.crisis.is_active());
    assert!(state.service.gates().iter().all(|g| g.current_flight_id.is_none()));
    println!("✓ No partial roster left behind");
}

#[test]
fn test_international_penalties_and_progress() {
    println!("\n=== Test: International Cohort ===");
    let state = AppState::new(OpsConfig::default());
    state.crisis.activate(t0()).unwrap();

    let at = t0() + Duration::minutes(10);
    let view = state.crisis.diverted_view(at);
    let ek = view.flights.iter().find(|f| f.flight_number == "EK 512").unwrap();
    let progress = ek.progress.unwrap();
    // 18500 L at 500 L/min
    assert_eq!(ek.fuel_duration, 37);
    assert_eq!(progress.elapsed_min, 10.0);
    assert_eq!(progress.remaining_min, 27.0);
    assert!(ek.gate_label.as_deref().unwrap().starts_with('I'));

    let ba = view.flights.iter().find(|f| f.flight_number == "BA 257").unwrap();
    assert_eq!(ba.phase, FuelPhase::Inbound);
    assert_eq!(ba.minutes_to_arrival, Some(8));

    // EK 512 on the ground 52 min, QR 578 37, SQ 402 22: only EK is past 60 later
    let summary = state.crisis.penalty_summary(t0() + Duration::minutes(25));
    assert_eq!(summary.international_total, (67 - 60) * 15000);
    assert_eq!(summary.domestic_total, 0);
    assert_eq!(summary.total, summary.international_total);

    // EK 512 finishes at +37; accrual freezes there
    state.crisis.sync(t0() + Duration::minutes(40)).unwrap();
    let frozen = state.crisis.penalty_summary(t0() + Duration::minutes(120));
    let ek_line = frozen.international.iter().find(|l| l.flight_number == "EK 512").unwrap();
    assert_eq!(ek_line.penalty, (79 - 60) * 15000);
    println!("✓ Accrual from landing, frozen after fueling");
}

#[test]
fn test_released_diverted_gate_keeps_accrual_frozen() {
    println!("\n=== Test: Diverted Gate Release ===");
    let state = AppState::new(OpsConfig::default());
    state.crisis.activate(t0()).unwrap();

    let done = t0() + Duration::minutes(40);
    state.crisis.sync(done).unwrap();
    let ek = state
        .service
        .flights(None)
        .into_iter()
        .find(|f| f.flight_number == "EK 512")
        .unwrap();
    let before = state.crisis.penalty_summary(done);
    let ek_before = before.international.iter().find(|l| l.flight_number == "EK 512").unwrap().penalty;

    let (gate, released) = state.service.release_gate(ek.gate_id.unwrap(), done).unwrap();
    let released = released.unwrap();
    assert_eq!(gate.status, GateStatus::Clearing);
    assert_eq!(released.status, FlightStatus::Completed);
    assert_eq!(released.fueling.bowser_slot, None);
    assert_eq!(released.fueling.fuel_started_at, Some(t0()));

    for later in [done, t0() + Duration::minutes(600)] {
        let summary = state.crisis.penalty_summary(later);
        let line = summary.international.iter().find(|l| l.flight_number == "EK 512").unwrap();
        assert_eq!(line.penalty, ek_before);
    }
    assert_eq!(ek_before, (79 - 60) * 15000);
    println!("✓ Gate release does not restart the penalty clock");
}

#[test]
fn test_flights_created_after_deactivation_stay_scheduled() {
    println!("\n=== Test: Intake After Crisis ===");
    let state = AppState::new(OpsConfig::default());
    state.crisis.activate(t0()).unwrap();
    state.crisis.deactivate(t0() + Duration::minutes(5)).unwrap();

    let flight = state
        .service
        .create_flight(fuel_only("SG 410", 6000.0), t0() + Duration::minutes(6))
        .unwrap();
    assert_eq!(flight.status, FlightStatus::Scheduled);
    assert_eq!(flight.fueling.queue_position, None);
    assert!(!state.crisis.requeue_if_active(t0() + Duration::minutes(7)).unwrap());

    let refreshed = state.service.refresh_prediction(flight.id, t0() + Duration::minutes(7)).unwrap();
    assert_eq!(refreshed.status, FlightStatus::Scheduled);
    assert_eq!(refreshed.prediction.fuel_duration, 12);
    println!("✓ No queue outside a crisis");
}
