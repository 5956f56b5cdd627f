use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

use crate::model::{FuelMode, HYDRANT_RATE_PER_LITER, MANUAL_PUMP_SPEED_LPM};
use crate::types::{AircraftType, FlightParameters, GateZone, MAX_FUEL_LITERS, MAX_PENALTY_RATE};

pub const DEFAULT_CONFIG_PATH: &str = "config/ops.json";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GateSeed {
    pub label: String,
    pub zone: GateZone,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlightSeed {
    pub flight_number: String,
    pub origin: Option<String>,
    #[serde(flatten)]
    pub params: FlightParameters,
}

/// One international arrival synthesised when a fuel crisis starts.
/// `arrivalOffsetMin` is relative to activation: negative means the aircraft
/// is already on the ground.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DivertedTemplate {
    pub flight_number: String,
    pub origin: String,
    pub arrival_offset_min: i64,
    #[serde(flatten)]
    pub params: FlightParameters,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OpsConfig {
    pub port: u16,
    pub hydrant_rate_per_liter: f64,
    pub manual_pump_speed_lpm: f64,
    pub bowser_count: u8,
    pub domestic_penalty_rate: i64,
    pub international_penalty_rate: i64,
    pub simulation_trials: usize,
    pub max_simulation_trials: usize,
    pub push_interval_secs: u64,
    pub gates: Vec<GateSeed>,
    pub seed_flights: Vec<FlightSeed>,
    pub diverted_roster: Vec<DivertedTemplate>,
}

impl OpsConfig {
    pub fn hydrant(&self) -> FuelMode {
        FuelMode::Hydrant {
            rate_per_liter: self.hydrant_rate_per_liter,
        }
    }

    pub fn manual(&self) -> FuelMode {
        FuelMode::Manual {
            pump_speed_lpm: self.manual_pump_speed_lpm,
        }
    }

    pub fn fuel_mode(&self, crisis_active: bool) -> FuelMode {
        if crisis_active {
            self.manual()
        } else {
            self.hydrant()
        }
    }

    /// Reads a JSON config file. A missing file means built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: OpsConfig = serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `OPS_CONFIG` picks the file, `PORT` overrides the port.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("OPS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load(Path::new(&path))?;
        if let Ok(port) = std::env::var("PORT") {
            cfg.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {}", port))?;
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.hydrant_rate_per_liter.is_finite() && self.hydrant_rate_per_liter > 0.0) {
            bail!("hydrantRatePerLiter must be positive");
        }
        if !(self.manual_pump_speed_lpm.is_finite() && self.manual_pump_speed_lpm > 0.0) {
            bail!("manualPumpSpeedLpm must be positive");
        }
        if self.bowser_count < 2 {
            bail!("bowserCount must leave at least one priority bowser and the domestic bowser");
        }
        if self.domestic_penalty_rate < 0 || self.international_penalty_rate < 0 {
            bail!("penalty rates must be >= 0");
        }
        let max_rate = MAX_PENALTY_RATE as i64;
        if self.domestic_penalty_rate > max_rate || self.international_penalty_rate > max_rate {
            bail!("penalty rates must be <= {}", max_rate);
        }
        if let Some(t) = self.diverted_roster.iter().find(|t| !(t.params.fuel_liters <= MAX_FUEL_LITERS)) {
            bail!("diverted flight {} fuelLiters must be <= {}", t.flight_number, MAX_FUEL_LITERS);
        }
        if self.simulation_trials == 0 || self.simulation_trials > self.max_simulation_trials {
            bail!("simulationTrials must be within 1..=maxSimulationTrials");
        }
        if self.push_interval_secs == 0 {
            bail!("pushIntervalSecs must be at least 1");
        }
        Ok(())
    }
}

fn params(
    aircraft_type: AircraftType,
    fuel_liters: f64,
    bags_count: u32,
    priority_bags: u32,
    meals_qty: u32,
    special_meals: u32,
) -> FlightParameters {
    FlightParameters {
        aircraft_type,
        bags_count,
        priority_bags,
        fuel_liters,
        meals_qty,
        special_meals,
        catering_required: true,
        safety_check: true,
        arrival_delay: 0.0,
    }
}

fn default_roster() -> Vec<DivertedTemplate> {
    let wide = AircraftType::Wide;
    [
        ("EK 512", "DXB", -42, params(wide, 18_500.0, 280, 30, 310, 18)),
        ("QR 578", "DOH", -27, params(wide, 16_000.0, 250, 24, 270, 12)),
        ("SQ 402", "SIN", -12, params(wide, 21_000.0, 300, 35, 330, 20)),
        ("BA 257", "LHR", 18, params(wide, 14_500.0, 230, 20, 240, 10)),
        ("LH 760", "FRA", 36, params(wide, 15_800.0, 240, 22, 260, 9)),
    ]
    .into_iter()
    .map(|(number, origin, offset, params)| DivertedTemplate {
        flight_number: number.to_string(),
        origin: origin.to_string(),
        arrival_offset_min: offset,
        params,
    })
    .collect()
}

fn default_gates() -> Vec<GateSeed> {
    let domestic = (1..=6).map(|i| GateSeed {
        label: format!("A{}", i),
        zone: GateZone::Domestic,
    });
    let international = (1..=5).map(|i| GateSeed {
        label: format!("I{}", i),
        zone: GateZone::International,
    });
    domestic.chain(international).collect()
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hydrant_rate_per_liter: HYDRANT_RATE_PER_LITER,
            manual_pump_speed_lpm: MANUAL_PUMP_SPEED_LPM,
            bowser_count: 4,
            domestic_penalty_rate: 5400,
            international_penalty_rate: 15000,
            simulation_trials: 1000,
            max_simulation_trials: 100_000,
            push_interval_secs: 5,
            gates: default_gates(),
            seed_flights: Vec::new(),
            diverted_roster: default_roster(),
        }
    }
}
