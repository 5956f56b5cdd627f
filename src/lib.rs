//! Ground-operations turnaround service: deterministic TAT estimates,
//! Monte Carlo risk, and bowser allocation during a fuel-supply crisis.

pub mod api;
pub mod config;
pub mod crisis;
pub mod error;
pub mod model;
pub mod registry;
pub mod simulation;
pub mod stats;
pub mod turnaround;
pub mod types;

pub use error::{OpsError, OpsResult};
