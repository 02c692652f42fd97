//! palantir-sim: beings taking turns gazing into a shared pool of palantiri.
//!
//! Each being runs on its own OS thread and repeatedly acquires a palantir,
//! gazes for a random while and releases it. The simulation watches for
//! palantiri handed to two beings at once and for more gazers than palantiri.

pub mod config;
pub mod report;
pub mod simulation;

pub use config::{SimulationConfig, SimulationConfigError};
pub use report::{BeingReport, SimulationReport, Violation};
pub use simulation::{BeingId, Simulation, SimulationError, StopHandle};
