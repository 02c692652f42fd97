//! Simulation driver.
//!
//! Flow:
//! 1. Build a `PalantirManager` from the config
//! 2. Spawn one thread per being
//! 3. Each being gazes `iterations` times, tracked in an occupancy map
//! 4. Join all beings and assemble the report
//!
//! A `StopHandle` interrupts every being: blocked beings leave `acquire`
//! with cancellation, gazing beings stop before their next turn.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use palantir::{
    ConfigError, InterruptHandle, Palantir, PalantirId, PalantirManager, PoolError, interrupt,
};
use rand::Rng;
use serde::Serialize;

use crate::config::{SimulationConfig, SimulationConfigError};
use crate::report::{BeingReport, SimulationReport, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BeingId(pub usize);

impl fmt::Display for BeingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "being-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid simulation config: {0}")]
    InvalidConfig(#[from] SimulationConfigError),
    #[error("simulation is already running")]
    AlreadyRunning,
    #[error("failed to configure palantir pool: {0}")]
    Pool(#[from] ConfigError),
    #[error("failed to spawn being thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0} panicked")]
    BeingPanicked(BeingId),
}

struct Shared {
    manager: PalantirManager,
    occupancy: DashMap<PalantirId, BeingId>,
    gazing: AtomicUsize,
    peak_gazing: AtomicUsize,
    violations: Mutex<Vec<Violation>>,
    running: AtomicBool,
    stopping: AtomicBool,
    beings: DashMap<BeingId, InterruptHandle>,
}

impl Shared {
    fn begin_gaze(&self, being: BeingId, palantir: &Palantir) {
        if let Some(holder) = self.occupancy.insert(palantir.id(), being) {
            tracing::error!(
                palantir = %palantir,
                %holder,
                intruder = %being,
                "Palantir granted to two beings at once"
            );
            let mut violations = self
                .violations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            violations.push(Violation {
                palantir: palantir.name().to_string(),
                holder,
                intruder: being,
            });
        }
        let gazing = self.gazing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_gazing.fetch_max(gazing, Ordering::SeqCst);
    }

    fn end_gaze(&self, being: BeingId, palantir: &Palantir) {
        self.gazing.fetch_sub(1, Ordering::SeqCst);
        self.occupancy.remove_if(&palantir.id(), |_, holder| *holder == being);
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        for being in self.beings.iter() {
            tracing::debug!(
                being = %being.key(),
                thread = ?being.value().thread().id(),
                "Interrupting being"
            );
            being.value().interrupt();
        }
    }

    /// Clear everything a previous run left behind.
    fn reset(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.beings.clear();
        self.occupancy.clear();
        self.gazing.store(0, Ordering::SeqCst);
        self.peak_gazing.store(0, Ordering::SeqCst);
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Clears the running flag when a run ends, including by early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Interrupts every being of the current run.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!("Stopping simulation");
        self.shared.stop();
    }
}

pub struct Simulation {
    config: SimulationConfig,
    shared: Arc<Shared>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let manager = PalantirManager::from_config(&config.pool_config())?;

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                occupancy: DashMap::new(),
                gazing: AtomicUsize::new(0),
                peak_gazing: AtomicUsize::new(0),
                violations: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                beings: DashMap::with_capacity(config.beings),
            }),
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn manager(&self) -> &PalantirManager {
        &self.shared.manager
    }

    pub fn stopper(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run every being to completion (or until stopped) and report.
    ///
    /// Each run starts from a clean slate; a stop issued before the run
    /// begins has no effect on it. Fails with
    /// [`SimulationError::AlreadyRunning`] while another run is in progress.
    pub fn run(&self) -> Result<SimulationReport, SimulationError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SimulationError::AlreadyRunning);
        }
        let _running = RunGuard(&self.shared.running);
        self.shared.reset();

        let started = Instant::now();
        tracing::info!(
            beings = self.config.beings,
            palantiri = self.config.palantiri,
            semaphore = %self.config.semaphore,
            "Starting simulation"
        );

        let mut handles = Vec::with_capacity(self.config.beings);
        for i in 0..self.config.beings {
            let being = BeingId(i);
            let shared = Arc::clone(&self.shared);
            let config = self.config.clone();
            let handle = thread::Builder::new()
                .name(being.to_string())
                .spawn(move || gaze_loop(being, &shared, &config));
            match handle {
                Ok(handle) => handles.push((being, handle)),
                Err(e) => {
                    tracing::error!(%being, error = %e, "Failed to spawn being");
                    self.shared.stop();
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(SimulationError::Spawn(e));
                }
            }
        }

        let mut beings = Vec::with_capacity(handles.len());
        for (being, handle) in handles {
            let report = handle
                .join()
                .map_err(|_| SimulationError::BeingPanicked(being))?;
            beings.push(report);
        }

        let report = SimulationReport {
            semaphore: self.config.semaphore,
            palantiri: self.config.palantiri,
            total_gazes: beings.iter().map(|b| b.gazes).sum(),
            beings,
            peak_gazing: self.shared.peak_gazing.load(Ordering::SeqCst),
            violations: self
                .shared
                .violations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            total_gazes = report.total_gazes,
            peak_gazing = report.peak_gazing,
            violations = report.violations.len(),
            "Simulation finished"
        );
        Ok(report)
    }
}

fn gaze_loop(being: BeingId, shared: &Shared, config: &SimulationConfig) -> BeingReport {
    shared.beings.insert(being, interrupt::current());

    let mut rng = rand::rng();
    let mut report = BeingReport {
        being,
        gazes: 0,
        cancelled: false,
        error: None,
    };

    for _ in 0..config.iterations {
        if shared.stopping.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }

        let lease = match shared.manager.acquire_lease() {
            Ok(lease) => lease,
            Err(PoolError::Interrupted(_)) => {
                tracing::debug!(%being, "Being interrupted while waiting");
                report.cancelled = true;
                break;
            }
            Err(e) => {
                tracing::error!(%being, error = %e, "Being failed to acquire a palantir");
                report.error = Some(e.to_string());
                break;
            }
        };

        shared.begin_gaze(being, &lease);
        let gaze = rng.random_range(config.gaze_min_ms..=config.gaze_max_ms);
        tracing::trace!(%being, palantir = %*lease, gaze_ms = gaze, "Gazing");
        thread::sleep(Duration::from_millis(gaze));
        shared.end_gaze(being, &lease);
        report.gazes += 1;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use palantir::SemaphoreKind;

    fn config(kind: SemaphoreKind) -> SimulationConfig {
        SimulationConfig {
            beings: 6,
            palantiri: 2,
            iterations: 3,
            gaze_min_ms: 0,
            gaze_max_ms: 2,
            semaphore: kind,
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Simulation::new(SimulationConfig {
            palantiri: 0,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, SimulationError::InvalidConfig(_)));
    }

    #[test]
    fn every_being_completes_its_gazes() {
        for kind in SemaphoreKind::ALL {
            let simulation = Simulation::new(config(kind)).unwrap();
            let report = simulation.run().unwrap();

            assert!(report.is_sound(), "{}", report.summary());
            assert_eq!(report.total_gazes, 18);
            assert!(report.beings.iter().all(|b| b.gazes == 3 && !b.cancelled));
            assert!(report.peak_gazing >= 1 && report.peak_gazing <= 2);

            assert_eq!(simulation.manager().in_use(), 0);
            assert_eq!(simulation.manager().available_permits(), 2);
        }
    }

    #[test]
    fn simulation_runs_again_after_stop() {
        for kind in SemaphoreKind::ALL {
            let simulation = Simulation::new(config(kind)).unwrap();
            let first = simulation.run().unwrap();
            assert_eq!(first.total_gazes, 18);

            simulation.stopper().stop();

            let second = simulation.run().unwrap();
            assert_eq!(second.cancelled(), 0, "{}", second.summary());
            assert_eq!(second.total_gazes, 18);
            assert!(second.is_sound());
            assert_eq!(simulation.manager().available_permits(), 2);
        }
    }

    #[test]
    fn single_palantir_serializes_beings() {
        let simulation = Simulation::new(SimulationConfig {
            beings: 4,
            palantiri: 1,
            iterations: 5,
            gaze_min_ms: 0,
            gaze_max_ms: 1,
            semaphore: SemaphoreKind::Monitor,
        })
        .unwrap();
        let report = simulation.run().unwrap();

        assert_eq!(report.peak_gazing, 1);
        assert_eq!(report.total_gazes, 20);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn stop_interrupts_all_beings() {
        for kind in SemaphoreKind::ALL {
            let simulation = Arc::new(
                Simulation::new(SimulationConfig {
                    beings: 4,
                    palantiri: 1,
                    iterations: 10_000,
                    gaze_min_ms: 1,
                    gaze_max_ms: 2,
                    semaphore: kind,
                })
                .unwrap(),
            );
            let stopper = simulation.stopper();

            let runner = {
                let simulation = Arc::clone(&simulation);
                thread::spawn(move || simulation.run())
            };
            thread::sleep(Duration::from_millis(50));
            stopper.stop();

            let report = runner.join().unwrap().unwrap();
            assert!(report.is_sound(), "{}", report.summary());
            assert_eq!(report.cancelled(), 4);
            assert!(report.total_gazes < 40_000);
            assert_eq!(simulation.manager().in_use(), 0);
            assert_eq!(simulation.manager().waiting(), 0);
            assert_eq!(simulation.manager().available_permits(), 1);
        }
    }
}
