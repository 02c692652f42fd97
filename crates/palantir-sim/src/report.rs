//! Simulation outcome.

use std::fmt::Write as _;

use palantir::SemaphoreKind;
use serde::Serialize;

use crate::simulation::BeingId;

/// A palantir observed in the hands of two beings at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub palantir: String,
    pub holder: BeingId,
    pub intruder: BeingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeingReport {
    pub being: BeingId,
    pub gazes: usize,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub semaphore: SemaphoreKind,
    pub palantiri: usize,
    pub beings: Vec<BeingReport>,
    pub total_gazes: usize,
    pub peak_gazing: usize,
    pub violations: Vec<Violation>,
    pub elapsed_ms: u64,
}

impl SimulationReport {
    /// No double grants, never more gazers than palantiri, no failed beings.
    pub fn is_sound(&self) -> bool {
        self.violations.is_empty()
            && self.peak_gazing <= self.palantiri
            && self.beings.iter().all(|b| b.error.is_none())
    }

    pub fn cancelled(&self) -> usize {
        self.beings.iter().filter(|b| b.cancelled).count()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} beings, {} palantiri ({} semaphore), {} ms",
            self.beings.len(),
            self.palantiri,
            self.semaphore,
            self.elapsed_ms
        );
        for being in &self.beings {
            let _ = write!(out, "  {}: {} gazes", being.being, being.gazes);
            if being.cancelled {
                out.push_str(" (cancelled)");
            }
            if let Some(ref error) = being.error {
                let _ = write!(out, " (error: {error})");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "total gazes: {}, peak gazing: {}, violations: {}",
            self.total_gazes,
            self.peak_gazing,
            self.violations.len()
        );
        for violation in &self.violations {
            let _ = writeln!(
                out,
                "  {} held by {} was also granted to {}",
                violation.palantir, violation.holder, violation.intruder
            );
        }
        out
    }
}
