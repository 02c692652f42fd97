//! Fair counting semaphores with strict FIFO admission.
//!
//! Two interchangeable variants implement [`FairSemaphore`]:
//! - [`ConditionSemaphore`]: each blocked caller waits on a private
//!   mutex + condition variable.
//! - [`MonitorSemaphore`]: each blocked caller waits on a private monitor
//!   using the thread's park token.
//!
//! Both hand a released permit directly to the longest-waiting caller. A
//! caller only takes the fast path when nobody is queued, so it can never
//! overtake an already-queued waiter.

mod condition;
mod monitor;
mod queue;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use condition::ConditionSemaphore;
pub use monitor::MonitorSemaphore;

use crate::interrupt::{self, Interrupted};

/// Counting semaphore with FIFO hand-off to blocked callers.
pub trait FairSemaphore: Send + Sync + fmt::Debug {
    /// Block until a permit is granted.
    ///
    /// Fails with [`Interrupted`] if the calling thread is interrupted on
    /// entry or while queued. A failed call never consumes a permit.
    fn acquire(&self) -> Result<(), Interrupted>;

    /// Block until a permit is granted, riding out interrupts.
    ///
    /// Interrupts received while waiting are absorbed and the thread's
    /// interrupt flag is raised again before returning.
    fn acquire_uninterruptibly(&self) {
        let mut interruptions = 0usize;
        while let Err(Interrupted) = self.acquire() {
            interruptions += 1;
        }
        if interruptions > 0 {
            tracing::debug!(
                interruptions,
                "Restoring interrupt status after uninterruptible acquire"
            );
            interrupt::current().interrupt();
        }
    }

    /// Take a permit only if one is free and nobody is queued.
    fn try_acquire(&self) -> bool;

    /// Return a permit, waking the longest-waiting caller if any.
    fn release(&self);

    /// Advisory; may be stale as soon as it returns.
    fn available_permits(&self) -> usize;

    /// Advisory; may be stale as soon as it returns.
    fn queued_waiters(&self) -> usize;
}

/// Which blocking strategy a pool's semaphore uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemaphoreKind {
    /// Private condition variable per waiter.
    #[default]
    Condition,
    /// Private monitor per waiter, parked on the thread's park token.
    Monitor,
}

impl SemaphoreKind {
    pub const ALL: [SemaphoreKind; 2] = [SemaphoreKind::Condition, SemaphoreKind::Monitor];

    pub fn build(self, permits: usize) -> Box<dyn FairSemaphore> {
        match self {
            Self::Condition => Box::new(ConditionSemaphore::new(permits)),
            Self::Monitor => Box::new(MonitorSemaphore::new(permits)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for SemaphoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown semaphore kind '{0}', expected 'condition' or 'monitor'")]
pub struct UnknownSemaphoreKind(pub String);

impl FromStr for SemaphoreKind {
    type Err = UnknownSemaphoreKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "condition" | "co" => Ok(Self::Condition),
            "monitor" | "mo" => Ok(Self::Monitor),
            _ => Err(UnknownSemaphoreKind(s.to_string())),
        }
    }
}
