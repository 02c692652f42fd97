//! palantir: fair FIFO semaphores and a bounded pool of named palantiri.
//!
//! Client threads call [`PalantirManager::acquire`] to obtain exactly one
//! free palantir, blocking in strict arrival order when none is free, and
//! hand it back with [`PalantirManager::release`].

pub mod config;
pub mod interrupt;
pub mod manager;
pub mod resource;
pub mod semaphore;
mod sync;

pub use config::{ConfigError, DEFAULT_PALANTIRI, PoolConfig};
pub use interrupt::{InterruptHandle, Interrupted};
pub use manager::{PalantirLease, PalantirManager, PoolError};
pub use resource::{Palantir, PalantirId};
pub use semaphore::{
    ConditionSemaphore, FairSemaphore, MonitorSemaphore, SemaphoreKind, UnknownSemaphoreKind,
};
