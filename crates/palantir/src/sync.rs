//! Poison-tolerant lock helpers.
//!
//! None of the state behind these locks is left half-updated by a panic in
//! this crate, so a poisoned lock is logged and its inner value reused.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Mutex poisoned - recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("RwLock poisoned - recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("RwLock poisoned - recovering inner state");
            poisoned.into_inner()
        }
    }
}
