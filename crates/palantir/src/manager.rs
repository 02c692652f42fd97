//! Palantir pool manager.
//!
//! Maps abstract semaphore permits onto concrete palantiri. The availability
//! map is a `DashMap<PalantirId, bool>` mutated with compare-and-swap, kept
//! in step with the semaphore: a permit is granted only when some entry is
//! `true`, and a permit is returned only on a `false -> true` transition.

use std::ops::Deref;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::config::{ConfigError, PoolConfig};
use crate::interrupt::Interrupted;
use crate::resource::{Palantir, PalantirId};
use crate::semaphore::{FairSemaphore, SemaphoreKind};
use crate::sync::{read, write};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("interrupted while waiting for a palantir")]
    Interrupted(#[from] Interrupted),
    #[error("palantir model has not been built")]
    NotBuilt,
    #[error(
        "cannot rebuild the palantir model while {in_use} palantiri are in use and {waiting} callers wait"
    )]
    Busy { in_use: usize, waiting: usize },
    #[error("palantir factory produced duplicate identities")]
    DuplicatePalantir,
    /// The semaphore granted a permit but no palantir was available.
    /// Never caused by caller misuse.
    #[error(
        "internal inconsistency: permit granted but no palantir available ({available_permits} permits left)"
    )]
    Inconsistent { available_permits: usize },
}

impl PoolError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// True when the pool's own invariant is broken.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }
}

struct PoolModel {
    /// Immutable after construction; also the scan order for claims.
    palantiri: Vec<Palantir>,
    available: DashMap<PalantirId, bool>,
    semaphore: Box<dyn FairSemaphore>,
}

impl PoolModel {
    /// Compare-and-swap one availability entry.
    ///
    /// `None` if the palantir is unknown, otherwise whether the swap happened.
    fn replace(&self, id: &PalantirId, expected: bool, new: bool) -> Option<bool> {
        let mut entry = self.available.get_mut(id)?;
        if *entry == expected {
            *entry = new;
            Some(true)
        } else {
            Some(false)
        }
    }

    fn claim(&self) -> Option<Palantir> {
        self.palantiri
            .iter()
            .find(|p| self.replace(&p.id(), true, false) == Some(true))
            .cloned()
    }

    fn in_use(&self) -> usize {
        self.available.iter().filter(|entry| !*entry.value()).count()
    }

    /// Palantiri checked out or promised to a caller by a granted permit.
    ///
    /// A permit is taken before its palantir is claimed and returned after
    /// its palantir is marked available, so the permit count covers the
    /// windows the availability map alone does not.
    fn outstanding(&self) -> usize {
        let granted = self
            .palantiri
            .len()
            .saturating_sub(self.semaphore.available_permits());
        granted.max(self.in_use())
    }
}

/// Pool of palantiri handed out one per acquisition in FIFO order.
pub struct PalantirManager {
    kind: SemaphoreKind,
    model: RwLock<Option<Arc<PoolModel>>>,
}

impl PalantirManager {
    /// Empty manager; [`build_model`](Self::build_model) must run before acquiring.
    pub fn new(kind: SemaphoreKind) -> Self {
        Self {
            kind,
            model: RwLock::new(None),
        }
    }

    /// Manager with its model already built from `config`.
    pub fn from_config(config: &PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let manager = Self::new(config.semaphore);
        manager.build_model(config.palantiri)?;
        Ok(manager)
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    /// Build `count` palantiri named `Palantir-1..=count`, all available.
    pub fn build_model(&self, count: usize) -> Result<(), PoolError> {
        self.build_model_with(count, Palantir::numbered)
    }

    /// Build the model from a caller-supplied palantir factory.
    ///
    /// Discards the previous model. Fails with [`PoolError::Busy`] while any
    /// palantir of the previous model is checked out or handed off, or while
    /// any caller is blocked on it.
    pub fn build_model_with<F>(&self, count: usize, factory: F) -> Result<(), PoolError>
    where
        F: FnMut(usize) -> Palantir,
    {
        let palantiri: Vec<Palantir> = (0..count).map(factory).collect();
        let semaphore = self.kind.build(palantiri.len());
        self.rebuild(palantiri, semaphore)
    }

    fn rebuild(
        &self,
        palantiri: Vec<Palantir>,
        semaphore: Box<dyn FairSemaphore>,
    ) -> Result<(), PoolError> {
        let mut current = write(&self.model);
        if let Some(model) = current.as_ref() {
            let in_use = model.outstanding();
            let waiting = model.semaphore.queued_waiters();
            if in_use > 0 || waiting > 0 {
                tracing::warn!(
                    in_use,
                    waiting,
                    "Refusing to rebuild palantir model while in use"
                );
                return Err(PoolError::Busy { in_use, waiting });
            }
        }

        let model = Self::assemble(palantiri, semaphore)?;
        tracing::info!(
            palantiri = model.palantiri.len(),
            semaphore = %self.kind,
            "Palantir model built"
        );
        *current = Some(Arc::new(model));
        Ok(())
    }

    fn assemble(
        palantiri: Vec<Palantir>,
        semaphore: Box<dyn FairSemaphore>,
    ) -> Result<PoolModel, PoolError> {
        let available: DashMap<PalantirId, bool> =
            palantiri.iter().map(|p| (p.id(), true)).collect();
        if available.len() != palantiri.len() {
            return Err(PoolError::DuplicatePalantir);
        }
        Ok(PoolModel {
            palantiri,
            available,
            semaphore,
        })
    }

    fn model(&self) -> Result<Arc<PoolModel>, PoolError> {
        read(&self.model).clone().ok_or(PoolError::NotBuilt)
    }

    /// Block until a palantir is free, then check it out.
    ///
    /// Waiters are served strictly in arrival order.
    pub fn acquire(&self) -> Result<Palantir, PoolError> {
        let model = self.model()?;
        model.semaphore.acquire()?;

        match model.claim() {
            Some(palantir) => {
                tracing::debug!(palantir = %palantir, "Palantir acquired");
                Ok(palantir)
            }
            None => {
                let available_permits = model.semaphore.available_permits();
                tracing::error!(
                    available_permits,
                    in_use = model.in_use(),
                    "Bug: permit granted but no palantir is available"
                );
                Err(PoolError::Inconsistent { available_permits })
            }
        }
    }

    /// Like [`acquire`](Self::acquire), returning a lease that releases on drop.
    pub fn acquire_lease(&self) -> Result<PalantirLease<'_>, PoolError> {
        let palantir = self.acquire()?;
        Ok(PalantirLease {
            manager: self,
            palantir,
            detached: false,
        })
    }

    /// Return a palantir to the pool.
    ///
    /// `None`, already-available and unknown palantiri are ignored; only an
    /// in-use to available transition returns a permit.
    pub fn release<'a>(&self, palantir: impl Into<Option<&'a Palantir>>) {
        let Some(palantir) = palantir.into() else {
            return;
        };
        let Ok(model) = self.model() else {
            tracing::warn!(palantir = %palantir, "Release before palantir model was built");
            return;
        };

        match model.replace(&palantir.id(), false, true) {
            Some(true) => {
                model.semaphore.release();
                tracing::debug!(palantir = %palantir, "Palantir released");
            }
            Some(false) => {
                tracing::debug!(palantir = %palantir, "Ignoring release of available palantir");
            }
            None => {
                tracing::warn!(
                    palantir = %palantir,
                    id = %palantir.id(),
                    "Attempted to release unknown palantir"
                );
            }
        }
    }

    /// Snapshot of the model's palantiri, in build order.
    pub fn palantiri(&self) -> Vec<Palantir> {
        self.model()
            .map(|m| m.palantiri.clone())
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.model().map(|m| m.palantiri.len()).unwrap_or(0)
    }

    pub fn available_permits(&self) -> usize {
        self.model()
            .map(|m| m.semaphore.available_permits())
            .unwrap_or(0)
    }

    /// Number of palantiri currently checked out.
    pub fn in_use(&self) -> usize {
        self.model().map(|m| m.in_use()).unwrap_or(0)
    }

    /// Number of callers blocked in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.model()
            .map(|m| m.semaphore.queued_waiters())
            .unwrap_or(0)
    }

    /// True while any palantir is checked out.
    pub fn is_running(&self) -> bool {
        self.in_use() > 0
    }
}

impl std::fmt::Debug for PalantirManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PalantirManager")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A checked-out palantir that returns to the pool on drop.
#[must_use = "dropping the lease releases the palantir immediately"]
pub struct PalantirLease<'a> {
    manager: &'a PalantirManager,
    palantir: Palantir,
    detached: bool,
}

impl PalantirLease<'_> {
    /// Detach the palantir; the caller becomes responsible for releasing it.
    pub fn into_inner(mut self) -> Palantir {
        self.detached = true;
        self.palantir.clone()
    }
}

impl Deref for PalantirLease<'_> {
    type Target = Palantir;

    fn deref(&self) -> &Palantir {
        &self.palantir
    }
}

impl Drop for PalantirLease<'_> {
    fn drop(&mut self) {
        if !self.detached {
            self.manager.release(&self.palantir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::interrupt;

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn built(kind: SemaphoreKind, count: usize) -> PalantirManager {
        let manager = PalantirManager::new(kind);
        manager.build_model(count).unwrap();
        manager
    }

    #[test]
    fn acquire_before_build_fails() {
        let manager = PalantirManager::new(SemaphoreKind::Condition);
        assert_eq!(manager.acquire().unwrap_err(), PoolError::NotBuilt);
        assert_eq!(manager.capacity(), 0);
    }

    #[test]
    fn acquires_distinct_palantiri() {
        for kind in SemaphoreKind::ALL {
            let manager = built(kind, 3);
            let held: HashSet<Palantir> = (0..3).map(|_| manager.acquire().unwrap()).collect();

            assert_eq!(held.len(), 3);
            assert_eq!(manager.in_use(), 3);
            assert_eq!(manager.available_permits(), 0);
            assert!(manager.is_running());
        }
    }

    #[test]
    fn release_returns_permit_once() {
        for kind in SemaphoreKind::ALL {
            let manager = built(kind, 2);
            let palantir = manager.acquire().unwrap();
            assert_eq!(manager.available_permits(), 1);

            manager.release(&palantir);
            manager.release(&palantir);
            assert_eq!(manager.available_permits(), 2);
            assert_eq!(manager.in_use(), 0);
        }
    }

    #[test]
    fn release_of_none_or_unknown_is_ignored() {
        let manager = built(SemaphoreKind::Condition, 2);
        manager.release(None);
        manager.release(&Palantir::new("Stranger"));
        assert_eq!(manager.available_permits(), 2);
    }

    #[test]
    fn build_model_uses_factory() {
        let manager = PalantirManager::new(SemaphoreKind::Monitor);
        let names = ["Orthanc", "Minas Tirith", "Osgiliath"];
        manager
            .build_model_with(names.len(), |i| Palantir::new(names[i]))
            .unwrap();

        let built: Vec<String> = manager
            .palantiri()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(built, names);
        assert_eq!(manager.capacity(), 3);
    }

    #[test]
    fn build_model_names_palantiri() {
        let manager = built(SemaphoreKind::Condition, 2);
        let names: Vec<String> = manager.palantiri().iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["Palantir-1", "Palantir-2"]);
    }

    #[test]
    fn duplicate_identities_are_rejected() {
        let manager = PalantirManager::new(SemaphoreKind::Condition);
        let id = PalantirId::new();
        let err = manager
            .build_model_with(2, |_| Palantir::with_id(id, "Twin"))
            .unwrap_err();
        assert_eq!(err, PoolError::DuplicatePalantir);
        assert_eq!(manager.acquire().unwrap_err(), PoolError::NotBuilt);
    }

    #[test]
    fn rebuild_while_in_use_fails() {
        let manager = built(SemaphoreKind::Condition, 2);
        let palantir = manager.acquire().unwrap();

        assert_eq!(
            manager.build_model(4).unwrap_err(),
            PoolError::Busy {
                in_use: 1,
                waiting: 0
            }
        );
        assert_eq!(manager.capacity(), 2);

        manager.release(&palantir);
        manager.build_model(4).unwrap();
        assert_eq!(manager.capacity(), 4);
        assert_eq!(manager.available_permits(), 4);

        // Handles of the discarded model are unknown to the new one.
        manager.release(&palantir);
        assert_eq!(manager.available_permits(), 4);
    }

    #[test]
    fn rebuild_refuses_handed_off_permit() {
        for kind in SemaphoreKind::ALL {
            let manager = Arc::new(built(kind, 1));
            let held = manager.acquire().unwrap();

            let worker_manager = Arc::clone(&manager);
            let worker = thread::spawn(move || worker_manager.acquire());
            wait_until("acquire to block", || manager.waiting() == 1);

            // The palantir is marked available again, but its permit already
            // belongs to the blocked caller.
            manager.release(&held);
            assert_eq!(
                manager.build_model(2).unwrap_err(),
                PoolError::Busy {
                    in_use: 1,
                    waiting: 0
                },
                "{kind}"
            );

            let received = worker.join().unwrap().unwrap();
            assert_eq!(received, held);
            assert_eq!(manager.in_use(), 1);

            manager.release(&received);
            assert_eq!(manager.in_use(), 0);
            assert_eq!(manager.available_permits(), 1);
            manager.build_model(2).unwrap();
            assert_eq!(manager.capacity(), 2);
        }
    }

    #[test]
    fn rebuild_refuses_blocked_callers() {
        for kind in SemaphoreKind::ALL {
            let manager = Arc::new(built(kind, 0));

            let (tx, rx) = mpsc::channel();
            let worker_manager = Arc::clone(&manager);
            let worker = thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                worker_manager.acquire()
            });
            let handle = rx.recv().unwrap();
            wait_until("acquire to block", || manager.waiting() == 1);

            assert_eq!(
                manager.build_model(1).unwrap_err(),
                PoolError::Busy {
                    in_use: 0,
                    waiting: 1
                }
            );

            handle.interrupt();
            assert!(worker.join().unwrap().unwrap_err().is_interrupted());
            manager.build_model(1).unwrap();
            assert_eq!(manager.capacity(), 1);
        }
    }

    #[test]
    fn lease_releases_on_drop() {
        let manager = built(SemaphoreKind::Monitor, 1);
        {
            let lease = manager.acquire_lease().unwrap();
            assert_eq!(lease.name(), "Palantir-1");
            assert_eq!(manager.in_use(), 1);
        }
        assert_eq!(manager.in_use(), 0);
        assert_eq!(manager.available_permits(), 1);
    }

    #[test]
    fn detached_lease_stays_checked_out() {
        let manager = built(SemaphoreKind::Condition, 1);
        let palantir = manager.acquire_lease().unwrap().into_inner();
        assert_eq!(manager.in_use(), 1);

        manager.release(&palantir);
        assert_eq!(manager.in_use(), 0);
    }

    #[test]
    fn blocked_acquire_receives_released_palantir() {
        for kind in SemaphoreKind::ALL {
            let manager = Arc::new(built(kind, 1));
            let held = manager.acquire().unwrap();

            let worker_manager = Arc::clone(&manager);
            let worker = thread::spawn(move || worker_manager.acquire());
            wait_until("acquire to block", || manager.waiting() == 1);

            manager.release(&held);
            assert_eq!(worker.join().unwrap().unwrap(), held);
            assert_eq!(manager.in_use(), 1);
            assert_eq!(manager.available_permits(), 0);
        }
    }

    #[test]
    fn interrupted_acquire_maps_to_pool_error() {
        for kind in SemaphoreKind::ALL {
            let manager = Arc::new(built(kind, 1));
            let held = manager.acquire().unwrap();

            let (tx, rx) = mpsc::channel();
            let worker_manager = Arc::clone(&manager);
            let worker = thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                worker_manager.acquire()
            });
            let handle = rx.recv().unwrap();
            wait_until("acquire to block", || manager.waiting() == 1);

            handle.interrupt();
            let err = worker.join().unwrap().unwrap_err();
            assert!(err.is_interrupted());
            assert!(!err.is_fatal());

            manager.release(&held);
            assert_eq!(manager.available_permits(), 1);
            assert_eq!(manager.in_use(), 0);
        }
    }

    #[test]
    fn permit_without_palantir_is_fatal() {
        let manager = PalantirManager::new(SemaphoreKind::Condition);
        // One palantir behind two permits breaks the permit/availability parity.
        manager
            .rebuild(
                vec![Palantir::new("Lonely")],
                SemaphoreKind::Condition.build(2),
            )
            .unwrap();

        manager.acquire().unwrap();
        let err = manager.acquire().unwrap_err();
        assert!(err.is_fatal());
        assert!(!err.is_interrupted());
        assert_eq!(err, PoolError::Inconsistent { available_permits: 0 });
    }

    #[test]
    fn from_config_builds_model() {
        let config = PoolConfig::default()
            .with_palantiri(3)
            .with_semaphore(SemaphoreKind::Monitor);
        let manager = PalantirManager::from_config(&config).unwrap();

        assert_eq!(manager.kind(), SemaphoreKind::Monitor);
        assert_eq!(manager.capacity(), 3);
        assert_eq!(manager.available_permits(), 3);
    }

    #[test]
    fn model_errors_surface_through_config_error() {
        let err = ConfigError::from(PoolError::DuplicatePalantir);
        assert_eq!(
            err.to_string(),
            "failed to build palantir model: palantir factory produced duplicate identities"
        );
    }

    #[test]
    fn from_config_rejects_empty_pool() {
        let config = PoolConfig::default().with_palantiri(0);
        assert!(matches!(
            PalantirManager::from_config(&config),
            Err(ConfigError::NoPalantiri)
        ));
    }
}
