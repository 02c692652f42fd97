//! FIFO hand-off core shared by both semaphore variants.
//!
//! The pool lock guards the permit count and the wait queue. A blocked
//! caller parks on its own waiter, never on the pool lock, and a releaser
//! touches a waiter only after dropping the pool lock, so no thread ever
//! holds the pool lock and a waiter lock together.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::interrupt::{self, Interrupted, Wake};
use crate::sync::lock;

/// One-shot parking handle for a single blocked acquire.
pub(crate) trait Waiter: Wake + 'static {
    /// Created on the thread that will wait on it.
    fn new() -> Self;

    /// Mark the waiter released and wake its thread.
    fn signal(&self);

    /// Park until released. Fails if the thread is interrupted first;
    /// a waiter that is both released and interrupted reports released.
    fn wait(&self) -> Result<(), Interrupted>;
}

struct QueueState<W> {
    permits: usize,
    waiters: VecDeque<Arc<W>>,
}

pub(crate) struct FairQueue<W> {
    state: Mutex<QueueState<W>>,
}

impl<W: Waiter> FairQueue<W> {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub(crate) fn acquire(&self) -> Result<(), Interrupted> {
        interrupt::check()?;

        let waiter = {
            let mut state = lock(&self.state);
            if Self::try_to_get_permit_unlocked(&mut state) {
                return Ok(());
            }
            // Enqueued under the pool lock, before the caller starts waiting,
            // so a concurrent release always finds it.
            let waiter = Arc::new(W::new());
            state.waiters.push_back(Arc::clone(&waiter));
            tracing::trace!(queued = state.waiters.len(), "Waiting for permit");
            waiter
        };

        self.wait_for_permit(waiter)
    }

    pub(crate) fn try_acquire(&self) -> bool {
        Self::try_to_get_permit_unlocked(&mut lock(&self.state))
    }

    /// Fast path. Never taken while anyone is queued.
    fn try_to_get_permit_unlocked(state: &mut QueueState<W>) -> bool {
        if state.waiters.is_empty() && state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    fn wait_for_permit(&self, waiter: Arc<W>) -> Result<(), Interrupted> {
        let _registration = interrupt::register(Arc::clone(&waiter) as Arc<dyn Wake>);

        match waiter.wait() {
            Ok(()) => Ok(()),
            Err(Interrupted) => {
                let removed = {
                    let mut state = lock(&self.state);
                    let position = state.waiters.iter().position(|w| Arc::ptr_eq(w, &waiter));
                    position.and_then(|i| state.waiters.remove(i)).is_some()
                };

                if !removed {
                    // A release already dequeued us and handed over its permit.
                    tracing::debug!("Interrupted after hand-off - returning permit");
                    self.release();
                }
                Err(Interrupted)
            }
        }
    }

    pub(crate) fn release(&self) {
        let head = {
            let mut state = lock(&self.state);
            state.permits += 1;
            let head = state.waiters.pop_front();
            if head.is_some() {
                // Consumed on the head waiter's behalf: no fast-path caller
                // can take a permit that has already been handed off.
                state.permits -= 1;
                tracing::trace!(queued = state.waiters.len(), "Handing permit to head waiter");
            }
            head
        };

        if let Some(waiter) = head {
            waiter.signal();
        }
    }

    pub(crate) fn available_permits(&self) -> usize {
        lock(&self.state).permits
    }

    pub(crate) fn queued_waiters(&self) -> usize {
        lock(&self.state).waiters.len()
    }
}

impl<W> fmt::Debug for FairQueue<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FairQueue")
            .field("permits", &state.permits)
            .field("queued", &state.waiters.len())
            .finish()
    }
}
