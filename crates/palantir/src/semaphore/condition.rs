//! Condition-variable semaphore: each waiter parks on its own condvar.

use std::sync::{Condvar, Mutex, PoisonError};

use super::FairSemaphore;
use super::queue::{FairQueue, Waiter};
use crate::interrupt::{self, Interrupted, Wake};
use crate::sync::lock;

pub(crate) struct CondvarWaiter {
    released: Mutex<bool>,
    condition: Condvar,
}

impl Waiter for CondvarWaiter {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            condition: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut released = lock(&self.released);
        *released = true;
        self.condition.notify_one();
    }

    fn wait(&self) -> Result<(), Interrupted> {
        let mut released = lock(&self.released);
        loop {
            if *released {
                return Ok(());
            }
            interrupt::check()?;
            released = self
                .condition
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Wake for CondvarWaiter {
    fn wake(&self) {
        // Taken so the notify cannot fall between the waiter's flag check
        // and its wait.
        let _released = lock(&self.released);
        self.condition.notify_one();
    }
}

/// Fair semaphore whose blocked callers wait on private condition variables.
#[derive(Debug)]
pub struct ConditionSemaphore {
    queue: FairQueue<CondvarWaiter>,
}

impl ConditionSemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            queue: FairQueue::new(permits),
        }
    }
}

impl FairSemaphore for ConditionSemaphore {
    fn acquire(&self) -> Result<(), Interrupted> {
        self.queue.acquire()
    }

    fn try_acquire(&self) -> bool {
        self.queue.try_acquire()
    }

    fn release(&self) {
        self.queue.release();
    }

    fn available_permits(&self) -> usize {
        self.queue.available_permits()
    }

    fn queued_waiters(&self) -> usize {
        self.queue.queued_waiters()
    }
}
