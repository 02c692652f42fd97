//! Monitor semaphore: each waiter is a mutex-guarded flag, and the waiting
//! thread blocks on its own park token instead of a condition variable.

use std::sync::Mutex;
use std::thread::{self, Thread};

use super::FairSemaphore;
use super::queue::{FairQueue, Waiter};
use crate::interrupt::{self, Interrupted, Wake};
use crate::sync::lock;

pub(crate) struct ParkWaiter {
    released: Mutex<bool>,
    thread: Thread,
}

impl Waiter for ParkWaiter {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            thread: thread::current(),
        }
    }

    fn signal(&self) {
        *lock(&self.released) = true;
        // An unpark before the park leaves the token set; park returns at once.
        self.thread.unpark();
    }

    fn wait(&self) -> Result<(), Interrupted> {
        loop {
            if *lock(&self.released) {
                return Ok(());
            }
            interrupt::check()?;
            thread::park();
        }
    }
}

impl Wake for ParkWaiter {
    fn wake(&self) {
        self.thread.unpark();
    }
}

/// Fair semaphore whose blocked callers park on their own monitor.
#[derive(Debug)]
pub struct MonitorSemaphore {
    queue: FairQueue<ParkWaiter>,
}

impl MonitorSemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            queue: FairQueue::new(permits),
        }
    }
}

impl FairSemaphore for MonitorSemaphore {
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
