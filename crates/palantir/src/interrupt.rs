//! Thread interruption for blocking permit waits.
//!
//! Every thread owns an interrupt flag. [`InterruptHandle::interrupt`] sets
//! the flag and wakes the thread if it is parked in a semaphore wait; the
//! wait observes the flag, unwinds its queue entry and returns
//! [`Interrupted`]. Returning `Interrupted` consumes the flag.
//!
//! A wait registers its waker before it first checks the flag, and an
//! interrupter sets the flag before it looks for a registered waker, so an
//! interrupt is never lost between the two.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

use crate::sync::lock;

/// Cancellation signal: the thread was interrupted while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("thread interrupted while waiting for a permit")]
pub struct Interrupted;

/// Something parked on behalf of a thread that an interrupt must wake.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

struct InterruptState {
    thread: Thread,
    interrupted: AtomicBool,
    blocker: Mutex<Option<Arc<dyn Wake>>>,
}

thread_local! {
    static CURRENT: Arc<InterruptState> = Arc::new(InterruptState {
        thread: thread::current(),
        interrupted: AtomicBool::new(false),
        blocker: Mutex::new(None),
    });
}

/// Handle to one thread's interrupt state. Cheap to clone and send.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    /// Interrupt the thread. A pending wait is woken and fails with
    /// [`Interrupted`]; otherwise the next interruptible acquire fails at entry.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);

        // Clone out so the slot lock is not held while the waiter lock is taken.
        let blocker = lock(&self.state.blocker).clone();
        if let Some(blocker) = blocker {
            blocker.wake();
        }
        tracing::trace!(thread = ?self.state.thread.name(), "Thread interrupted");
    }

    /// Read the interrupt flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    pub fn thread(&self) -> &Thread {
        &self.state.thread
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("thread", &self.state.thread.name())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Handle to the calling thread's interrupt state.
pub fn current() -> InterruptHandle {
    InterruptHandle {
        state: CURRENT.with(Arc::clone),
    }
}

/// Test and clear the calling thread's interrupt flag.
pub fn interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.swap(false, Ordering::SeqCst))
}

/// Read the calling thread's interrupt flag without clearing it.
pub fn is_interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.load(Ordering::SeqCst))
}

/// Consume a pending interrupt as an error.
pub(crate) fn check() -> Result<(), Interrupted> {
    if interrupted() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Registration of the calling thread's current blocker; cleared on drop.
#[must_use = "the blocker is unregistered as soon as the registration is dropped"]
pub(crate) struct BlockerRegistration {
    state: Arc<InterruptState>,
}

pub(crate) fn register(blocker: Arc<dyn Wake>) -> BlockerRegistration {
    let state = CURRENT.with(Arc::clone);
    *lock(&state.blocker) = Some(blocker);
    BlockerRegistration { state }
}

impl Drop for BlockerRegistration {
    fn drop(&mut self) {
        lock(&self.state.blocker).take();
    }
}
