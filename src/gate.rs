//! One-shot gate: signaled at most once, awaited with a timeout.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

enum State<T> {
    Pending,
    Ready(T),
    Taken,
    /// The waiter gave up; anything arriving now is dropped.
    Expired,
}

/// A value slot shared between one waiter and one (possibly late) writer.
pub struct OneShot<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

impl<T> OneShot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Deliver the value. Returns false (and drops `value`) if the gate was
    /// already signaled or the waiter timed out.
    pub fn set(&self, value: T) -> bool {
        let mut state = self.lock();
        if !matches!(*state, State::Pending) {
            return false;
        }
        *state = State::Ready(value);
        self.cv.notify_all();
        true
    }

    /// Block for at most `timeout` waiting for the value.
    ///
    /// Returns `None` on timeout; the gate then expires so a late `set` is
    /// discarded. The value can be taken only once.
    pub fn try_await(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut state, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |s| matches!(s, State::Pending))
            .unwrap_or_else(|p| p.into_inner());

        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(v) => Some(v),
            State::Pending => {
                *state = State::Expired;
                None
            }
            other => {
                *state = other;
                None
            }
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(*self.lock(), State::Ready(_) | State::Taken)
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}
