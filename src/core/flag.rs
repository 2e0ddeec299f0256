//! One-shot wakeup flag shared between a worker thread and its callers.
//!
//! `set` is idempotent; `wait` blocks until set and clears on the way out.
//! Each flag is bound to one clock domain so `wait_until` deadlines mean
//! the same thing to the sleeper and the setter.

use crate::core::clock::Clocks;
use std::sync::{Arc, Condvar, Mutex};

pub struct Flag {
    clocks: Arc<dyn Clocks>,
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Flag {
    pub fn new(clocks: Arc<dyn Clocks>) -> Self {
        Self {
            clocks,
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Raises the flag, waking any waiter. No-op if already raised.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !*state {
            *state = true;
            self.condvar.notify_all();
        }
    }

    /// Peeks at the flag without clearing it.
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the flag is set, then clears it.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while !*state {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        *state = false;
    }

    /// Blocks until the flag is set (true, clearing it) or until `deadline`
    /// on the flag's monotonic clock passes (false).
    pub fn wait_until(&self, deadline: f64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *state {
                *state = false;
                return true;
            }
            if self.clocks.monotonic() >= deadline {
                return false;
            }
            state = self.clocks.wait_deadline(&self.condvar, state, deadline);
        }
    }
}
