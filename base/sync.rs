// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Thin wrappers around `std::sync::{Mutex, Condvar}` that treat poisoning
//! as impossible: a panic while holding the lock already took down the
//! process (or is about to, via the panic hook in [`crate::tracing_setup`]),
//! so there is no reader left to observe a torn invariant. Everything here
//! just unwraps the poison instead of threading `Result` through call sites
//! that can't do anything useful with it anyway.

use std::sync::{self, MutexGuard};
use std::time::Duration;

#[derive(Default)]
pub struct Mutex<T>(sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Mutex(sync::Mutex::new(t))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(sync::PoisonError::into_inner)
    }
}

#[derive(Default)]
pub struct Condvar(sync::Condvar);

impl Condvar {
    pub fn new() -> Self {
        Condvar(sync::Condvar::new())
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    /// Like `std::sync::Condvar::wait_timeout_while`, but unwraps poison.
    pub fn wait_timeout_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
        cond: F,
    ) -> (MutexGuard<'a, T>, sync::WaitTimeoutResult)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.0
            .wait_timeout_while(guard, dur, cond)
            .unwrap_or_else(sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_roundtrip() {
        let m = Mutex::new(5);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 6);
    }
}
