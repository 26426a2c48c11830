#![forbid(unsafe_code)]

pub mod acquirer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod face_model;
pub mod host;
pub mod reporter;
pub mod sampler;
pub mod session;
pub mod violation_log;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Session state stays usable after a panicking holder; every critical
/// section leaves it consistent before any fallible call.
pub(crate) fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
