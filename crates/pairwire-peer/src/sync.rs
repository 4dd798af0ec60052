//! Lock helpers shared with the router crate.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Every structure guarded here stays consistent across a panic: each
/// critical section is a single push, pop or map update.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
