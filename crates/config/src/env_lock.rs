//! A single process-wide lock serializing any code path that reads or
//! mutates `std::env` (e.g. SOPS-decrypt-style helpers that stage
//! credentials into the environment around a subprocess call). Spec.md §5:
//! the lock must be taken unconditionally, even when the caller believes
//! it has nothing to set — a variant that only locks when there is
//! something to inject still races against a concurrent reader.

use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

/// Guard held while the process environment is being inspected or
/// mutated. Dropping it releases the lock.
pub struct EnvLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Acquires the process-env lock, unconditionally. Call this before any
/// `std::env::set_var` / `std::env::remove_var` / bulk `std::env::vars()`
/// read that must not interleave with another such section.
pub fn acquire() -> EnvLockGuard<'static> {
    let guard = lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    EnvLockGuard { _guard: guard }
}
