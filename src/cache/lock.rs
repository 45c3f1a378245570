use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::domain::kind::CalculationKind;

/// Accept a poisoned guard: a panicking writer can only leave a whole entry
/// behind, and the next hash comparison decides whether it is still valid.
fn recover<G>(result: LockResult<G>, kind: CalculationKind, op: &'static str, lock: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            target = "furrow::cache::lock",
            op,
            kind = %kind,
            lock_kind = lock,
            result = "poisoned_recovered",
            "Recovered from poisoned cache store lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn read<'a, T>(
    lock: &'a RwLock<T>,
    kind: CalculationKind,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), kind, op, "rwlock.read")
}

pub(crate) fn write<'a, T>(
    lock: &'a RwLock<T>,
    kind: CalculationKind,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), kind, op, "rwlock.write")
}

pub(crate) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    kind: CalculationKind,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(mutex.lock(), kind, op, "mutex.lock")
}
