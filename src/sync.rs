//! A [`Mutex`] that ignores lock poisoning.
//!
//! Every thread this crate spawns forwards its panic to whoever joins it. Poisoning would only add
//! knock-on panics in the *other* threads touching the same lock, and those can race the root cause
//! to the owner. The guard is therefore handed out whether or not a previous holder panicked.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync,
};

#[derive(Default)]
pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.inner.try_lock() {
            Ok(val) => s.field("data", &&*val),
            Err(sync::TryLockError::Poisoned(poison)) => s.field("data", &&**poison.get_ref()),
            Err(sync::TryLockError::WouldBlock) => s.field("data", &"<locked>"),
        }
        .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use crate::test::silent_panic;

    use super::*;

    #[test]
    fn lock_survives_panicking_holder() {
        let mutex = Mutex::new(vec![1]);
        catch_unwind(AssertUnwindSafe(|| {
            let mut guard = mutex.lock();
            guard.push(2);
            silent_panic("holder panic".into());
        }))
        .unwrap_err();

        assert_eq!(*mutex.lock(), [1, 2]);
    }
}
