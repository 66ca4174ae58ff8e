use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{LockResult, TryLockError, TryLockResult};

use crate::environment::{Environment, Park};
use crate::poison;
use crate::raw_mcs_lock::{Handle, RawMcsLock};

/// A mutual exclusion primitive protecting a `T`, granted to waiters in the
/// order they arrived.
///
/// Like [`std::sync::Mutex`], the lock is poisoned when a holder panics and
/// later acquisitions report it through [`LockResult`].
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use mcs_locks::McsLock;
///
/// let lock = Arc::new(McsLock::new(0));
/// let threads: Vec<_> = (0..4)
///     .map(|_| {
///         let lock = lock.clone();
///         thread::spawn(move || *lock.lock().unwrap() += 1)
///     })
///     .collect();
/// for t in threads {
///     t.join().unwrap();
/// }
/// assert_eq!(*lock.lock().unwrap(), 4);
/// ```
pub struct McsLock<T, E: Environment = Park> {
    raw: RawMcsLock<E>,
    poison: poison::Flag,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send, E: Environment> Send for McsLock<T, E> where RawMcsLock<E>: Send {}

unsafe impl<T: Send, E: Environment> Sync for McsLock<T, E> where RawMcsLock<E>: Sync {}

impl<T> McsLock<T, Park> {
    pub const fn new(value: T) -> Self {
        McsLock::with_environment(value, Park)
    }
}

impl<T, E: Environment> McsLock<T, E> {
    pub const fn with_environment(value: T, env: E) -> Self {
        McsLock {
            raw: RawMcsLock::with_environment(env),
            poison: poison::Flag::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> LockResult<McsLockGuard<'_, T, E>> {
        let handle = self.raw.acquire();
        McsLockGuard::new(self, handle)
    }

    pub fn try_lock(&self) -> TryLockResult<McsLockGuard<'_, T, E>> {
        match self.raw.try_acquire() {
            Some(handle) => Ok(McsLockGuard::new(self, handle)?),
            None => Err(TryLockError::WouldBlock),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison.get()
    }

    pub fn into_inner(self) -> LockResult<T> {
        let McsLock { poison, data, .. } = self;
        poison::map_result(poison.guard(), |_| data.into_inner())
    }

    pub fn get_mut(&mut self) -> LockResult<&mut T> {
        let data = self.data.get_mut();
        poison::map_result(self.poison.guard(), |_| data)
    }
}

impl<T: Default> Default for McsLock<T, Park> {
    fn default() -> Self {
        McsLock::new(T::default())
    }
}

impl<T> From<T> for McsLock<T, Park> {
    fn from(value: T) -> Self {
        McsLock::new(value)
    }
}

impl<T: fmt::Debug, E: Environment> fmt::Debug for McsLock<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("McsLock");
        match self.try_lock() {
            Ok(guard) => d.field("data", &&*guard),
            Err(TryLockError::Poisoned(err)) => d.field("data", &&**err.get_ref()),
            Err(TryLockError::WouldBlock) => d.field("data", &format_args!("<locked>")),
        };
        d.field("poisoned", &self.poison.get()).finish()
    }
}

#[must_use = "if unused the McsLock will immediately unlock"]
pub struct McsLockGuard<'a, T, E: Environment = Park> {
    lock: &'a McsLock<T, E>,
    handle: Option<Handle<'a, E>>,
    poison: poison::Guard,
}

unsafe impl<T: Sync, E: Environment> Sync for McsLockGuard<'_, T, E> {}

impl<'a, T, E: Environment> McsLockGuard<'a, T, E> {
    fn new(lock: &'a McsLock<T, E>, handle: Handle<'a, E>) -> LockResult<McsLockGuard<'a, T, E>> {
        poison::map_result(lock.poison.guard(), |poison| McsLockGuard {
            lock,
            handle: Some(handle),
            poison,
        })
    }
}

impl<T, E: Environment> Deref for McsLockGuard<'_, T, E> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, E: Environment> DerefMut for McsLockGuard<'_, T, E> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, E: Environment> Drop for McsLockGuard<'_, T, E> {
    fn drop(&mut self) {
        self.lock.poison.done(&self.poison);
        if let Some(handle) = self.handle.take() {
            self.lock.raw.release(handle);
        }
    }
}

impl<T: fmt::Debug, E: Environment> fmt::Debug for McsLockGuard<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
