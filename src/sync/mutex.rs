//! Non-recursive mutex for green threads.

use crate::errors::{MutexError, ThreadResult};
use crate::platform_timer::PreemptGuard;
use crate::runtime::current_runtime;
use crate::thread::{Thread, ThreadId};
use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};
use std::fmt;

/// Mutex state: held flag and owner.
///
/// Contention is resolved by polling: a thread that finds the lock held
/// yields and retries when it runs again. Acquisition order among waiters is
/// therefore not FIFO. The check-and-set runs with preemption blocked.
///
/// A mutex belongs to the runtime of the OS thread it is used on; it is
/// `!Sync` and shared between green threads through `Rc`.
#[derive(Default)]
pub struct RawMutex {
    held: Cell<bool>,
    owner: Cell<Option<ThreadId>>,
}

impl RawMutex {
    /// An unlocked mutex with no owner.
    pub const fn new() -> Self {
        Self {
            held: Cell::new(false),
            owner: Cell::new(None),
        }
    }

    /// Acquire the mutex, yielding while another thread holds it.
    ///
    /// Fails with [`MutexError::AlreadyOwned`] if the caller holds it already.
    pub fn lock(&self) -> ThreadResult<()> {
        let runtime = current_runtime()?;
        let me = runtime.current_id();

        loop {
            {
                let _guard = PreemptGuard::new();
                if !self.held.get() {
                    self.held.set(true);
                    self.owner.set(Some(me));
                    return Ok(());
                }
                if self.owner.get() == Some(me) {
                    return Err(MutexError::AlreadyOwned.into());
                }
            }
            runtime.yield_now();
        }
    }

    /// Release the mutex.
    ///
    /// Fails with [`MutexError::NotOwner`], leaving the state untouched, if
    /// the caller is not the owner.
    pub fn unlock(&self) -> ThreadResult<()> {
        let me = current_runtime()?.current_id();
        let _guard = PreemptGuard::new();
        if !self.held.get() || self.owner.get() != Some(me) {
            return Err(MutexError::NotOwner.into());
        }
        self.held.set(false);
        self.owner.set(None);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.held.get()
    }

    /// Thread currently holding the mutex.
    pub fn owner(&self) -> Option<Thread> {
        self.owner.get().map(Thread::from_id)
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex")
            .field("held", &self.held.get())
            .field("owner", &self.owner.get())
            .finish()
    }
}

/// Mutex protecting a value, released when its guard is dropped.
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the mutex, yielding while another thread holds it.
    pub fn lock(&self) -> ThreadResult<MutexGuard<'_, T>> {
        self.raw.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Proof of ownership of a [`Mutex`].
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while this thread owns the mutex.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        let released = self.mutex.raw.unlock();
        debug_assert!(released.is_ok(), "mutex guard dropped by a thread that does not own it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ThreadError;
    use crate::tests::helpers::run_cooperative;

    #[test]
    fn test_lock_without_runtime() {
        let mutex = RawMutex::new();
        assert_eq!(mutex.lock(), Err(ThreadError::not_initialized()));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_lock_unlock_records_owner() {
        run_cooperative(|| {
            let mutex = RawMutex::new();
            assert_eq!(mutex.owner(), None);

            mutex.lock().unwrap();
            assert!(mutex.is_locked());
            assert_eq!(mutex.owner(), Some(crate::current().unwrap()));

            mutex.unlock().unwrap();
            assert!(!mutex.is_locked());
            assert_eq!(mutex.owner(), None);
        });
    }

    #[test]
    fn test_relock_is_an_error() {
        run_cooperative(|| {
            let mutex = RawMutex::new();
            mutex.lock().unwrap();
            assert_eq!(mutex.lock(), Err(ThreadError::from(MutexError::AlreadyOwned)));
            assert!(mutex.is_locked());
            mutex.unlock().unwrap();
        });
    }

    #[test]
    fn test_unlock_unheld_is_an_error() {
        run_cooperative(|| {
            let mutex = RawMutex::new();
            assert_eq!(mutex.unlock(), Err(ThreadError::from(MutexError::NotOwner)));
        });
    }

    #[test]
    fn test_guard_releases_on_drop() {
        run_cooperative(|| {
            let mutex = Mutex::new(Vec::new());
            {
                let mut items = mutex.lock().unwrap();
                items.push(1);
                assert!(mutex.is_locked());
            }
            assert!(!mutex.is_locked());
            mutex.lock().unwrap().push(2);
            assert_eq!(mutex.into_inner(), vec![1, 2]);
        });
    }
}
