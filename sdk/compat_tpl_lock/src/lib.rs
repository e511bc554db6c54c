//! UEFI Task Priority Level (TPL) Locking support
//!
//! [`TplLock`] is a priority-ceiling lock: acquiring it raises the TPL to the lock's ceiling and releasing it restores
//! the TPL that was current at acquisition. It never waits. Under the firmware's single-threaded, cooperative event
//! model this is enough to keep callbacks at or below the ceiling out of the protected region, but it is not a
//! general purpose mutex.
//!
//! [`TplMutex`] wraps a value behind a [`TplLock`].
//!
//! ```rust ignore
//! static TABLE_LOCK: TplLock = TplLock::new(efi::TPL_NOTIFY, "fvb_table");
//!
//! let guard = TABLE_LOCK.lock(&boot_services)?;
//! // ... TPL is now TPL_NOTIFY ...
//! drop(guard);
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use compat_sdk::{
    boot_services::BootServices,
    debug,
    error::{EfiError, Result},
};
use r_efi::efi;

/// A non-blocking lock that holds the TPL at a fixed ceiling while held.
pub struct TplLock {
    tpl: efi::Tpl,
    owner_tpl: AtomicUsize,
    held: AtomicBool,
    name: &'static str,
}

impl TplLock {
    /// Creates a released lock with the given TPL ceiling.
    pub const fn new(tpl: efi::Tpl, name: &'static str) -> Self {
        Self { tpl, owner_tpl: AtomicUsize::new(0), held: AtomicBool::new(false), name }
    }

    /// The TPL ceiling the lock raises to.
    pub fn tpl(&self) -> efi::Tpl {
        self.tpl
    }

    /// The TPL recorded at the last successful acquisition.
    pub fn owner_tpl(&self) -> efi::Tpl {
        self.owner_tpl.load(Ordering::Acquire)
    }

    /// True while the lock is acquired.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// The name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, or fails with [`EfiError::AccessDenied`] if it is already held.
    ///
    /// On failure the TPL and the lock state are left untouched.
    pub fn try_acquire<B: BootServices + ?Sized>(&self, boot_services: &B) -> Result<()> {
        if self.held.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
            return Err(EfiError::AccessDenied);
        }
        let owner_tpl = boot_services.raise_tpl(self.tpl);
        self.owner_tpl.store(owner_tpl, Ordering::Release);
        Ok(())
    }

    /// Acquires the lock. Acquiring a held lock is a caller bug and is reported as an assertion failure.
    pub fn acquire<B: BootServices + ?Sized>(&self, boot_services: &B) {
        if self.try_acquire(boot_services).is_err() {
            debug::report_assert(file!(), line!(), "Re-entrant acquisition of a TPL lock.");
            log::error!("TPL lock {:?} acquired while held.", self.name);
        }
    }

    /// Releases the lock and restores the TPL recorded at acquisition.
    ///
    /// ## Panics
    ///
    /// Panics if the lock is not held.
    pub fn release<B: BootServices + ?Sized>(&self, boot_services: &B) {
        let owner_tpl = self.owner_tpl.load(Ordering::Acquire);
        if self.held.compare_exchange(true, false, Ordering::Release, Ordering::Relaxed).is_err() {
            panic!("Release of TPL lock {:?} that is not held.", self.name);
        }
        boot_services.restore_tpl(owner_tpl);
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn lock<'a, B: BootServices + ?Sized>(&'a self, boot_services: &'a B) -> Result<TplLockGuard<'a, B>> {
        self.try_acquire(boot_services)?;
        Ok(TplLockGuard { lock: self, boot_services })
    }
}

impl fmt::Debug for TplLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TplLock")
            .field("name", &self.name)
            .field("tpl", &self.tpl)
            .field("held", &self.is_held())
            .field("owner_tpl", &self.owner_tpl())
            .finish()
    }
}

/// Releases a [`TplLock`] when dropped.
pub struct TplLockGuard<'a, B: BootServices + ?Sized> {
    lock: &'a TplLock,
    boot_services: &'a B,
}

impl<B: BootServices + ?Sized> Drop for TplLockGuard<'_, B> {
    fn drop(&mut self) {
        self.lock.release(self.boot_services);
    }
}

impl<B: BootServices + ?Sized> fmt::Debug for TplLockGuard<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TplLockGuard").field("lock", &self.lock.name).finish()
    }
}

/// Used to guard data with a [`TplLock`].
pub struct TplMutex<T: ?Sized> {
    lock: TplLock,
    data: UnsafeCell<T>,
}

/// Wrapper for guarded data, which can be accessed by Deref or DerefMut on this object.
pub struct TplGuard<'a, T: ?Sized, B: BootServices + ?Sized> {
    _lock: TplLockGuard<'a, B>,
    data: &'a mut T,
}

unsafe impl<T: ?Sized + Send> Sync for TplMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for TplMutex<T> {}

impl<T> TplMutex<T> {
    /// Instantiates a new TplMutex with the given TPL level, data object, and name string.
    pub const fn new(tpl: efi::Tpl, data: T, name: &'static str) -> Self {
        Self { lock: TplLock::new(tpl, name), data: UnsafeCell::new(data) }
    }

    /// Consumes the mutex and returns the guarded value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TplMutex<T> {
    /// Locks the mutex, raising the TPL to the mutex ceiling until the guard is dropped.
    ///
    /// ## Panics
    ///
    /// Re-entrant locking is not supported and panics.
    pub fn lock<'a, B: BootServices + ?Sized>(&'a self, boot_services: &'a B) -> TplGuard<'a, T, B> {
        self.try_lock(boot_services).unwrap_or_else(|| panic!("Re-entrant locks for {:?} not permitted.", self.lock.name))
    }

    /// Attempts to lock the mutex without side effects on failure.
    pub fn try_lock<'a, B: BootServices + ?Sized>(&'a self, boot_services: &'a B) -> Option<TplGuard<'a, T, B>> {
        let guard = self.lock.lock(boot_services).ok()?;
        // SAFETY: the lock is held for the lifetime of the returned guard, so this is the only live reference.
        Some(TplGuard { _lock: guard, data: unsafe { &mut *self.data.get() } })
    }

    /// True while a guard is alive.
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Returns the data through an exclusive borrow without touching the TPL.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> fmt::Debug for TplMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_locked() {
            write!(f, "TplMutex {{ name: {:?}, <locked> }}", self.lock.name)
        } else {
            write!(f, "TplMutex {{ name: {:?}, tpl: {} }}", self.lock.name, self.lock.tpl)
        }
    }
}

impl<T: ?Sized, B: BootServices + ?Sized> Deref for TplGuard<'_, T, B> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<T: ?Sized, B: BootServices + ?Sized> DerefMut for TplGuard<'_, T, B> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<T: ?Sized + fmt::Debug, B: BootServices + ?Sized> fmt::Debug for TplGuard<'_, T, B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display, B: BootServices + ?Sized> fmt::Display for TplGuard<'_, T, B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
