// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fmt::Debug;
use std::sync::Mutex as StdMutex;

pub use std::sync::MutexGuard;

static MUTEX_POISONED: &str = "mutex is poisoned";

/// A mutual exclusion primitive that panics on poison.
#[derive(Default)]
pub struct Mutex<T: ?Sized> {
    std: StdMutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new unlocked mutex holding `value`.
    pub const fn new(value: T) -> Mutex<T> {
        Mutex {
            std: StdMutex::new(value),
        }
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.std.into_inner().expect(MUTEX_POISONED)
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking the current thread until it is available.
    pub fn lock(&self) -> MutexGuard<T> {
        self.std.lock().expect(MUTEX_POISONED)
    }

    /// Returns a mutable reference to the protected value. No locking is needed since the
    /// borrow checker guarantees exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.std.get_mut().expect(MUTEX_POISONED)
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Mutex::new(value)
    }
}

impl<T: ?Sized + Debug> Debug for Mutex<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.std, formatter)
    }
}
