// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mutex and Condvar wrappers whose methods panic instead of returning a poison error.
//!
//! A panic while holding a lock already means the decoder session is lost, so callers should not
//! have to thread `PoisonError` through every bookkeeping path. Use these types wherever
//! `std::sync::Mutex`/`Condvar` would otherwise be used.

mod condvar;
mod mutex;

pub use crate::condvar::Condvar;
pub use crate::mutex::Mutex;
pub use crate::mutex::MutexGuard;
