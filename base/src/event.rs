// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;
use std::ptr;
use std::time::Duration;

use libc::c_void;

use crate::errno_result;
use crate::AsRawDescriptor;
use crate::FromRawDescriptor;
use crate::RawDescriptor;
use crate::Result;
use crate::SafeDescriptor;

/// Outcome of `Event::wait_timeout`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventWaitResult {
    /// The event was signaled; its counter held the contained value and has been reset.
    Signaled(u64),
    TimedOut,
}

/// A wrapper around a Linux eventfd (man 2 eventfd).
///
/// The counter can be polled like any other descriptor, which makes it the readiness source of
/// every in-process queue that the completion loop waits on.
#[derive(Debug, PartialEq, Eq)]
pub struct Event {
    event_handle: SafeDescriptor,
}

impl Event {
    /// Creates a new blocking eventfd with an initial value of 0.
    pub fn new() -> Result<Event> {
        // SAFETY: eventfd only allocates a descriptor; the result is checked.
        let ret = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if ret < 0 {
            return errno_result();
        }
        Ok(Event {
            // SAFETY: the kernel gave us a descriptor that we now own.
            event_handle: unsafe { SafeDescriptor::from_raw_descriptor(ret) },
        })
    }

    /// Increments the counter by one.
    pub fn signal(&self) -> Result<()> {
        self.write_count(1)
    }

    /// Blocks until the counter is non-zero, then resets it to zero.
    pub fn wait(&self) -> Result<()> {
        self.read_count().map(|_| ())
    }

    /// Adds `v` to the counter, blocking until this won't overflow.
    pub fn write_count(&self, v: u64) -> Result<()> {
        // SAFETY: we own the descriptor and pass the exact size of `v`.
        let ret = unsafe {
            libc::write(
                self.as_raw_descriptor(),
                &v as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret <= 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Blocks until the counter is non-zero, then returns it and resets it to zero.
    pub fn read_count(&self) -> Result<u64> {
        let mut buf: u64 = 0;
        // SAFETY: we own the descriptor and pass the exact size of `buf`.
        let ret = handle_eintr_errno!(unsafe {
            libc::read(
                self.as_raw_descriptor(),
                &mut buf as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            )
        });
        if ret <= 0 {
            return errno_result();
        }
        Ok(buf)
    }

    /// Like `read_count`, but gives up after `timeout`. A zero timeout polls the counter.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<EventWaitResult> {
        let mut pfd = libc::pollfd {
            fd: self.as_raw_descriptor(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeoutspec = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // SAFETY: only `pfd` is modified and the return value is checked.
        let ret = handle_eintr_errno!(unsafe {
            libc::ppoll(&mut pfd, 1, &timeoutspec, ptr::null_mut())
        });
        if ret < 0 {
            return errno_result();
        }
        if pfd.revents == 0 {
            return Ok(EventWaitResult::TimedOut);
        }
        self.read_count().map(EventWaitResult::Signaled)
    }

    /// Clones this eventfd. Both handles share the same counter.
    pub fn try_clone(&self) -> Result<Event> {
        self.event_handle
            .try_clone()
            .map(|event_handle| Event { event_handle })
    }
}

impl AsRawDescriptor for Event {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.event_handle.as_raw_descriptor()
    }
}
