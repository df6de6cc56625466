// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::marker::PhantomData;
use std::ptr::null_mut;
use std::time::Duration;

use libc::epoll_event;
use libc::EPOLLHUP;
use libc::EPOLLIN;
use libc::EPOLLOUT;
use libc::EPOLLRDHUP;
use libc::EPOLL_CLOEXEC;
use libc::EPOLL_CTL_ADD;
use libc::EPOLL_CTL_DEL;
use libc::EPOLL_CTL_MOD;
use smallvec::SmallVec;

use crate::errno_result;
use crate::AsRawDescriptor;
use crate::FromRawDescriptor;
use crate::RawDescriptor;
use crate::Result;
use crate::SafeDescriptor;

const WAIT_CONTEXT_MAX_EVENTS: usize = 16;

/// Trait that can be used to associate events with arbitrary enums when using `WaitContext`.
///
/// Simple enums that have no or primitive variant data can be packed into the 64 bits of
/// epoll user data.
pub trait EventToken {
    /// Converts this token into a u64 that can be turned back into a token via `from_raw_token`.
    fn as_raw_token(&self) -> u64;

    /// Converts a raw token as returned from `as_raw_token` back into a token.
    ///
    /// It is invalid to give a raw token that was not returned via `as_raw_token` from the same
    /// `Self`. The implementation can expect that this will never happen as a result of its usage
    /// in `WaitContext`.
    fn from_raw_token(data: u64) -> Self;
}

impl EventToken for usize {
    fn as_raw_token(&self) -> u64 {
        *self as u64
    }

    fn from_raw_token(data: u64) -> Self {
        data as Self
    }
}

impl EventToken for u32 {
    fn as_raw_token(&self) -> u64 {
        u64::from(*self)
    }

    fn from_raw_token(data: u64) -> Self {
        data as Self
    }
}

/// Represents an event that has been signaled and waited for via a wait function.
#[derive(Copy, Clone, Debug)]
pub struct TriggeredEvent<T: EventToken> {
    pub token: T,
    pub is_readable: bool,
    pub is_writable: bool,
    pub is_hungup: bool,
}

/// Represents types of events to watch for.
pub enum EventType {
    /// Temporarily stops reporting a descriptor without removing it from the context.
    None,
    Read,
    Write,
    ReadWrite,
}

impl From<EventType> for u32 {
    fn from(et: EventType) -> u32 {
        let v = match et {
            EventType::None => 0,
            EventType::Read => EPOLLIN,
            EventType::Write => EPOLLOUT,
            EventType::ReadWrite => EPOLLIN | EPOLLOUT,
        };
        v as u32
    }
}

/// Waits on several descriptors at once, reporting the token each was registered with.
///
/// Events are level-triggered: a readable descriptor that is not drained keeps being reported by
/// every call to `wait`.
pub struct WaitContext<T: EventToken> {
    epoll_ctx: SafeDescriptor,
    tokens: PhantomData<[T]>,
}

impl<T: EventToken> WaitContext<T> {
    pub fn new() -> Result<WaitContext<T>> {
        // SAFETY: the return value is checked.
        let epoll_fd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return errno_result();
        }
        Ok(WaitContext {
            // SAFETY: the kernel gave us a descriptor that we now own.
            epoll_ctx: unsafe { SafeDescriptor::from_raw_descriptor(epoll_fd) },
            tokens: PhantomData,
        })
    }

    /// Creates a new WaitContext watching each descriptor for readability.
    pub fn build_with(triggers: &[(&dyn AsRawDescriptor, T)]) -> Result<WaitContext<T>> {
        let ctx = WaitContext::new()?;
        ctx.add_many(triggers)?;
        Ok(ctx)
    }

    pub fn add_many(&self, triggers: &[(&dyn AsRawDescriptor, T)]) -> Result<()> {
        for (descriptor, token) in triggers {
            self.add(*descriptor, T::from_raw_token(token.as_raw_token()))?;
        }
        Ok(())
    }

    pub fn add(&self, descriptor: &dyn AsRawDescriptor, token: T) -> Result<()> {
        self.add_for_event(descriptor, EventType::Read, token)
    }

    pub fn add_for_event(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, descriptor, event_type, token)
    }

    /// Replaces the watched events and token of an already registered descriptor.
    pub fn modify(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, descriptor, event_type, token)
    }

    pub fn delete(&self, descriptor: &dyn AsRawDescriptor) -> Result<()> {
        // SAFETY: valid epoll and target descriptors; the return value is checked.
        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                EPOLL_CTL_DEL,
                descriptor.as_raw_descriptor(),
                null_mut(),
            )
        };
        if ret < 0 {
            return errno_result();
        }
        Ok(())
    }

    fn ctl(
        &self,
        op: libc::c_int,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: T,
    ) -> Result<()> {
        let mut evt = epoll_event {
            events: event_type.into(),
            u64: token.as_raw_token(),
        };
        // SAFETY: valid epoll and target descriptors and a valid epoll_event; the return value
        // is checked.
        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                op,
                descriptor.as_raw_descriptor(),
                &mut evt,
            )
        };
        if ret < 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Blocks until at least one registered descriptor is ready.
    pub fn wait(&self) -> Result<SmallVec<[TriggeredEvent<T>; 16]>> {
        self.wait_timeout(Duration::new(i64::MAX as u64, 0))
    }

    /// Like `wait`, returning an empty set once `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<SmallVec<[TriggeredEvent<T>; 16]>> {
        let mut epoll_events = [epoll_event { events: 0, u64: 0 }; WAIT_CONTEXT_MAX_EVENTS];
        let timeout_millis = if timeout.as_secs() as i64 == i64::MAX {
            -1
        } else {
            let millis = timeout
                .as_secs()
                .checked_mul(1_000)
                .and_then(|ms| ms.checked_add(u64::from(timeout.subsec_nanos()) / 1_000_000))
                .unwrap_or(i32::MAX as u64);
            min(i32::MAX as u64, millis) as i32
        };
        // SAFETY: the kernel fills at most `WAIT_CONTEXT_MAX_EVENTS` entries of the array.
        let ret = handle_eintr_errno!(unsafe {
            libc::epoll_wait(
                self.epoll_ctx.as_raw_descriptor(),
                epoll_events.as_mut_ptr(),
                epoll_events.len() as libc::c_int,
                timeout_millis,
            )
        });
        if ret < 0 {
            return errno_result();
        }
        let events = epoll_events[0..ret as usize]
            .iter()
            .map(|e| TriggeredEvent {
                token: T::from_raw_token(e.u64),
                is_readable: e.events & (EPOLLIN as u32) != 0,
                is_writable: e.events & (EPOLLOUT as u32) != 0,
                is_hungup: e.events & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0,
            })
            .collect();
        Ok(events)
    }
}

impl<T: EventToken> AsRawDescriptor for WaitContext<T> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.epoll_ctx.as_raw_descriptor()
    }
}
