// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Thin safe wrappers over the Linux primitives used by the decoder: eventfds, epoll, signalfds,
//! memfd-backed shared memory and its mappings, and the process logger.

#[macro_use]
mod macros;

mod descriptor;
mod errno;
mod event;
pub mod mmap;
mod shm;
pub mod signalfd;
pub mod syslog;
mod wait_context;

pub use descriptor::AsRawDescriptor;
pub use descriptor::Descriptor;
pub use descriptor::FromRawDescriptor;
pub use descriptor::IntoRawDescriptor;
pub use descriptor::RawDescriptor;
pub use descriptor::SafeDescriptor;
pub use errno::errno_result;
pub use errno::Error;
pub use errno::Result;
pub use event::Event;
pub use event::EventWaitResult;
pub use mmap::MemoryMapping;
pub use shm::SharedMemory;
pub use signalfd::SignalFd;
pub use wait_context::EventToken;
pub use wait_context::EventType;
pub use wait_context::TriggeredEvent;
pub use wait_context::WaitContext;

pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;

/// Returns the system page size in bytes.
pub fn pagesize() -> usize {
    // SAFETY: sysconf has no side effects and _SC_PAGESIZE is always valid.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Rounds `size` up to the next multiple of the page size.
pub fn round_up_to_page_size(size: usize) -> usize {
    let page_mask = pagesize() - 1;
    (size + page_mask) & !page_mask
}
