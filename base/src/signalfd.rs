// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;
use std::os::raw::c_int;
use std::ptr::null_mut;
use std::result;

use libc::c_void;
use libc::sigset_t;
use libc::signalfd_siginfo;
use libc::EAGAIN;
use libc::SFD_CLOEXEC;
use libc::SFD_NONBLOCK;
use log::error;
use remain::sorted;
use thiserror::Error;

use crate::AsRawDescriptor;
use crate::Error as ErrnoError;
use crate::FromRawDescriptor;
use crate::RawDescriptor;
use crate::SafeDescriptor;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to block the signals when creating signalfd.
    #[error("failed to block the signals when creating signalfd: {0}")]
    CreateBlockSignal(ErrnoError),
    /// Failed to create a new signalfd.
    #[error("failed to create a new signalfd: {0}")]
    CreateSignalFd(ErrnoError),
    /// Failed to construct sigset when creating signalfd.
    #[error("failed to construct sigset when creating signalfd: {0}")]
    CreateSigset(ErrnoError),
    /// Signalfd could be read, but didn't return a full siginfo struct.
    #[error("signalfd failed to return a full siginfo struct, read only {0} bytes")]
    SignalFdPartialRead(usize),
    /// Unable to read from signalfd.
    #[error("unable to read from signalfd: {0}")]
    SignalFdRead(ErrnoError),
}

pub type Result<T> = result::Result<T, Error>;

fn create_sigset(signals: &[c_int]) -> result::Result<sigset_t, ErrnoError> {
    // SAFETY: sigset_t is plain data and sigemptyset initializes it.
    let mut sigset: sigset_t = unsafe { mem::zeroed() };
    // SAFETY: `sigset` is a valid, writable sigset_t.
    if unsafe { libc::sigemptyset(&mut sigset) } < 0 {
        return Err(ErrnoError::last());
    }
    for signal in signals {
        // SAFETY: `sigset` is a valid, writable sigset_t.
        if unsafe { libc::sigaddset(&mut sigset, *signal) } < 0 {
            return Err(ErrnoError::last());
        }
    }
    Ok(sigset)
}

fn set_signal_mask(how: c_int, sigset: &sigset_t) -> result::Result<(), ErrnoError> {
    // SAFETY: `sigset` is valid and the old mask is not requested.
    let ret = unsafe { libc::pthread_sigmask(how, sigset, null_mut()) };
    if ret != 0 {
        return Err(ErrnoError::new(ret));
    }
    Ok(())
}

/// A wrapper around a Linux signalfd (man 2 signalfd).
///
/// The signals are blocked for the calling thread for the lifetime of the `SignalFd`. Threads
/// inherit the mask of their creator, so the `SignalFd` must be created before any worker
/// thread is spawned for delivery to be routed here reliably.
pub struct SignalFd {
    signalfd: SafeDescriptor,
    sigset: sigset_t,
}

impl SignalFd {
    pub fn new(signals: &[c_int]) -> Result<SignalFd> {
        let sigset = create_sigset(signals).map_err(Error::CreateSigset)?;

        // SAFETY: `sigset` is valid; the return value is checked.
        let fd = unsafe { libc::signalfd(-1, &sigset, SFD_CLOEXEC | SFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::CreateSignalFd(ErrnoError::last()));
        }
        // SAFETY: the kernel gave us a descriptor that we now own.
        let signalfd = unsafe { SafeDescriptor::from_raw_descriptor(fd) };

        set_signal_mask(libc::SIG_BLOCK, &sigset).map_err(Error::CreateBlockSignal)?;

        Ok(SignalFd { signalfd, sigset })
    }

    /// Reads one pending signal, if any.
    pub fn read(&self) -> Result<Option<signalfd_siginfo>> {
        // SAFETY: signalfd_siginfo is plain data.
        let mut siginfo: signalfd_siginfo = unsafe { mem::zeroed() };
        let siginfo_size = mem::size_of::<signalfd_siginfo>();

        // SAFETY: the buffer is exactly one siginfo. EINTR cannot happen with SFD_NONBLOCK.
        let ret = unsafe {
            libc::read(
                self.signalfd.as_raw_descriptor(),
                &mut siginfo as *mut signalfd_siginfo as *mut c_void,
                siginfo_size,
            )
        };

        if ret < 0 {
            let err = ErrnoError::last();
            if err.errno() == EAGAIN {
                Ok(None)
            } else {
                Err(Error::SignalFdRead(err))
            }
        } else if ret == (siginfo_size as isize) {
            Ok(Some(siginfo))
        } else {
            Err(Error::SignalFdPartialRead(ret as usize))
        }
    }
}

impl AsRawDescriptor for SignalFd {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.signalfd.as_raw_descriptor()
    }
}

impl Drop for SignalFd {
    fn drop(&mut self) {
        if let Err(e) = set_signal_mask(libc::SIG_UNBLOCK, &self.sigset) {
            error!("failed to restore signal mask: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_raised_signal() {
        let sigid = libc::SIGRTMIN() + 1;
        let sigrt_fd = SignalFd::new(&[sigid]).unwrap();

        // SAFETY: the signal is blocked, so raising it only queues it on the signalfd.
        let ret = unsafe { libc::raise(sigid) };
        assert_eq!(ret, 0);

        let siginfo = sigrt_fd.read().unwrap().unwrap();
        assert_eq!(siginfo.ssi_signo, sigid as u32);
        assert!(sigrt_fd.read().unwrap().is_none());
    }
}
