// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::Stdin;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::IntoRawFd;
use std::os::unix::io::RawFd;

use crate::errno_result;
use crate::Result;

pub type RawDescriptor = RawFd;

/// Wraps a RawDescriptor and closes it when dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct SafeDescriptor {
    descriptor: RawDescriptor,
}

/// Gives up ownership of the descriptor and returns it.
pub trait IntoRawDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor;
}

/// Returns the underlying descriptor without giving up ownership.
pub trait AsRawDescriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor;
}

pub trait FromRawDescriptor {
    /// # Safety
    /// Safe only if the caller ensures nothing else owns the descriptor afterwards.
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self;
}

impl SafeDescriptor {
    /// Duplicates the descriptor with close-on-exec set. Both copies refer to the same open file.
    pub fn try_clone(&self) -> Result<SafeDescriptor> {
        // SAFETY: dup of a descriptor we own; the return value is checked.
        let fd = unsafe { libc::fcntl(self.descriptor, libc::F_DUPFD_CLOEXEC, 0) };
        if fd < 0 {
            return errno_result();
        }
        // SAFETY: the kernel just gave us this descriptor.
        Ok(unsafe { SafeDescriptor::from_raw_descriptor(fd) })
    }
}

impl Drop for SafeDescriptor {
    fn drop(&mut self) {
        // SAFETY: we own the descriptor and nothing uses it after this point.
        let _ = unsafe { libc::close(self.descriptor) };
    }
}

impl AsRawDescriptor for SafeDescriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor
    }
}

impl IntoRawDescriptor for SafeDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor {
        let descriptor = self.descriptor;
        mem::forget(self);
        descriptor
    }
}

impl FromRawDescriptor for SafeDescriptor {
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self {
        SafeDescriptor { descriptor }
    }
}

impl From<SafeDescriptor> for File {
    fn from(s: SafeDescriptor) -> File {
        // SAFETY: ownership moves from the SafeDescriptor to the File.
        unsafe { File::from_raw_fd(s.into_raw_descriptor()) }
    }
}

impl From<File> for SafeDescriptor {
    fn from(f: File) -> SafeDescriptor {
        // SAFETY: ownership moves from the File to the SafeDescriptor.
        unsafe { SafeDescriptor::from_raw_descriptor(f.into_raw_fd()) }
    }
}

/// A plain descriptor number that does not manage the descriptor's lifetime.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Descriptor(pub RawDescriptor);

impl AsRawDescriptor for Descriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.0
    }
}

impl AsRawDescriptor for File {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

impl AsRawDescriptor for Stdin {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}
