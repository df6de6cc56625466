// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::CString;

use libc::c_char;
use libc::c_uint;

use crate::errno_result;
use crate::AsRawDescriptor;
use crate::Error;
use crate::FromRawDescriptor;
use crate::RawDescriptor;
use crate::Result;
use crate::SafeDescriptor;

/// An anonymous memfd and its size.
#[derive(Debug)]
pub struct SharedMemory {
    descriptor: SafeDescriptor,
    size: u64,
}

impl SharedMemory {
    /// Creates a memfd of `size` bytes. `debug_name` shows up in `/proc/self/fd`.
    pub fn new(debug_name: &str, size: u64) -> Result<SharedMemory> {
        let name = CString::new(debug_name).map_err(|_| Error::new(libc::EINVAL))?;
        // SAFETY: `name` is a valid C string; the return value is checked.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_memfd_create,
                name.as_ptr() as *const c_char,
                libc::MFD_CLOEXEC as c_uint,
            )
        } as libc::c_int;
        if fd < 0 {
            return errno_result();
        }
        // SAFETY: the kernel gave us a descriptor that we now own.
        let descriptor = unsafe { SafeDescriptor::from_raw_descriptor(fd) };

        // SAFETY: `descriptor` is a valid memfd; the return value is checked.
        let ret = unsafe { libc::ftruncate64(descriptor.as_raw_descriptor(), size as libc::off64_t) };
        if ret < 0 {
            return errno_result();
        }
        Ok(SharedMemory { descriptor, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsRawDescriptor for SharedMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sized() {
        let shm = SharedMemory::new("test", 8192).unwrap();
        assert_eq!(shm.size(), 8192);
    }

    #[test]
    fn rejects_interior_nul() {
        assert_eq!(
            SharedMemory::new("bad\0name", 4096).unwrap_err(),
            Error::new(libc::EINVAL)
        );
    }
}
