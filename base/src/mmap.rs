// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ptr::copy_nonoverlapping;
use std::ptr::null_mut;

use remain::sorted;
use thiserror::Error;

use crate::AsRawDescriptor;
use crate::Error as ErrnoError;

#[sorted]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("requested memory out of range: offset {offset} len {len} size {size}")]
    InvalidRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("mmap related system call failed: {0}")]
    SystemCallFailed(ErrnoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A shared, read-write mapping of a descriptor into this process.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: *mut u8,
    size: usize,
}

// SAFETY: the mapping is plain process memory; concurrent access to the same bytes is governed
// by the callers' ownership discipline, exactly as for any other shared buffer.
unsafe impl Send for MemoryMapping {}
// SAFETY: see above.
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    /// Maps `size` bytes of `descriptor` starting at offset 0.
    pub fn from_descriptor(descriptor: &dyn AsRawDescriptor, size: usize) -> Result<MemoryMapping> {
        if size == 0 {
            return Err(Error::InvalidRange {
                offset: 0,
                len: 0,
                size: 0,
            });
        }
        // SAFETY: a fresh shared mapping is requested from the kernel; the result is checked.
        let addr = unsafe {
            libc::mmap(
                null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                descriptor.as_raw_descriptor(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::SystemCallFailed(ErrnoError::last()));
        }
        Ok(MemoryMapping {
            addr: addr as *mut u8,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::InvalidRange {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Copies `buf` into the mapping at `offset`. The whole slice must fit.
    pub fn write_slice(&self, buf: &[u8], offset: usize) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: the destination range was checked to lie within the mapping.
        unsafe { copy_nonoverlapping(buf.as_ptr(), self.addr.add(offset), buf.len()) };
        Ok(())
    }

    /// Fills `buf` from the mapping at `offset`. The whole slice must fit.
    pub fn read_slice(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: the source range was checked to lie within the mapping.
        unsafe { copy_nonoverlapping(self.addr.add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Sets `len` bytes at `offset` to `value`.
    pub fn fill(&self, value: u8, offset: usize, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        // SAFETY: the range was checked to lie within the mapping.
        unsafe { self.addr.add(offset).write_bytes(value, len) };
        Ok(())
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by us with this exact size.
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedMemory;

    #[test]
    fn write_then_read() {
        let shm = SharedMemory::new("mmap_test", 4096).unwrap();
        let mapping = MemoryMapping::from_descriptor(&shm, 4096).unwrap();
        mapping.write_slice(&[1, 2, 3], 10).unwrap();
        let mut out = [0u8; 3];
        mapping.read_slice(&mut out, 10).unwrap();
        assert_eq!(out, [1, 2, 3]);

        mapping.fill(0xab, 100, 2).unwrap();
        let mut filled = [0u8; 2];
        mapping.read_slice(&mut filled, 100).unwrap();
        assert_eq!(filled, [0xab, 0xab]);
    }

    #[test]
    fn out_of_range() {
        let shm = SharedMemory::new("mmap_test", 4096).unwrap();
        let mapping = MemoryMapping::from_descriptor(&shm, 4096).unwrap();
        assert!(matches!(
            mapping.write_slice(&[0; 8], 4092),
            Err(Error::InvalidRange { .. })
        ));
        assert!(mapping.read_slice(&mut [0; 1], usize::MAX).is_err());
    }
}
