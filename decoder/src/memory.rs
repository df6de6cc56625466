// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backing memory of the buffer slots.
//!
//! The engine treats a buffer as an opaque handle plus address and size. Who holds the right to
//! touch the bytes is decided by the slot state in the pools, not by this type.

use std::sync::Arc;

use base::AsRawDescriptor;
use base::MemoryMapping;
use base::RawDescriptor;
use base::SharedMemory;

use crate::error::DecoderError;
use crate::error::DecoderResult;

/// One shared-memory allocation mapped into this process.
#[derive(Debug)]
pub struct BufferMemory {
    shm: SharedMemory,
    mapping: MemoryMapping,
}

impl BufferMemory {
    pub fn new(name: &str, size: usize) -> DecoderResult<BufferMemory> {
        let size = base::round_up_to_page_size(size.max(1));
        let shm = SharedMemory::new(name, size as u64).map_err(|e| {
            DecoderError::FatalSetup(format!("failed to allocate {} ({} bytes): {}", name, size, e))
        })?;
        let mapping = MemoryMapping::from_descriptor(&shm, size)?;
        Ok(BufferMemory { shm, mapping })
    }

    pub fn size(&self) -> usize {
        self.mapping.size()
    }

    pub fn write_slice(&self, buf: &[u8], offset: usize) -> DecoderResult<()> {
        Ok(self.mapping.write_slice(buf, offset)?)
    }

    pub fn read_slice(&self, buf: &mut [u8], offset: usize) -> DecoderResult<()> {
        Ok(self.mapping.read_slice(buf, offset)?)
    }

    pub fn fill(&self, value: u8, offset: usize, len: usize) -> DecoderResult<()> {
        Ok(self.mapping.fill(value, offset, len)?)
    }

    /// Copies the first `len` bytes out of the buffer.
    pub fn to_vec(&self, len: usize) -> DecoderResult<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.read_slice(&mut data, 0)?;
        Ok(data)
    }
}

impl AsRawDescriptor for BufferMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.shm.as_raw_descriptor()
    }
}

/// Supplies buffers importable by both the driver and the presentation sink.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, name: &str, size: usize) -> DecoderResult<Arc<BufferMemory>>;
}

/// Allocator backed by anonymous memfds.
#[derive(Default)]
pub struct ShmAllocator;

impl MemoryAllocator for ShmAllocator {
    fn allocate(&self, name: &str, size: usize) -> DecoderResult<Arc<BufferMemory>> {
        BufferMemory::new(name, size).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_page_rounded() {
        let mem = ShmAllocator.allocate("test_buffer", 100).unwrap();
        assert_eq!(mem.size(), base::pagesize());
        mem.write_slice(b"abc", 0).unwrap();
        assert_eq!(mem.to_vec(3).unwrap(), b"abc");
    }

    #[test]
    fn out_of_bounds_write_is_an_error() {
        let mem = ShmAllocator.allocate("test_buffer", 16).unwrap();
        let too_big = vec![0u8; mem.size() + 1];
        assert!(matches!(
            mem.write_slice(&too_big, 0),
            Err(DecoderError::Memory(_))
        ));
    }
}
