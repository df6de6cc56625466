// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors that can happen while driving a decoding session.

use remain::sorted;
use thiserror::Error as ThisError;

use crate::backend::Direction;
use crate::demux::DemuxError;
use crate::pool::SlotState;
use crate::sink::SinkError;

/// An error raised by the buffer pools, the timestamp tracker, the driver or the loops.
#[sorted]
#[derive(Debug, ThisError)]
pub enum DecoderError {
    #[error("demuxer failed: {0}")]
    Demux(#[from] DemuxError),
    /// Normal termination. Never escalated as a failure.
    #[error("end of stream")]
    EndOfStream,
    #[error("fatal setup error: {0}")]
    FatalSetup(String),
    #[error("invalid {direction} slot {index} (state {state:?})")]
    InvalidSlot {
        direction: Direction,
        index: usize,
        state: Option<SlotState>,
    },
    #[error("buffer memory error: {0}")]
    Memory(#[from] base::mmap::Error),
    #[error("access unit of {len} bytes does not fit a {capacity} bytes input buffer")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("driver protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("reconfiguration failed: {0}")]
    Reconfiguration(#[source] Box<DecoderError>),
    #[error("presentation sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("{op} failed: {source}")]
    TransientIo {
        op: &'static str,
        #[source]
        source: base::Error,
    },
    #[error("failed waiting for events: {0}")]
    Wait(base::Error),
}

impl DecoderError {
    /// Whether the error must terminate the session. Non-fatal errors are logged and the loop
    /// carries on with its next iteration.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DecoderError::EndOfStream
                | DecoderError::PayloadTooLarge { .. }
                | DecoderError::TransientIo { .. }
        )
    }

    /// A dequeue found nothing pending.
    pub fn is_would_block(&self) -> bool {
        matches!(self, DecoderError::TransientIo { source, .. } if source.errno() == libc::EAGAIN)
    }

    /// Shorthand for a failed driver call that may succeed on a later iteration.
    pub fn transient(op: &'static str, errno: i32) -> DecoderError {
        DecoderError::TransientIo {
            op,
            source: base::Error::new(errno),
        }
    }
}

pub type DecoderResult<T> = std::result::Result<T, DecoderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(!DecoderError::EndOfStream.is_fatal());
        assert!(!DecoderError::transient("dequeue_input", libc::EAGAIN).is_fatal());
        assert!(!DecoderError::PayloadTooLarge {
            len: 10,
            capacity: 5
        }
        .is_fatal());
        assert!(DecoderError::ProtocolViolation("double completion".into()).is_fatal());
        assert!(DecoderError::Reconfiguration(Box::new(DecoderError::transient(
            "set_stream",
            libc::EIO
        )))
        .is_fatal());
        assert!(DecoderError::InvalidSlot {
            direction: Direction::Input,
            index: 3,
            state: None,
        }
        .is_fatal());
    }

    #[test]
    fn would_block() {
        assert!(DecoderError::transient("dequeue_output", libc::EAGAIN).is_would_block());
        assert!(!DecoderError::transient("dequeue_output", libc::EIO).is_would_block());
        assert!(!DecoderError::EndOfStream.is_would_block());
    }
}
