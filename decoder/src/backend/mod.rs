// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Abstraction of the hardware decoder: two independently progressing buffer queues plus an
//! out-of-band event channel.

pub mod emulated;
#[cfg(test)]
pub(crate) mod recording;

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use base::AsRawDescriptor;
use bitflags::bitflags;

use crate::error::DecoderResult;
use crate::format::Codec;
use crate::format::InputFormat;
use crate::format::OutputFormat;
use crate::format::Resolution;
use crate::format::Timestamp;
use crate::memory::BufferMemory;

/// One of the two buffer queues.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Compressed access units going to the hardware.
    Input,
    /// Decoded pictures coming back.
    Output,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const KEY_FRAME = 1 << 0;
        const END_OF_STREAM = 1 << 1;
        /// The timestamp field carries no meaning.
        const TIMESTAMP_INVALID = 1 << 2;
    }
}

/// Kinds of out-of-band events the driver can report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    FlushDone,
    SettingsChangedSufficient,
    SettingsChangedInsufficient,
    SysError,
    HwOverload,
    HwUnsupported,
    ReleaseBufferReference,
    ReleaseUnqueuedBuffer,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::FlushDone,
        EventKind::SettingsChangedSufficient,
        EventKind::SettingsChangedInsufficient,
        EventKind::SysError,
        EventKind::HwOverload,
        EventKind::HwUnsupported,
        EventKind::ReleaseBufferReference,
        EventKind::ReleaseUnqueuedBuffer,
    ];
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Ten,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    Bt601,
    Bt709,
    Bt2020,
}

/// An out-of-band notification from the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    FlushDone {
        input: bool,
        output: bool,
    },
    /// The stream parameters changed. `sufficient` tells whether the current output buffers
    /// can still hold the new pictures.
    SettingsChanged {
        sufficient: bool,
        resolution: Resolution,
        bit_depth: Option<BitDepth>,
        interlaced: Option<bool>,
        color_space: Option<ColorSpace>,
    },
    SysError,
    HwOverload,
    HwUnsupported,
    ReleaseBufferReference {
        index: usize,
    },
    ReleaseUnqueuedBuffer {
        index: usize,
    },
}

impl DriverEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DriverEvent::FlushDone { .. } => EventKind::FlushDone,
            DriverEvent::SettingsChanged {
                sufficient: true, ..
            } => EventKind::SettingsChangedSufficient,
            DriverEvent::SettingsChanged {
                sufficient: false, ..
            } => EventKind::SettingsChangedInsufficient,
            DriverEvent::SysError => EventKind::SysError,
            DriverEvent::HwOverload => EventKind::HwOverload,
            DriverEvent::HwUnsupported => EventKind::HwUnsupported,
            DriverEvent::ReleaseBufferReference { .. } => EventKind::ReleaseBufferReference,
            DriverEvent::ReleaseUnqueuedBuffer { .. } => EventKind::ReleaseUnqueuedBuffer,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputOrder {
    Display,
    Decode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PerfLevel {
    Nominal,
    Turbo,
}

/// Driver tunables applied before streaming starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Control {
    OutputOrder(OutputOrder),
    ContinueDataTransfer(bool),
    PerfLevel(PerfLevel),
    SecureMode(bool),
    /// Nominal frames per second of the stream.
    FrameRate(u32),
}

/// A completed output buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DequeuedPicture {
    pub index: usize,
    pub bytes_used: usize,
    pub flags: BufferFlags,
    pub timestamp: Timestamp,
}

impl DequeuedPicture {
    /// The presentation timestamp reported by the hardware, if it carries one.
    pub fn observed_timestamp(&self) -> Option<Timestamp> {
        if self.flags.contains(BufferFlags::TIMESTAMP_INVALID) {
            None
        } else {
            Some(self.timestamp)
        }
    }
}

/// Pollable sources the completion loop waits on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadySource {
    /// An input buffer was consumed and can be dequeued.
    InputDone,
    /// A decoded picture can be dequeued.
    PictureReady,
    /// An event can be dequeued.
    Event,
}

/// The hardware decoder driver.
///
/// Every call is fallible and non-blocking with respect to the other queue: the feeder thread,
/// the completion loop and the sink's release context may all use the driver concurrently.
/// Dequeue calls fail with a transient error when nothing is pending.
pub trait DecoderDriver: Send + Sync {
    fn subscribe_event(&self, kind: EventKind) -> DecoderResult<()>;

    fn set_control(&self, control: Control) -> DecoderResult<()>;

    /// Negotiates the compressed format. The driver may adjust the buffer size.
    fn set_input_format(
        &self,
        codec: Codec,
        resolution: Resolution,
        buffer_size: usize,
    ) -> DecoderResult<InputFormat>;

    /// Negotiates the decoded picture layout for `resolution`.
    fn set_output_format(&self, resolution: Resolution) -> DecoderResult<OutputFormat>;

    /// Minimum number of output buffers the hardware needs to make progress.
    fn min_output_buffers(&self) -> DecoderResult<usize>;

    /// Sizes the buffer table of `direction`. Returns the count actually granted; zero releases
    /// every buffer of the queue.
    fn request_buffers(&self, direction: Direction, count: usize) -> DecoderResult<usize>;

    fn submit_input(
        &self,
        index: usize,
        memory: &Arc<BufferMemory>,
        bytes_used: usize,
        flags: BufferFlags,
        timestamp: Timestamp,
    ) -> DecoderResult<()>;

    fn submit_output(&self, index: usize, memory: &Arc<BufferMemory>) -> DecoderResult<()>;

    fn dequeue_input(&self) -> DecoderResult<usize>;

    fn dequeue_output(&self) -> DecoderResult<DequeuedPicture>;

    /// Starts or stops a queue. Stopping returns every buffer of the queue to the caller without
    /// completing it.
    fn set_stream(&self, direction: Direction, on: bool) -> DecoderResult<()>;

    /// Asks the hardware to return pending work of `direction`, followed by a flush-done event.
    fn flush(&self, direction: Direction) -> DecoderResult<()>;

    fn dequeue_event(&self) -> DecoderResult<DriverEvent>;

    /// Descriptor that is readable while `source` has something to dequeue.
    fn readiness(&self, source: ReadySource) -> &dyn AsRawDescriptor;
}
