// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A driver double that records every call and completes buffers only when told to.

use std::sync::Arc;

use base::AsRawDescriptor;
use sync::Mutex;

use super::BufferFlags;
use super::Control;
use super::DecoderDriver;
use super::DequeuedPicture;
use super::Direction;
use super::DriverEvent;
use super::EventKind;
use super::ReadySource;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::format::Codec;
use crate::format::InputFormat;
use crate::format::OutputFormat;
use crate::format::Resolution;
use crate::format::Timestamp;
use crate::memory::BufferMemory;
use crate::utils::SyncEventQueue;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverCall {
    SubscribeEvent(EventKind),
    SetControl(Control),
    SetInputFormat(Codec, Resolution),
    SetOutputFormat(Resolution),
    RequestBuffers(Direction, usize),
    SubmitInput {
        index: usize,
        bytes_used: usize,
        flags: BufferFlags,
        timestamp: Timestamp,
    },
    SubmitOutput(usize),
    SetStream(Direction, bool),
    Flush(Direction),
}

pub struct RecordingDriver {
    calls: Mutex<Vec<DriverCall>>,
    // Operation to fail and how many more times. `None` fails forever.
    failing_op: Mutex<Option<(&'static str, Option<usize>)>>,
    min_output_buffers: usize,
    input_done: SyncEventQueue<usize>,
    pictures: SyncEventQueue<DequeuedPicture>,
    events: SyncEventQueue<DriverEvent>,
}

impl RecordingDriver {
    pub fn new() -> Arc<RecordingDriver> {
        Self::with_min_output_buffers(2)
    }

    pub fn with_min_output_buffers(min_output_buffers: usize) -> Arc<RecordingDriver> {
        Arc::new(RecordingDriver {
            calls: Mutex::new(Vec::new()),
            failing_op: Mutex::new(None),
            min_output_buffers,
            input_done: SyncEventQueue::new().unwrap(),
            pictures: SyncEventQueue::new().unwrap(),
            events: SyncEventQueue::new().unwrap(),
        })
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn submitted_outputs(&self) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                DriverCall::SubmitOutput(index) => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Makes every later call named `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        *self.failing_op.lock() = Some((op, None));
    }

    /// Makes the next `times` calls named `op` fail.
    pub fn fail_times(&self, op: &'static str, times: usize) {
        *self.failing_op.lock() = Some((op, Some(times)));
    }

    pub fn clear_failure(&self) {
        *self.failing_op.lock() = None;
    }

    pub fn complete_input(&self, index: usize) {
        self.input_done.queue_event(index).unwrap();
    }

    pub fn complete_output(&self, index: usize, bytes_used: usize, timestamp: Option<Timestamp>) {
        let flags = match timestamp {
            Some(_) => BufferFlags::empty(),
            None => BufferFlags::TIMESTAMP_INVALID,
        };
        self.pictures
            .queue_event(DequeuedPicture {
                index,
                bytes_used,
                flags,
                timestamp: timestamp.unwrap_or(0),
            })
            .unwrap();
    }

    pub fn post_event(&self, event: DriverEvent) {
        self.events.queue_event(event).unwrap();
    }

    fn record(&self, op: &'static str, call: DriverCall) -> DecoderResult<()> {
        let fail = {
            let mut failing_op = self.failing_op.lock();
            match *failing_op {
                Some((failing, None)) => failing == op,
                Some((failing, Some(n))) if failing == op => {
                    *failing_op = if n > 1 {
                        Some((failing, Some(n - 1)))
                    } else {
                        None
                    };
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(DecoderError::transient(op, libc::EIO));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl DecoderDriver for RecordingDriver {
    fn subscribe_event(&self, kind: EventKind) -> DecoderResult<()> {
        self.record("subscribe_event", DriverCall::SubscribeEvent(kind))
    }

    fn set_control(&self, control: Control) -> DecoderResult<()> {
        self.record("set_control", DriverCall::SetControl(control))
    }

    fn set_input_format(
        &self,
        codec: Codec,
        resolution: Resolution,
        buffer_size: usize,
    ) -> DecoderResult<InputFormat> {
        self.record(
            "set_input_format",
            DriverCall::SetInputFormat(codec, resolution),
        )?;
        Ok(InputFormat {
            codec,
            resolution,
            buffer_size,
        })
    }

    fn set_output_format(&self, resolution: Resolution) -> DecoderResult<OutputFormat> {
        self.record("set_output_format", DriverCall::SetOutputFormat(resolution))?;
        Ok(OutputFormat::nv12(resolution))
    }

    fn min_output_buffers(&self) -> DecoderResult<usize> {
        Ok(self.min_output_buffers)
    }

    fn request_buffers(&self, direction: Direction, count: usize) -> DecoderResult<usize> {
        self.record(
            "request_buffers",
            DriverCall::RequestBuffers(direction, count),
        )?;
        Ok(count)
    }

    fn submit_input(
        &self,
        index: usize,
        _memory: &Arc<BufferMemory>,
        bytes_used: usize,
        flags: BufferFlags,
        timestamp: Timestamp,
    ) -> DecoderResult<()> {
        self.record(
            "submit_input",
            DriverCall::SubmitInput {
                index,
                bytes_used,
                flags,
                timestamp,
            },
        )
    }

    fn submit_output(&self, index: usize, _memory: &Arc<BufferMemory>) -> DecoderResult<()> {
        self.record("submit_output", DriverCall::SubmitOutput(index))
    }

    fn dequeue_input(&self) -> DecoderResult<usize> {
        self.input_done
            .dequeue_event()
            .map_err(|e| DecoderError::TransientIo {
                op: "dequeue_input",
                source: e,
            })?
            .ok_or_else(|| DecoderError::transient("dequeue_input", libc::EAGAIN))
    }

    fn dequeue_output(&self) -> DecoderResult<DequeuedPicture> {
        self.pictures
            .dequeue_event()
            .map_err(|e| DecoderError::TransientIo {
                op: "dequeue_output",
                source: e,
            })?
            .ok_or_else(|| DecoderError::transient("dequeue_output", libc::EAGAIN))
    }

    fn set_stream(&self, direction: Direction, on: bool) -> DecoderResult<()> {
        self.record("set_stream", DriverCall::SetStream(direction, on))
    }

    fn flush(&self, direction: Direction) -> DecoderResult<()> {
        self.record("flush", DriverCall::Flush(direction))
    }

    fn dequeue_event(&self) -> DecoderResult<DriverEvent> {
        self.events
            .dequeue_event()
            .map_err(|e| DecoderError::TransientIo {
                op: "dequeue_event",
                source: e,
            })?
            .ok_or_else(|| DecoderError::transient("dequeue_event", libc::EAGAIN))
    }

    fn readiness(&self, source: ReadySource) -> &dyn AsRawDescriptor {
        match source {
            ReadySource::InputDone => &self.input_done,
            ReadySource::PictureReady => &self.pictures,
            ReadySource::Event => &self.events,
        }
    }
}
