// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A software stand-in for the hardware decoder.
//!
//! Every non-empty input buffer becomes one picture. Pictures sit in a small decoded picture
//! buffer and leave it in presentation order, so the output queue sees the same reordering a
//! stream with B-frames produces on real hardware. Resolution changes can be scripted to exercise
//! the reconfiguration path, and timestamps can be dropped to exercise their reconstruction.

use std::collections::VecDeque;
use std::sync::Arc;

use base::debug;
use base::AsRawDescriptor;
use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;

use super::BufferFlags;
use super::Control;
use super::DecoderDriver;
use super::DequeuedPicture;
use super::Direction;
use super::DriverEvent;
use super::EventKind;
use super::OutputOrder;
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

/// The stream switches to `resolution` starting with picture number `at_frame`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionChange {
    pub at_frame: u64,
    pub resolution: Resolution,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatedConfig {
    /// Pictures held back for display reordering.
    pub reorder_depth: usize,
    /// Report every picture without a timestamp.
    pub drop_timestamps: bool,
    pub resolution_changes: Vec<ResolutionChange>,
    pub min_output_buffers: usize,
}

impl Default for EmulatedConfig {
    fn default() -> Self {
        EmulatedConfig {
            reorder_depth: 2,
            drop_timestamps: false,
            resolution_changes: Vec::new(),
            min_output_buffers: 4,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct PendingPicture {
    number: u64,
    timestamp: Option<Timestamp>,
}

impl PendingPicture {
    /// Pictures without a timestamp leave in decode order.
    fn order_key(&self) -> (Timestamp, u64) {
        (self.timestamp.unwrap_or(Timestamp::MIN), self.number)
    }
}

#[derive(Copy, Clone, Debug)]
enum ReadyEntry {
    Picture(PendingPicture),
    ResolutionChange(Resolution),
    EndOfStream,
}

struct PendingInput {
    index: usize,
    bytes_used: usize,
    flags: BufferFlags,
    timestamp: Timestamp,
}

struct EmulatedState {
    config: EmulatedConfig,
    subscribed: Vec<EventKind>,
    output_order: OutputOrder,
    input_streaming: bool,
    output_streaming: bool,
    input_format: Option<InputFormat>,
    output_format: Option<OutputFormat>,
    output_buffer_count: usize,
    coded_resolution: Resolution,
    /// Waiting for the client to reallocate output buffers after a resolution change.
    stalled: bool,
    pictures_decoded: u64,
    pending_inputs: VecDeque<PendingInput>,
    queued_outputs: VecDeque<(usize, Arc<BufferMemory>)>,
    dpb: Vec<PendingPicture>,
    ready: VecDeque<ReadyEntry>,
}

impl EmulatedState {
    fn reorder_depth(&self) -> usize {
        match self.output_order {
            OutputOrder::Display => self.config.reorder_depth,
            OutputOrder::Decode => 0,
        }
    }

    fn bump_picture(&mut self) {
        let next = self
            .dpb
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.order_key())
            .map(|(i, _)| i);
        if let Some(i) = next {
            let picture = self.dpb.remove(i);
            self.ready.push_back(ReadyEntry::Picture(picture));
        }
    }

    fn drain_dpb(&mut self) {
        while !self.dpb.is_empty() {
            self.bump_picture();
        }
    }

    fn decode(&mut self, input: &PendingInput) {
        if input.bytes_used > 0 {
            let number = self.pictures_decoded;
            let change = self
                .config
                .resolution_changes
                .iter()
                .find(|c| c.at_frame == number)
                .map(|c| c.resolution);
            if let Some(resolution) = change {
                if resolution != self.coded_resolution {
                    self.drain_dpb();
                    self.coded_resolution = resolution;
                    self.ready.push_back(ReadyEntry::ResolutionChange(resolution));
                }
            }
            let timestamp = if input.flags.contains(BufferFlags::TIMESTAMP_INVALID) {
                None
            } else {
                Some(input.timestamp)
            };
            self.dpb.push(PendingPicture { number, timestamp });
            self.pictures_decoded += 1;
            while self.dpb.len() > self.reorder_depth() {
                self.bump_picture();
            }
        }
        if input.flags.contains(BufferFlags::END_OF_STREAM) {
            self.drain_dpb();
            self.ready.push_back(ReadyEntry::EndOfStream);
        }
    }
}

pub struct EmulatedDecoder {
    state: Mutex<EmulatedState>,
    input_done: SyncEventQueue<usize>,
    pictures: SyncEventQueue<DequeuedPicture>,
    events: SyncEventQueue<DriverEvent>,
}

impl EmulatedDecoder {
    pub fn new(config: EmulatedConfig) -> DecoderResult<EmulatedDecoder> {
        let queue_err =
            |e: base::Error| DecoderError::FatalSetup(format!("failed to create queue: {}", e));
        Ok(EmulatedDecoder {
            state: Mutex::new(EmulatedState {
                config,
                subscribed: Vec::new(),
                output_order: OutputOrder::Display,
                input_streaming: false,
                output_streaming: false,
                input_format: None,
                output_format: None,
                output_buffer_count: 0,
                coded_resolution: Resolution::default(),
                stalled: false,
                pictures_decoded: 0,
                pending_inputs: VecDeque::new(),
                queued_outputs: VecDeque::new(),
                dpb: Vec::new(),
                ready: VecDeque::new(),
            }),
            input_done: SyncEventQueue::new().map_err(queue_err)?,
            pictures: SyncEventQueue::new().map_err(queue_err)?,
            events: SyncEventQueue::new().map_err(queue_err)?,
        })
    }

    fn post_event(&self, state: &EmulatedState, event: DriverEvent) -> DecoderResult<()> {
        if !state.subscribed.contains(&event.kind()) {
            debug!("dropping unsubscribed event {:?}", event);
            return Ok(());
        }
        self.events
            .queue_event(event)
            .map_err(|e| DecoderError::TransientIo {
                op: "post_event",
                source: e,
            })
    }

    fn post_picture(&self, picture: DequeuedPicture) -> DecoderResult<()> {
        self.pictures
            .queue_event(picture)
            .map_err(|e| DecoderError::TransientIo {
                op: "post_picture",
                source: e,
            })
    }

    fn process_inputs(&self, state: &mut EmulatedState) -> DecoderResult<()> {
        if !state.input_streaming {
            return Ok(());
        }
        while let Some(input) = state.pending_inputs.pop_front() {
            state.decode(&input);
            self.input_done
                .queue_event(input.index)
                .map_err(|e| DecoderError::TransientIo {
                    op: "post_input",
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Moves ready entries into queued output buffers while possible.
    fn pump(&self, state: &mut EmulatedState) -> DecoderResult<()> {
        while state.output_streaming && !state.stalled {
            let entry = match state.ready.front() {
                Some(entry) => *entry,
                None => break,
            };
            match entry {
                ReadyEntry::ResolutionChange(resolution) => {
                    state.ready.pop_front();
                    let sufficient = state.output_format.map_or(false, |f| {
                        f.resolution.width >= resolution.width
                            && f.resolution.height >= resolution.height
                    });
                    state.stalled = !sufficient;
                    self.post_event(
                        state,
                        DriverEvent::SettingsChanged {
                            sufficient,
                            resolution,
                            bit_depth: None,
                            interlaced: None,
                            color_space: None,
                        },
                    )?;
                }
                ReadyEntry::Picture(picture) => {
                    let (index, memory) = match state.queued_outputs.pop_front() {
                        Some(output) => output,
                        None => break,
                    };
                    state.ready.pop_front();
                    let bytes_used = match state.output_format {
                        Some(format) => {
                            paint_picture(&memory, &format, picture.number)?;
                            format.buffer_size
                        }
                        None => memory.size(),
                    };
                    let timestamp = picture.timestamp.filter(|_| !state.config.drop_timestamps);
                    let mut flags = BufferFlags::empty();
                    if timestamp.is_none() {
                        flags |= BufferFlags::TIMESTAMP_INVALID;
                    }
                    self.post_picture(DequeuedPicture {
                        index,
                        bytes_used,
                        flags,
                        timestamp: timestamp.unwrap_or(0),
                    })?;
                }
                ReadyEntry::EndOfStream => {
                    let (index, _) = match state.queued_outputs.pop_front() {
                        Some(output) => output,
                        None => break,
                    };
                    state.ready.pop_front();
                    self.post_picture(DequeuedPicture {
                        index,
                        bytes_used: 0,
                        flags: BufferFlags::END_OF_STREAM | BufferFlags::TIMESTAMP_INVALID,
                        timestamp: 0,
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Fills the luma plane with the picture number and the chroma plane with neutral grey.
fn paint_picture(memory: &BufferMemory, format: &OutputFormat, number: u64) -> DecoderResult<()> {
    let chroma_offset = format.chroma_offset();
    memory.fill((number % 256) as u8, 0, chroma_offset)?;
    memory.fill(128, chroma_offset, format.buffer_size - chroma_offset)
}

fn einval(op: &'static str) -> DecoderError {
    DecoderError::transient(op, libc::EINVAL)
}

impl DecoderDriver for EmulatedDecoder {
    fn subscribe_event(&self, kind: EventKind) -> DecoderResult<()> {
        let mut state = self.state.lock();
        if !state.subscribed.contains(&kind) {
            state.subscribed.push(kind);
        }
        Ok(())
    }

    fn set_control(&self, control: Control) -> DecoderResult<()> {
        debug!("emulated decoder control: {:?}", control);
        if let Control::OutputOrder(order) = control {
            self.state.lock().output_order = order;
        }
        Ok(())
    }

    fn set_input_format(
        &self,
        codec: Codec,
        resolution: Resolution,
        buffer_size: usize,
    ) -> DecoderResult<InputFormat> {
        let mut state = self.state.lock();
        if state.input_streaming {
            return Err(DecoderError::transient("set_input_format", libc::EBUSY));
        }
        let format = InputFormat {
            codec,
            resolution,
            buffer_size,
        };
        state.input_format = Some(format);
        state.coded_resolution = resolution;
        Ok(format)
    }

    fn set_output_format(&self, resolution: Resolution) -> DecoderResult<OutputFormat> {
        let mut state = self.state.lock();
        if state.output_streaming {
            return Err(DecoderError::transient("set_output_format", libc::EBUSY));
        }
        // The hardware always decodes at the coded size.
        let format = OutputFormat::nv12(state.coded_resolution);
        if format.resolution != resolution {
            debug!(
                "output format adjusted from {} to {}",
                resolution, format.resolution
            );
        }
        state.output_format = Some(format);
        Ok(format)
    }

    fn min_output_buffers(&self) -> DecoderResult<usize> {
        Ok(self.state.lock().config.min_output_buffers)
    }

    fn request_buffers(&self, direction: Direction, count: usize) -> DecoderResult<usize> {
        let mut state = self.state.lock();
        match direction {
            Direction::Input => {
                if state.input_streaming {
                    return Err(DecoderError::transient("request_buffers", libc::EBUSY));
                }
                Ok(count)
            }
            Direction::Output => {
                if state.output_streaming {
                    return Err(DecoderError::transient("request_buffers", libc::EBUSY));
                }
                let granted = if count == 0 {
                    0
                } else {
                    count.max(state.config.min_output_buffers)
                };
                state.output_buffer_count = granted;
                Ok(granted)
            }
        }
    }

    fn submit_input(
        &self,
        index: usize,
        memory: &Arc<BufferMemory>,
        bytes_used: usize,
        flags: BufferFlags,
        timestamp: Timestamp,
    ) -> DecoderResult<()> {
        let mut state = self.state.lock();
        let format = state.input_format.ok_or_else(|| einval("submit_input"))?;
        if bytes_used > memory.size() || bytes_used > format.buffer_size {
            return Err(einval("submit_input"));
        }
        state.pending_inputs.push_back(PendingInput {
            index,
            bytes_used,
            flags,
            timestamp,
        });
        self.process_inputs(&mut state)?;
        self.pump(&mut state)
    }

    fn submit_output(&self, index: usize, memory: &Arc<BufferMemory>) -> DecoderResult<()> {
        let mut state = self.state.lock();
        let format = state.output_format.ok_or_else(|| einval("submit_output"))?;
        if index >= state.output_buffer_count || memory.size() < format.buffer_size {
            return Err(einval("submit_output"));
        }
        state.queued_outputs.push_back((index, Arc::clone(memory)));
        self.pump(&mut state)
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
        let mut state = self.state.lock();
        let queue_err = |e: base::Error| DecoderError::TransientIo {
            op: "set_stream",
            source: e,
        };
        match (direction, on) {
            (Direction::Input, true) => {
                state.input_streaming = true;
                self.process_inputs(&mut state)?;
            }
            (Direction::Input, false) => {
                state.input_streaming = false;
                state.pending_inputs.clear();
                self.input_done.retain(|_| false).map_err(queue_err)?;
            }
            (Direction::Output, true) => {
                state.output_streaming = true;
                let fits = state.output_format.map_or(false, |f| {
                    f.resolution.width >= state.coded_resolution.width
                        && f.resolution.height >= state.coded_resolution.height
                });
                if state.stalled && fits {
                    state.stalled = false;
                }
            }
            (Direction::Output, false) => {
                state.output_streaming = false;
                state.queued_outputs.clear();
                self.pictures.retain(|_| false).map_err(queue_err)?;
            }
        }
        self.pump(&mut state)
    }

    fn flush(&self, direction: Direction) -> DecoderResult<()> {
        let state = self.state.lock();
        let event = match direction {
            Direction::Input => DriverEvent::FlushDone {
                input: true,
                output: false,
            },
            Direction::Output => DriverEvent::FlushDone {
                input: false,
                output: true,
            },
        };
        self.post_event(&state, event)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAllocator;
    use crate::memory::ShmAllocator;

    const RES: Resolution = Resolution {
        width: 64,
        height: 32,
    };

    struct Harness {
        decoder: EmulatedDecoder,
        input: Arc<BufferMemory>,
        outputs: Vec<Arc<BufferMemory>>,
    }

    impl Harness {
        fn new(config: EmulatedConfig) -> Harness {
            let decoder = EmulatedDecoder::new(config).unwrap();
            for kind in EventKind::ALL {
                decoder.subscribe_event(kind).unwrap();
            }
            decoder.set_input_format(Codec::H264, RES, 4096).unwrap();
            let format = decoder.set_output_format(RES).unwrap();
            let count = decoder.request_buffers(Direction::Output, 6).unwrap();
            let outputs = (0..count)
                .map(|_| ShmAllocator.allocate("out", format.buffer_size).unwrap())
                .collect();
            decoder.set_stream(Direction::Input, true).unwrap();
            decoder.set_stream(Direction::Output, true).unwrap();
            Harness {
                decoder,
                input: ShmAllocator.allocate("in", 4096).unwrap(),
                outputs,
            }
        }

        fn queue_all_outputs(&self) {
            for (index, memory) in self.outputs.iter().enumerate() {
                self.decoder.submit_output(index, memory).unwrap();
            }
        }

        fn feed(&self, timestamp: Timestamp) {
            self.decoder
                .submit_input(0, &self.input, 16, BufferFlags::empty(), timestamp)
                .unwrap();
            assert_eq!(self.decoder.dequeue_input().unwrap(), 0);
        }

        fn end_of_stream(&self) {
            let flags = BufferFlags::END_OF_STREAM | BufferFlags::TIMESTAMP_INVALID;
            self.decoder
                .submit_input(0, &self.input, 0, flags, 0)
                .unwrap();
            self.decoder.dequeue_input().unwrap();
        }

        fn drain_pictures(&self) -> Vec<DequeuedPicture> {
            std::iter::from_fn(|| self.decoder.dequeue_output().ok()).collect()
        }
    }

    #[test]
    fn pictures_leave_in_presentation_order() {
        let h = Harness::new(EmulatedConfig::default());
        h.queue_all_outputs();
        for ts in [0, 3, 1, 2] {
            h.feed(ts);
        }
        h.end_of_stream();
        let pictures = h.drain_pictures();
        let timestamps: Vec<_> = pictures.iter().map(|p| p.observed_timestamp()).collect();
        assert_eq!(timestamps, vec![Some(0), Some(1), Some(2), Some(3), None]);
        let last = pictures.last().unwrap();
        assert_eq!(last.bytes_used, 0);
        assert!(last.flags.contains(BufferFlags::END_OF_STREAM));
    }

    #[test]
    fn decode_order_disables_reordering() {
        let h = Harness::new(EmulatedConfig::default());
        h.decoder
            .set_control(Control::OutputOrder(OutputOrder::Decode))
            .unwrap();
        h.queue_all_outputs();
        h.feed(3);
        h.feed(1);
        let timestamps: Vec<_> = h.drain_pictures().iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![3, 1]);
    }

    #[test]
    fn picture_contents_follow_layout() {
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            ..Default::default()
        });
        h.queue_all_outputs();
        h.feed(0);
        h.feed(1);
        let pictures = h.drain_pictures();
        let format = OutputFormat::nv12(RES);
        let second = &h.outputs[pictures[1].index];
        let data = second.to_vec(format.buffer_size).unwrap();
        assert_eq!(pictures[1].bytes_used, format.buffer_size);
        assert_eq!(data[0], 1);
        assert_eq!(data[format.chroma_offset()], 128);
    }

    #[test]
    fn waits_for_output_buffers() {
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            ..Default::default()
        });
        h.feed(7);
        assert!(h.drain_pictures().is_empty());
        h.decoder.submit_output(0, &h.outputs[0]).unwrap();
        assert_eq!(h.drain_pictures()[0].timestamp, 7);
    }

    #[test]
    fn dropped_timestamps_are_flagged() {
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            drop_timestamps: true,
            ..Default::default()
        });
        h.queue_all_outputs();
        h.feed(40);
        assert_eq!(h.drain_pictures()[0].observed_timestamp(), None);
    }

    #[test]
    fn larger_resolution_stalls_until_reallocation() {
        let bigger = Resolution::new(128, 64);
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            resolution_changes: vec![ResolutionChange {
                at_frame: 1,
                resolution: bigger,
            }],
            ..Default::default()
        });
        h.queue_all_outputs();
        h.feed(0);
        h.feed(1);
        assert_eq!(h.drain_pictures().len(), 1);
        assert!(matches!(
            h.decoder.dequeue_event().unwrap(),
            DriverEvent::SettingsChanged {
                sufficient: false,
                resolution,
                ..
            } if resolution == bigger
        ));

        h.decoder.flush(Direction::Output).unwrap();
        assert_eq!(
            h.decoder.dequeue_event().unwrap(),
            DriverEvent::FlushDone {
                input: false,
                output: true
            }
        );
        // Reallocating while streaming is refused.
        assert!(h.decoder.request_buffers(Direction::Output, 4).is_err());

        h.decoder.set_stream(Direction::Output, false).unwrap();
        h.decoder.request_buffers(Direction::Output, 0).unwrap();
        let format = h.decoder.set_output_format(bigger).unwrap();
        assert_eq!(format.resolution, bigger);
        let count = h.decoder.request_buffers(Direction::Output, 2).unwrap();
        assert_eq!(count, 4);
        let memory = ShmAllocator.allocate("big", format.buffer_size).unwrap();
        h.decoder.submit_output(0, &memory).unwrap();
        h.decoder.set_stream(Direction::Output, true).unwrap();
        let pictures = h.drain_pictures();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].timestamp, 1);
        assert_eq!(pictures[0].bytes_used, format.buffer_size);
    }

    #[test]
    fn smaller_resolution_is_sufficient() {
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            resolution_changes: vec![ResolutionChange {
                at_frame: 1,
                resolution: Resolution::new(32, 16),
            }],
            ..Default::default()
        });
        h.queue_all_outputs();
        h.feed(0);
        h.feed(1);
        assert_eq!(h.drain_pictures().len(), 2);
        assert!(matches!(
            h.decoder.dequeue_event().unwrap(),
            DriverEvent::SettingsChanged {
                sufficient: true,
                ..
            }
        ));
    }

    #[test]
    fn unsubscribed_events_are_dropped() {
        let decoder = EmulatedDecoder::new(EmulatedConfig::default()).unwrap();
        decoder.flush(Direction::Output).unwrap();
        assert!(decoder.dequeue_event().is_err());
        decoder.subscribe_event(EventKind::FlushDone).unwrap();
        decoder.flush(Direction::Output).unwrap();
        assert!(decoder.dequeue_event().is_ok());
    }

    #[test]
    fn stream_off_returns_queued_outputs() {
        let h = Harness::new(EmulatedConfig {
            reorder_depth: 0,
            ..Default::default()
        });
        h.queue_all_outputs();
        h.feed(0);
        h.decoder.set_stream(Direction::Output, false).unwrap();
        assert!(h.drain_pictures().is_empty());
        assert!(h.decoder.submit_output(0, &h.outputs[0]).is_ok());
    }
}
