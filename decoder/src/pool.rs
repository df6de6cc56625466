// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slot tables of the input and output queues.
//!
//! Each slot has exactly one owner at any time, encoded by its `SlotState`: the engine (`Free`),
//! the driver (`Queued`) or the presentation sink (`Presenting`). Ownership only changes through
//! the transition methods below, which reject any move that does not start from the expected
//! state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::BufferFlags;
use crate::backend::DecoderDriver;
use crate::backend::Direction;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::format::Timestamp;
use crate::memory::BufferMemory;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Queued,
    Presenting,
}

fn invalid_slot(direction: Direction, index: usize, state: Option<SlotState>) -> DecoderError {
    DecoderError::InvalidSlot {
        direction,
        index,
        state,
    }
}

struct InputSlot {
    memory: Arc<BufferMemory>,
    state: SlotState,
    payload_len: usize,
    flags: BufferFlags,
    timestamp: Timestamp,
}

/// Fixed-size table of compressed-data buffers.
#[derive(Default)]
pub struct InputPool {
    slots: Vec<InputSlot>,
}

impl InputPool {
    pub fn new(memories: Vec<Arc<BufferMemory>>) -> InputPool {
        InputPool {
            slots: memories
                .into_iter()
                .map(|memory| InputSlot {
                    memory,
                    state: SlotState::Free,
                    payload_len: 0,
                    flags: BufferFlags::empty(),
                    timestamp: 0,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|s| s.state)
    }

    /// Backing memory of a `Free` slot, which the engine may fill.
    pub fn free_memory(&self, index: usize) -> DecoderResult<Arc<BufferMemory>> {
        match self.slots.get(index) {
            Some(slot) if slot.state == SlotState::Free => Ok(Arc::clone(&slot.memory)),
            slot => Err(invalid_slot(
                Direction::Input,
                index,
                slot.map(|s| s.state),
            )),
        }
    }

    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == SlotState::Free)
    }

    pub fn queued_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }

    /// Hands a `Free` slot holding `payload_len` bytes to the driver. A zero length together
    /// with `END_OF_STREAM` asks the hardware to drain.
    pub fn submit(
        &mut self,
        driver: &dyn DecoderDriver,
        index: usize,
        payload_len: usize,
        flags: BufferFlags,
        timestamp: Timestamp,
    ) -> DecoderResult<()> {
        let slot = match self.slots.get_mut(index) {
            Some(slot) if slot.state == SlotState::Free => slot,
            slot => {
                return Err(invalid_slot(
                    Direction::Input,
                    index,
                    slot.map(|s| s.state),
                ))
            }
        };
        if payload_len > slot.memory.size() {
            return Err(DecoderError::PayloadTooLarge {
                len: payload_len,
                capacity: slot.memory.size(),
            });
        }
        driver.submit_input(index, &slot.memory, payload_len, flags, timestamp)?;
        slot.state = SlotState::Queued;
        slot.payload_len = payload_len;
        slot.flags = flags;
        slot.timestamp = timestamp;
        Ok(())
    }

    /// The driver returned slot `index`.
    pub fn complete(&mut self, index: usize) -> DecoderResult<()> {
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            DecoderError::ProtocolViolation(format!("driver returned unknown input slot {}", index))
        })?;
        if slot.state != SlotState::Queued {
            return Err(DecoderError::ProtocolViolation(format!(
                "input slot {} completed while {:?}",
                index, slot.state
            )));
        }
        slot.state = SlotState::Free;
        slot.payload_len = 0;
        Ok(())
    }

    /// Releases every slot. The driver must have stopped the queue beforehand. Returns the
    /// number of slots destroyed; calling it again is a no-op.
    pub fn teardown(&mut self) -> usize {
        let destroyed = self.slots.len();
        self.slots.clear();
        destroyed
    }
}

struct OutputSlot {
    memory: Arc<BufferMemory>,
    state: SlotState,
}

/// What `OutputPool::complete` found in the returned buffer.
#[derive(Debug)]
pub enum OutputCompletion {
    /// The slot now belongs to the presentation path.
    Picture {
        memory: Arc<BufferMemory>,
        generation: u64,
    },
    /// Zero bytes: the end of stream marker. The slot is `Free` again.
    Empty,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// Back with the driver.
    Requeued,
    /// `Free`, waiting for a reconfiguration or shutdown to finish.
    Freed,
    /// The slot belonged to an older generation and was destroyed.
    Destroyed,
}

/// Summary of a pool teardown.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RetiredSlots {
    pub destroyed: usize,
    /// Slots owned by the sink, destroyed when released.
    pub deferred: usize,
}

/// Table of decoded-picture buffers, rebuilt on every reconfiguration.
///
/// Every slot is tagged with the generation of the build that created it. Slots still shown by
/// the sink when the table is torn down are parked in `retired` until their release comes in.
#[derive(Default)]
pub struct OutputPool {
    generation: u64,
    slots: Vec<OutputSlot>,
    retired: BTreeMap<(u64, usize), Arc<BufferMemory>>,
}

impl OutputPool {
    /// Replaces the (already retired) table with fresh `Free` slots of `generation`.
    pub fn rebuild(&mut self, generation: u64, memories: Vec<Arc<BufferMemory>>) -> RetiredSlots {
        let retired = self.retire();
        self.generation = generation;
        self.slots = memories
            .into_iter()
            .map(|memory| OutputSlot {
                memory,
                state: SlotState::Free,
            })
            .collect();
        retired
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Slots of the current generation. Parked slots are not counted.
    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.retired.len()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|s| s.state)
    }

    pub fn count_in(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == SlotState::Free)
    }

    /// Hands a `Free` slot to the driver to be filled.
    pub fn submit(&mut self, driver: &dyn DecoderDriver, index: usize) -> DecoderResult<()> {
        let slot = match self.slots.get_mut(index) {
            Some(slot) if slot.state == SlotState::Free => slot,
            slot => {
                return Err(invalid_slot(
                    Direction::Output,
                    index,
                    slot.map(|s| s.state),
                ))
            }
        };
        driver.submit_output(index, &slot.memory)?;
        slot.state = SlotState::Queued;
        Ok(())
    }

    /// Queues every `Free` slot. Returns how many were queued.
    pub fn submit_all_free(&mut self, driver: &dyn DecoderDriver) -> DecoderResult<usize> {
        let mut queued = 0;
        while let Some(index) = self.find_free() {
            self.submit(driver, index)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// The driver returned slot `index` holding `bytes_used` bytes.
    pub fn complete(&mut self, index: usize, bytes_used: usize) -> DecoderResult<OutputCompletion> {
        let generation = self.generation;
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            DecoderError::ProtocolViolation(format!(
                "driver returned unknown output slot {}",
                index
            ))
        })?;
        if slot.state != SlotState::Queued {
            return Err(DecoderError::ProtocolViolation(format!(
                "output slot {} completed while {:?}",
                index, slot.state
            )));
        }
        if bytes_used == 0 {
            slot.state = SlotState::Free;
            return Ok(OutputCompletion::Empty);
        }
        slot.state = SlotState::Presenting;
        Ok(OutputCompletion::Picture {
            memory: Arc::clone(&slot.memory),
            generation,
        })
    }

    /// The sink is done with slot `index` of `generation`.
    ///
    /// A slot from a retired generation is destroyed and never goes back to the driver. A
    /// current one becomes `Free` and, if `resubmit` is set, is queued again right away along
    /// with any other `Free` slot left behind by an earlier failed requeue.
    pub fn recycle(
        &mut self,
        driver: &dyn DecoderDriver,
        index: usize,
        generation: u64,
        resubmit: bool,
    ) -> DecoderResult<RecycleOutcome> {
        if self.retired.remove(&(generation, index)).is_some() {
            return Ok(RecycleOutcome::Destroyed);
        }
        if generation != self.generation {
            return Err(invalid_slot(Direction::Output, index, None));
        }
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| invalid_slot(Direction::Output, index, None))?;
        if slot.state != SlotState::Presenting {
            return Err(invalid_slot(Direction::Output, index, Some(slot.state)));
        }
        slot.state = SlotState::Free;
        if resubmit {
            self.submit_all_free(driver)?;
            Ok(RecycleOutcome::Requeued)
        } else {
            Ok(RecycleOutcome::Freed)
        }
    }

    /// Empties the current table: `Free` and `Queued` slots are destroyed now, `Presenting` ones
    /// are parked until released. The output queue must be stopped first so the hardware no
    /// longer writes to any `Queued` slot.
    pub fn retire(&mut self) -> RetiredSlots {
        let mut summary = RetiredSlots::default();
        for (index, slot) in self.slots.drain(..).enumerate() {
            if slot.state == SlotState::Presenting {
                self.retired.insert((self.generation, index), slot.memory);
                summary.deferred += 1;
            } else {
                summary.destroyed += 1;
            }
        }
        summary
    }

    /// Shutdown variant of `retire`. Idempotent.
    pub fn teardown(&mut self) -> RetiredSlots {
        self.retire()
    }
}
