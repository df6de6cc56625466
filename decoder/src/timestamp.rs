// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pairing of decoded pictures with the timing of the access units that produced them.
//!
//! The hardware may return pictures in presentation order while units were submitted in decode
//! order, and it does not always carry the timestamp through. Every submitted unit leaves a
//! record here; each decoded picture consumes exactly one.

use std::collections::VecDeque;

use crate::format::Timestamp;

/// Identifies one inserted record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordHandle(u64);

/// Timing of one submitted access unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampRecord {
    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
    pub duration: Option<Timestamp>,
    /// Start time of the stream, subtracted from resolved timestamps.
    pub stream_base_offset: Timestamp,
    pub is_sync: bool,
    handle: RecordHandle,
}

impl TimestampRecord {
    pub fn handle(&self) -> RecordHandle {
        self.handle
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentationTime {
    Known(Timestamp),
    /// Nothing to pair the picture with. Shown anyway.
    Unknown,
}

/// Result of `PendingTimestampTracker::resolve_for_output`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub time: PresentationTime,
    /// The record consumed by this resolution.
    pub record: Option<TimestampRecord>,
}

#[derive(Default)]
pub struct PendingTimestampTracker {
    records: VecDeque<TimestampRecord>,
    next_handle: u64,
    last_presentation_ts: Option<Timestamp>,
    decode_to_presentation_delta: Option<Timestamp>,
}

impl PendingTimestampTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the timing of a unit about to be submitted. Insertion order is decode order.
    ///
    /// A key unit carrying both timestamps also sets the pts/dts delta applied to pictures the
    /// hardware returns without a timestamp.
    pub fn insert(
        &mut self,
        pts: Option<Timestamp>,
        dts: Option<Timestamp>,
        duration: Option<Timestamp>,
        stream_base_offset: Timestamp,
        is_sync: bool,
    ) -> RecordHandle {
        let handle = RecordHandle(self.next_handle);
        self.next_handle += 1;
        if is_sync {
            if let (Some(pts), Some(dts)) = (pts, dts) {
                self.decode_to_presentation_delta = Some(pts - dts);
            }
        }
        self.records.push_back(TimestampRecord {
            pts,
            dts,
            duration,
            stream_base_offset,
            is_sync,
            handle,
        });
        handle
    }

    /// Drops a record whose unit never reached the hardware.
    pub fn remove(&mut self, handle: RecordHandle) -> Option<TimestampRecord> {
        let pos = self.records.iter().position(|r| r.handle == handle)?;
        self.records.remove(pos)
    }

    /// Index of the record the next picture is paired with: the smallest known dts, the
    /// earliest inserted on ties, or the oldest record when no dts is known at all.
    fn select(&self) -> Option<usize> {
        let mut best: Option<(usize, Timestamp)> = None;
        for (pos, dts) in self
            .records
            .iter()
            .enumerate()
            .filter_map(|(pos, r)| r.dts.map(|dts| (pos, dts)))
        {
            if best.map_or(true, |(_, min)| dts < min) {
                best = Some((pos, dts));
            }
        }
        match best {
            Some((pos, _)) => Some(pos),
            None if self.records.is_empty() => None,
            None => Some(0),
        }
    }

    /// Computes the presentation timestamp of the next decoded picture and consumes the record
    /// it is paired with.
    ///
    /// `observed` is the timestamp the hardware carried through, if any; it wins over any
    /// estimate. Otherwise the selected record's dts (shifted by the latest key-frame pts/dts
    /// delta) is used, and without any dts the previous timestamp advanced by the record's
    /// duration.
    pub fn resolve_for_output(&mut self, observed: Option<Timestamp>) -> ResolvedTimestamp {
        let record = match self.select().and_then(|pos| self.records.remove(pos)) {
            Some(record) => record,
            None => {
                if observed.is_some() {
                    self.last_presentation_ts = observed;
                }
                return ResolvedTimestamp {
                    time: observed.map_or(PresentationTime::Unknown, PresentationTime::Known),
                    record: None,
                };
            }
        };

        let value = match (observed, record.dts) {
            (Some(pts), _) => pts,
            (None, Some(dts)) => dts + self.decode_to_presentation_delta.unwrap_or(0),
            (None, None) => match self.last_presentation_ts {
                Some(last) => last + record.duration.unwrap_or(0).max(0),
                None => 0,
            },
        };
        self.last_presentation_ts = Some(value);

        ResolvedTimestamp {
            time: PresentationTime::Known(value - record.stream_base_offset),
            record: Some(record),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Discards records that were never paired. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }

    pub fn last_presentation_ts(&self) -> Option<Timestamp> {
        self.last_presentation_ts
    }

    pub fn decode_to_presentation_delta(&self) -> Option<Timestamp> {
        self.decode_to_presentation_delta
    }
}
