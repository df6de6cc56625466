// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Read;

use super::read_up_to;
use super::AccessUnit;
use super::DemuxError;
use super::DemuxResult;
use super::Demuxer;
use crate::format::Codec;
use crate::format::Resolution;
use crate::format::Timestamp;
use crate::format::MICROS_PER_SECOND;

pub(super) const IVF_MAGIC: [u8; 4] = *b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;
/// Upper bound on what a frame header may make us allocate before its payload is read.
const MAX_FRAME_PREALLOC: usize = 1 << 20;

fn le16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Demuxer for the IVF container used by VP8 and VP9 elementary streams.
///
/// IVF only carries presentation timestamps; VPx streams are never reordered, so the decode
/// timestamp is the same value.
pub struct IvfDemuxer<R> {
    reader: R,
    codec: Codec,
    resolution: Resolution,
    /// Timebase as `numerator / denominator` seconds.
    timebase_num: u32,
    timebase_den: u32,
    start_offset: Option<Timestamp>,
    last_pts: Option<Timestamp>,
}

impl<R: Read> IvfDemuxer<R> {
    pub fn new(mut reader: R) -> DemuxResult<Self> {
        let mut header = [0u8; FILE_HEADER_LEN];
        if read_up_to(&mut reader, &mut header)? != FILE_HEADER_LEN {
            return Err(DemuxError::InvalidHeader("short IVF file header".into()));
        }
        if header[0..4] != IVF_MAGIC {
            return Err(DemuxError::InvalidHeader("missing DKIF signature".into()));
        }
        let header_len = le16(&header[6..8]) as usize;
        let fourcc = le32(&header[8..12]);
        let codec = match Codec::from_fourcc(fourcc) {
            Some(codec @ (Codec::Vp8 | Codec::Vp9)) => codec,
            _ => {
                return Err(DemuxError::InvalidHeader(format!(
                    "unsupported IVF fourcc {:?}",
                    String::from_utf8_lossy(&header[8..12])
                )))
            }
        };
        let resolution = Resolution::new(
            le16(&header[12..14]) as u32,
            le16(&header[14..16]) as u32,
        );
        let timebase_den = le32(&header[16..20]);
        let timebase_num = le32(&header[20..24]);
        if timebase_den == 0 || timebase_num == 0 {
            return Err(DemuxError::InvalidHeader("zero IVF timebase".into()));
        }
        // Skip any header extension.
        if header_len > FILE_HEADER_LEN {
            let mut extra = vec![0u8; header_len - FILE_HEADER_LEN];
            if read_up_to(&mut reader, &mut extra)? != extra.len() {
                return Err(DemuxError::Truncated);
            }
        }
        Ok(IvfDemuxer {
            reader,
            codec,
            resolution,
            timebase_num,
            timebase_den,
            start_offset: None,
            last_pts: None,
        })
    }

    fn to_micros(&self, ticks: u64) -> Timestamp {
        let micros = ticks as i128 * self.timebase_num as i128 * MICROS_PER_SECOND as i128
            / self.timebase_den as i128;
        micros.clamp(Timestamp::MIN as i128, Timestamp::MAX as i128) as Timestamp
    }

    fn is_key_frame(&self, data: &[u8]) -> bool {
        match (self.codec, data.first()) {
            (Codec::Vp8, Some(byte)) => byte & 0x01 == 0,
            (Codec::Vp9, Some(&byte)) => vp9_is_key_frame(byte),
            _ => false,
        }
    }
}

/// Reads the uncompressed header bits up to `frame_type` (MSB first).
fn vp9_is_key_frame(byte: u8) -> bool {
    let bit = |n: u32| (byte >> (7 - n)) & 1;
    if bit(0) != 1 || bit(1) != 0 {
        return false;
    }
    let profile = bit(2) | (bit(3) << 1);
    let mut pos = 4;
    if profile == 3 {
        pos += 1;
    }
    // show_existing_frame
    if bit(pos) == 1 {
        return false;
    }
    bit(pos + 1) == 0
}

impl<R: Read + Send> Demuxer for IvfDemuxer<R> {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn stream_start_offset(&self) -> Timestamp {
        self.start_offset.unwrap_or(0)
    }

    fn next_access_unit(&mut self) -> DemuxResult<Option<AccessUnit>> {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        match read_up_to(&mut self.reader, &mut frame_header)? {
            0 => return Ok(None),
            FRAME_HEADER_LEN => (),
            _ => return Err(DemuxError::Truncated),
        }
        let size = le32(&frame_header[0..4]) as usize;
        let ticks = u64::from_le_bytes([
            frame_header[4],
            frame_header[5],
            frame_header[6],
            frame_header[7],
            frame_header[8],
            frame_header[9],
            frame_header[10],
            frame_header[11],
        ]);
        // The size comes from the file; only grow the buffer as bytes actually arrive.
        let mut data = Vec::with_capacity(size.min(MAX_FRAME_PREALLOC));
        (&mut self.reader)
            .take(size as u64)
            .read_to_end(&mut data)?;
        if data.len() != size {
            return Err(DemuxError::Truncated);
        }

        let pts = self.to_micros(ticks);
        self.start_offset.get_or_insert(pts);
        let duration = self.last_pts.map(|last| (pts - last).max(0));
        self.last_pts = Some(pts);
        Ok(Some(AccessUnit {
            is_sync: self.is_key_frame(&data),
            data,
            pts: Some(pts),
            dts: Some(pts),
            duration,
        }))
    }
}
