// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Read;
use std::ops::Range;

use super::AccessUnit;
use super::DemuxError;
use super::DemuxResult;
use super::Demuxer;
use crate::format::Codec;
use crate::format::Resolution;
use crate::format::Timestamp;
use crate::format::MICROS_PER_SECOND;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct NalInfo {
    is_vcl: bool,
    /// First slice of a picture.
    first_slice: bool,
    is_sync: bool,
    /// Non-VCL unit that can only precede the first slice of a picture.
    opens_access_unit: bool,
}

fn h264_nal_info(nal: &[u8]) -> NalInfo {
    let nal_type = nal[0] & 0x1f;
    let is_vcl = (1..=5).contains(&nal_type);
    NalInfo {
        is_vcl,
        // first_mb_in_slice is ue(v) coded; a leading 1 bit means zero.
        first_slice: is_vcl && nal.get(1).map_or(false, |b| b & 0x80 != 0),
        is_sync: nal_type == 5,
        opens_access_unit: matches!(nal_type, 6..=9 | 14..=18),
    }
}

fn hevc_nal_info(nal: &[u8]) -> NalInfo {
    let nal_type = (nal[0] >> 1) & 0x3f;
    let is_vcl = nal_type < 32;
    NalInfo {
        is_vcl,
        first_slice: is_vcl && nal.get(2).map_or(false, |b| b & 0x80 != 0),
        is_sync: (16..=21).contains(&nal_type),
        opens_access_unit: matches!(nal_type, 32..=35 | 39 | 41..=44 | 48..=55),
    }
}

/// Byte ranges of every NAL unit in `data`, each including its start code. Bytes before the
/// first start code are dropped.
fn split_nal_units(data: &[u8]) -> Vec<(Range<usize>, usize)> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let prefix_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push((prefix_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(n, &(start, header))| {
            let end = starts.get(n + 1).map_or(data.len(), |&(next, _)| next);
            (start..end, header)
        })
        .filter(|(range, header)| *header < range.end)
        .collect()
}

/// Demuxer for raw H.264 or HEVC byte streams.
///
/// Elementary streams carry no timing: every access unit gets a duration from the nominal frame
/// rate and no timestamps.
pub struct AnnexBDemuxer {
    codec: Codec,
    resolution: Resolution,
    frame_duration: Timestamp,
    data: Vec<u8>,
    nal_units: Vec<(Range<usize>, usize)>,
    next_nal: usize,
}

impl AnnexBDemuxer {
    pub fn new<R: Read>(
        mut reader: R,
        codec: Codec,
        resolution: Resolution,
        frame_rate: u32,
    ) -> DemuxResult<Self> {
        if !matches!(codec, Codec::H264 | Codec::Hevc) {
            return Err(DemuxError::UnsupportedCodec(codec));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let nal_units = split_nal_units(&data);
        Ok(AnnexBDemuxer {
            codec,
            resolution,
            frame_duration: MICROS_PER_SECOND / frame_rate.max(1) as Timestamp,
            data,
            nal_units,
            next_nal: 0,
        })
    }

    fn nal_info(&self, index: usize) -> NalInfo {
        let (range, header) = &self.nal_units[index];
        let nal = &self.data[*header..range.end];
        match self.codec {
            Codec::Hevc => hevc_nal_info(nal),
            _ => h264_nal_info(nal),
        }
    }
}

impl Demuxer for AnnexBDemuxer {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn next_access_unit(&mut self) -> DemuxResult<Option<AccessUnit>> {
        let first = self.next_nal;
        if first >= self.nal_units.len() {
            return Ok(None);
        }
        let mut has_vcl = false;
        let mut is_sync = false;
        let mut end = first;
        while end < self.nal_units.len() {
            let info = self.nal_info(end);
            if has_vcl && ((info.is_vcl && info.first_slice) || info.opens_access_unit) {
                break;
            }
            has_vcl |= info.is_vcl;
            is_sync |= info.is_sync;
            end += 1;
        }
        self.next_nal = end;

        let start = self.nal_units[first].0.start;
        let stop = self.nal_units[end - 1].0.end;
        Ok(Some(AccessUnit {
            data: self.data[start..stop].to_vec(),
            pts: None,
            dts: None,
            duration: Some(self.frame_duration),
            is_sync,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xce];
    const IDR: &[u8] = &[0, 0, 1, 0x65, 0x88, 0x84];
    const IDR_SECOND_SLICE: &[u8] = &[0, 0, 1, 0x65, 0x40, 0x84];
    const P_SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02];

    fn demuxer(codec: Codec, parts: &[&[u8]]) -> AnnexBDemuxer {
        let data = parts.concat();
        AnnexBDemuxer::new(Cursor::new(data), codec, Resolution::new(320, 240), 25).unwrap()
    }

    #[test]
    fn splits_h264_at_picture_boundaries() {
        let mut demuxer = demuxer(
            Codec::H264,
            &[SPS, PPS, IDR, IDR_SECOND_SLICE, P_SLICE, P_SLICE],
        );

        let first = demuxer.next_access_unit().unwrap().unwrap();
        assert_eq!(first.data, [SPS, PPS, IDR, IDR_SECOND_SLICE].concat());
        assert!(first.is_sync);
        assert_eq!(first.pts, None);
        assert_eq!(first.dts, None);
        assert_eq!(first.duration, Some(40_000));

        let second = demuxer.next_access_unit().unwrap().unwrap();
        assert_eq!(second.data, P_SLICE);
        assert!(!second.is_sync);
        assert!(demuxer.next_access_unit().unwrap().is_some());
        assert!(demuxer.next_access_unit().unwrap().is_none());
    }

    #[test]
    fn parameter_sets_open_a_new_access_unit() {
        let mut demuxer = demuxer(Codec::H264, &[IDR, SPS, PPS, IDR]);
        assert_eq!(demuxer.next_access_unit().unwrap().unwrap().data, IDR);
        assert_eq!(
            demuxer.next_access_unit().unwrap().unwrap().data,
            [SPS, PPS, IDR].concat()
        );
    }

    #[test]
    fn splits_hevc() {
        let vps: &[u8] = &[0, 0, 0, 1, 0x40, 0x01, 0x0c];
        let idr: &[u8] = &[0, 0, 1, 0x26, 0x01, 0xaf];
        let trail: &[u8] = &[0, 0, 1, 0x02, 0x01, 0xd0];
        let mut demuxer = demuxer(Codec::Hevc, &[vps, idr, trail]);
        let first = demuxer.next_access_unit().unwrap().unwrap();
        assert_eq!(first.data, [vps, idr].concat());
        assert!(first.is_sync);
        let second = demuxer.next_access_unit().unwrap().unwrap();
        assert_eq!(second.data, trail);
        assert!(!second.is_sync);
    }

    #[test]
    fn leading_garbage_and_empty_streams() {
        let mut demuxer = demuxer(Codec::H264, &[&[0xff, 0xfe], P_SLICE]);
        assert_eq!(demuxer.next_access_unit().unwrap().unwrap().data, P_SLICE);
        assert!(demuxer.next_access_unit().unwrap().is_none());

        let mut empty = demuxer_from(&[]);
        assert!(empty.next_access_unit().unwrap().is_none());
    }

    fn demuxer_from(data: &[u8]) -> AnnexBDemuxer {
        AnnexBDemuxer::new(Cursor::new(data.to_vec()), Codec::Hevc, Resolution::new(1, 1), 0)
            .unwrap()
    }

    #[test]
    fn rejects_other_codecs() {
        assert!(matches!(
            AnnexBDemuxer::new(Cursor::new(Vec::new()), Codec::Vp8, Resolution::new(1, 1), 30),
            Err(DemuxError::UnsupportedCodec(Codec::Vp8))
        ));
    }
}
