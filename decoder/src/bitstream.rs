// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Preparation of access units before they are copied into input buffers.
//!
//! VC-1 hardware expects encapsulated bitstream decodable units (EBDUs): a sequence header BDU
//! ahead of the first frame, and a frame start code on every frame when the container stripped
//! them. Every other codec passes through untouched.

use base::warn;

use crate::format::Codec;

pub const BDU_TYPE_FRAME: u8 = 0x0d;
pub const BDU_TYPE_SEQUENCE_HEADER: u8 = 0x0f;

const ANNEX_L_SEQUENCE_LAYER_LEN: usize = 36;
const ANNEX_L_MARKER: u8 = 0xc5;

/// Appends `src` to `dst`, inserting an emulation prevention byte wherever two zero bytes are
/// followed by a byte no greater than 0x03.
pub fn rbdu_escape(dst: &mut Vec<u8>, src: &[u8]) {
    let mut zeros = 0;
    for &byte in src {
        if zeros == 2 && byte <= 0x03 {
            dst.push(0x03);
            zeros = 0;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        dst.push(byte);
    }
}

/// Appends `payload` as an EBDU of type `bdu_type`: start code, escaped payload, flushing byte.
pub fn write_bdu(dst: &mut Vec<u8>, bdu_type: u8, payload: &[u8]) {
    dst.extend_from_slice(&[0x00, 0x00, 0x01, bdu_type]);
    rbdu_escape(dst, payload);
    dst.push(0x80);
}

/// Offset of the first `00 00 01` start code with at least one byte following the BDU type.
pub fn find_start_code(data: &[u8]) -> Option<usize> {
    let limit = data.len().saturating_sub(4);
    (0..limit).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// Builds the sequence header carried by the VC-1 codec private data, if any.
pub fn vc1_sequence_header(extradata: &[u8]) -> Option<Vec<u8>> {
    match extradata.len() {
        0 => None,
        // Simple/Main profile ASF header.
        4 | 5 => {
            let mut header = Vec::with_capacity(extradata.len() * 2 + 5);
            write_bdu(&mut header, BDU_TYPE_SEQUENCE_HEADER, extradata);
            Some(header)
        }
        ANNEX_L_SEQUENCE_LAYER_LEN if extradata[3] == ANNEX_L_MARKER => Some(extradata.to_vec()),
        _ => match find_start_code(extradata) {
            Some(offset) => Some(extradata[offset..].to_vec()),
            None => {
                warn!("cannot parse {} bytes of VC-1 codec data", extradata.len());
                None
            }
        },
    }
}

/// Turns demuxed access units into the byte stream the hardware expects.
pub struct StreamPreparer {
    codec: Codec,
    extradata: Vec<u8>,
    need_header: bool,
    insert_start_code: bool,
}

impl StreamPreparer {
    pub fn new(codec: Codec, extradata: &[u8]) -> StreamPreparer {
        StreamPreparer {
            codec,
            extradata: extradata.to_vec(),
            need_header: true,
            insert_start_code: false,
        }
    }

    /// Returns the bytes to submit for `data`.
    pub fn prepare(&mut self, data: &[u8]) -> Vec<u8> {
        if self.codec != Codec::Vc1AnnexG {
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len() + self.extradata.len() + 16);
        if self.need_header {
            if let Some(header) = vc1_sequence_header(&self.extradata) {
                out.extend_from_slice(&header);
            }
            let head = &data[..data.len().min(10)];
            self.insert_start_code = find_start_code(head).is_none();
            self.need_header = false;
        }
        if self.insert_start_code {
            write_bdu(&mut out, BDU_TYPE_FRAME, data);
        } else {
            out.extend_from_slice(data);
        }
        out
    }
}
