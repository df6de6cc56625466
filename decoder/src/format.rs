// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data structures describing the compressed stream and the decoded pictures.

use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use enumn::N;
use serde::Deserialize;
use serde::Serialize;

/// Presentation or decode time in microseconds, the timebase of the driver's buffer timestamps.
pub type Timestamp = i64;

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Packs a four character code the way the driver expects it.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Compressed formats the hardware decoder accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N, Serialize, Deserialize)]
#[repr(u32)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H263 = fourcc(b"H263"),
    H264 = fourcc(b"H264"),
    Hevc = fourcc(b"HEVC"),
    Mpeg2 = fourcc(b"MPG2"),
    Mpeg4 = fourcc(b"MPG4"),
    Divx311 = fourcc(b"DIV3"),
    #[serde(rename = "vc1")]
    Vc1AnnexG = fourcc(b"VC1G"),
    Vp8 = fourcc(b"VP80"),
    Vp9 = fourcc(b"VP90"),
}

impl Codec {
    pub fn fourcc(self) -> u32 {
        self as u32
    }

    pub fn from_fourcc(fourcc: u32) -> Option<Codec> {
        Codec::n(fourcc)
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::H263 => "h263",
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Mpeg2 => "mpeg2",
            Codec::Mpeg4 => "mpeg4",
            Codec::Divx311 => "divx311",
            Codec::Vc1AnnexG => "vc1",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h263" => Ok(Codec::H263),
            "h264" | "avc" => Ok(Codec::H264),
            "hevc" | "h265" => Ok(Codec::Hevc),
            "mpeg2" => Ok(Codec::Mpeg2),
            "mpeg4" => Ok(Codec::Mpeg4),
            "divx311" | "divx3" => Ok(Codec::Divx311),
            "vc1" | "wmv3" => Ok(Codec::Vc1AnnexG),
            "vp8" => Ok(Codec::Vp8),
            "vp9" => Ok(Codec::Vp9),
            _ => Err(format!("unsupported codec \"{}\"", s)),
        }
    }
}

/// Decoded picture layouts. The hardware only produces NV12.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
#[repr(u32)]
pub enum PixelFormat {
    Nv12 = fourcc(b"NV12"),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got \"{}\"", s))?;
        let width = w.parse().map_err(|_| format!("invalid width \"{}\"", w))?;
        let height = h.parse().map_err(|_| format!("invalid height \"{}\"", h))?;
        if width == 0 || height == 0 {
            return Err(format!("empty resolution \"{}\"", s));
        }
        Ok(Resolution { width, height })
    }
}

/// Picture aspect ratio. Advisory, only forwarded to the presentation sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AspectRatio {
    pub num: u32,
    pub den: u32,
}

fn align(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Layout negotiated for the compressed input queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InputFormat {
    pub codec: Codec,
    pub resolution: Resolution,
    pub buffer_size: usize,
}

/// Layout negotiated for the decoded picture queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    /// Bytes per luma row.
    pub stride: u32,
    /// Rows of the luma plane, including alignment padding.
    pub plane_height: u32,
    pub buffer_size: usize,
}

impl OutputFormat {
    /// NV12 layout with the 16-aligned pitch and plane height the hardware produces.
    pub fn nv12(resolution: Resolution) -> OutputFormat {
        let stride = align(resolution.width, 16);
        let plane_height = align(resolution.height, 16);
        OutputFormat {
            pixel_format: PixelFormat::Nv12,
            resolution,
            stride,
            plane_height,
            buffer_size: stride as usize * plane_height as usize * 3 / 2,
        }
    }

    /// Offset of the interleaved chroma plane.
    pub fn chroma_offset(&self) -> usize {
        self.stride as usize * self.plane_height as usize
    }
}
