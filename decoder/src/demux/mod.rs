// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sources of compressed access units.

mod annexb;
mod ivf;

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;

use base::info;
use remain::sorted;
use thiserror::Error as ThisError;

pub use self::annexb::AnnexBDemuxer;
pub use self::ivf::IvfDemuxer;
use crate::format::AspectRatio;
use crate::format::Codec;
use crate::format::Resolution;
use crate::format::Timestamp;

#[sorted]
#[derive(Debug, ThisError)]
pub enum DemuxError {
    /// Nothing available yet; try again.
    #[error("no access unit available yet")]
    Again,
    #[error("invalid stream header: {0}")]
    InvalidHeader(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("stream truncated in the middle of an access unit")]
    Truncated,
    #[error("unrecognized stream format: {0}")]
    UnknownFormat(String),
    #[error("codec {0} cannot be carried by this stream format")]
    UnsupportedCodec(Codec),
}

pub type DemuxResult<T> = std::result::Result<T, DemuxError>;

/// One compressed picture with its container timing, in microseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
    pub duration: Option<Timestamp>,
    pub is_sync: bool,
}

pub trait Demuxer: Send {
    fn codec(&self) -> Codec;

    /// Coded size announced by the container.
    fn resolution(&self) -> Resolution;

    /// Advisory, for display only.
    fn aspect_ratio(&self) -> Option<AspectRatio> {
        None
    }

    /// Timestamp of the first access unit, subtracted from every presentation timestamp.
    fn stream_start_offset(&self) -> Timestamp {
        0
    }

    /// Codec private data from the container.
    fn codec_extradata(&self) -> &[u8] {
        &[]
    }

    /// Returns the next access unit in decode order, or `None` at the end of the stream.
    fn next_access_unit(&mut self) -> DemuxResult<Option<AccessUnit>>;
}

/// Options for opening a stream whose container does not describe it fully.
#[derive(Copy, Clone, Debug, Default)]
pub struct StreamHints {
    pub codec: Option<Codec>,
    pub resolution: Option<Resolution>,
    /// Frames per second used when the stream carries no timing.
    pub frame_rate: Option<u32>,
}

const DEFAULT_FRAME_RATE: u32 = 30;
const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 1920,
    height: 1080,
};

/// Opens `path`, picking the demuxer from the file's magic bytes or its extension.
pub fn open_demuxer(path: &Path, hints: StreamHints) -> DemuxResult<Box<dyn Demuxer>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    let magic_len = read_up_to(&mut reader, &mut magic)?;
    let reader = io::Cursor::new(magic[..magic_len].to_vec()).chain(reader);

    if magic_len == 4 && magic == ivf::IVF_MAGIC {
        let demuxer = IvfDemuxer::new(reader)?;
        if let Some(codec) = hints.codec.filter(|&c| c != demuxer.codec()) {
            return Err(DemuxError::UnsupportedCodec(codec));
        }
        return Ok(Box::new(demuxer));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let codec = match (hints.codec, extension.as_str()) {
        (Some(codec), _) => codec,
        (None, "h264" | "264" | "avc" | "jsv") => Codec::H264,
        (None, "h265" | "265" | "hevc") => Codec::Hevc,
        _ => return Err(DemuxError::UnknownFormat(path.display().to_string())),
    };
    let resolution = hints.resolution.unwrap_or_else(|| {
        info!("no stream size given, assuming {}", DEFAULT_RESOLUTION);
        DEFAULT_RESOLUTION
    });
    let demuxer = AnnexBDemuxer::new(
        reader,
        codec,
        resolution,
        hints.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
    )?;
    Ok(Box::new(demuxer))
}

/// Reads until `buf` is full or the reader is exhausted.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    fn write_temp(suffix: &str, data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn picks_ivf_from_magic() {
        let data = ivf::tests::ivf_stream(b"VP80", &[(0, &[0x10, 0x02])]);
        let file = write_temp(".bin", &data);
        let mut demuxer = open_demuxer(file.path(), StreamHints::default()).unwrap();
        assert_eq!(demuxer.codec(), Codec::Vp8);
        assert!(demuxer.next_access_unit().unwrap().is_some());
    }

    #[test]
    fn ivf_codec_mismatch_is_rejected() {
        let data = ivf::tests::ivf_stream(b"VP90", &[]);
        let file = write_temp(".ivf", &data);
        let hints = StreamHints {
            codec: Some(Codec::Vp8),
            ..Default::default()
        };
        assert!(matches!(
            open_demuxer(file.path(), hints),
            Err(DemuxError::UnsupportedCodec(Codec::Vp8))
        ));
    }

    #[test]
    fn picks_annexb_from_extension() {
        let file = write_temp(".h264", &[0, 0, 0, 1, 0x65, 0x88, 0x80]);
        let demuxer = open_demuxer(file.path(), StreamHints::default()).unwrap();
        assert_eq!(demuxer.codec(), Codec::H264);
        assert_eq!(demuxer.resolution(), DEFAULT_RESOLUTION);
    }

    #[test]
    fn unknown_extension_needs_codec() {
        let file = write_temp(".raw", &[0, 0, 1, 0x40, 0x01]);
        assert!(matches!(
            open_demuxer(file.path(), StreamHints::default()),
            Err(DemuxError::UnknownFormat(_))
        ));
        let hints = StreamHints {
            codec: Some(Codec::Hevc),
            resolution: Some(Resolution::new(640, 360)),
            frame_rate: Some(25),
        };
        let demuxer = open_demuxer(file.path(), hints).unwrap();
        assert_eq!(demuxer.resolution(), Resolution::new(640, 360));
    }
}
