// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use argh::FromArgs;
use decoder::backend::emulated::ResolutionChange;
use decoder::format::Codec;
use decoder::format::Resolution;

#[derive(FromArgs, Debug, Default)]
/// Decode a compressed video stream with a stateful hardware decoder.
pub struct Command {
    #[argh(option, short = 'm', arg_name = "DRIVER")]
    /// decoder driver to use. Only "emulated" is built in
    pub device: Option<String>,

    #[argh(switch, short = 'c')]
    /// set the "continue data transfer" flag
    pub continue_data_transfer: bool,

    #[argh(switch, short = 'd')]
    /// output frames in decode order
    pub decode_order: bool,

    #[argh(switch, short = 'f')]
    /// start in fullscreen
    pub fullscreen: bool,

    #[argh(switch, short = 'i')]
    /// skip frames. Accepted for compatibility, has no effect
    pub skip_frames: bool,

    #[argh(switch, short = 'p')]
    /// start paused
    pub paused: bool,

    #[argh(switch, short = 's')]
    /// secure mode
    pub secure: bool,

    #[argh(switch, short = 'v')]
    /// increase debug verbosity
    pub verbose: bool,

    #[argh(switch, short = 'q')]
    /// only log errors
    pub quiet: bool,

    #[argh(option, arg_name = "CODEC")]
    /// codec of a raw elementary stream (h264, hevc, ...)
    pub codec: Option<Codec>,

    #[argh(option, arg_name = "WxH")]
    /// coded size of a raw elementary stream
    pub size: Option<Resolution>,

    #[argh(option, arg_name = "FPS")]
    /// frame rate used to time streams without timestamps
    pub fps: Option<u32>,

    #[argh(option, arg_name = "N")]
    /// number of compressed input buffers
    pub input_buffers: Option<usize>,

    #[argh(option, arg_name = "N")]
    /// number of decoded picture buffers to ask for
    pub extra_output_buffers: Option<usize>,

    #[argh(option, arg_name = "DIR")]
    /// write every decoded picture to DIR as NV12
    pub save_frames: Option<PathBuf>,

    #[argh(switch)]
    /// read playback commands (q, p, s, f) from stdin
    pub interactive: bool,

    #[argh(option, arg_name = "N")]
    /// pictures the emulated decoder holds back for reordering
    pub emulate_reorder: Option<usize>,

    #[argh(
        option,
        arg_name = "FRAME:WxH",
        from_str_fn(parse_resolution_change)
    )]
    /// make the emulated decoder switch resolution at picture FRAME. May be repeated
    pub emulate_resize: Vec<ResolutionChange>,

    #[argh(switch)]
    /// make the emulated decoder report pictures without timestamps
    pub emulate_drop_timestamps: bool,

    #[argh(option, arg_name = "FILTER")]
    /// log filter, e.g. "debug" or "warn,decoder::worker=trace"
    pub log_level: Option<String>,

    #[argh(option, arg_name = "FILE")]
    /// JSON file with default values for these options
    pub cfg: Option<PathBuf>,

    #[argh(positional, arg_name = "INPUT")]
    /// compressed stream to decode (IVF, H.264 or HEVC Annex B)
    pub input: Option<PathBuf>,
}

fn parse_resolution_change(s: &str) -> Result<ResolutionChange, String> {
    let (frame, size) = s
        .split_once(':')
        .ok_or_else(|| format!("expected FRAME:WxH, got \"{}\"", s))?;
    let at_frame = frame
        .parse()
        .map_err(|_| format!("invalid frame number \"{}\"", frame))?;
    Ok(ResolutionChange {
        at_frame,
        resolution: size.parse()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, argh::EarlyExit> {
        Command::from_args(&["vdec"], args)
    }

    #[test]
    fn short_switches() {
        let cmd = parse(&["-c", "-d", "-p", "-s", "-m", "emulated", "clip.ivf"]).unwrap();
        assert!(cmd.continue_data_transfer);
        assert!(cmd.decode_order);
        assert!(cmd.paused);
        assert!(cmd.secure);
        assert!(!cmd.fullscreen);
        assert_eq!(cmd.device.as_deref(), Some("emulated"));
        assert_eq!(cmd.input, Some(PathBuf::from("clip.ivf")));
    }

    #[test]
    fn stream_hints() {
        let cmd = parse(&["--codec", "hevc", "--size", "1280x720", "--fps", "60", "a.bin"]).unwrap();
        assert_eq!(cmd.codec, Some(Codec::Hevc));
        assert_eq!(cmd.size, Some(Resolution::new(1280, 720)));
        assert_eq!(cmd.fps, Some(60));
    }

    #[test]
    fn repeated_resize() {
        let cmd = parse(&[
            "--emulate-resize",
            "10:640x480",
            "--emulate-resize",
            "20:1920x1080",
        ])
        .unwrap();
        assert_eq!(
            cmd.emulate_resize,
            vec![
                ResolutionChange {
                    at_frame: 10,
                    resolution: Resolution::new(640, 480),
                },
                ResolutionChange {
                    at_frame: 20,
                    resolution: Resolution::new(1920, 1080),
                },
            ]
        );
    }

    #[test]
    fn bad_resize() {
        assert!(parse_resolution_change("640x480").is_err());
        assert!(parse_resolution_change("x:640x480").is_err());
        assert!(parse_resolution_change("3:640").is_err());
        assert!(parse(&["--emulate-resize", "nope"]).is_err());
    }

    #[test]
    fn bad_codec() {
        assert!(parse(&["--codec", "theora", "a.bin"]).is_err());
    }
}
