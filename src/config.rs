// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use decoder::backend::emulated::EmulatedConfig;
use decoder::backend::OutputOrder;
use decoder::demux::StreamHints;
use decoder::format::Codec;
use decoder::format::Resolution;
use decoder::DecoderConfig;
use serde::Deserialize;
use serde::Serialize;

use crate::cmdline::Command;

pub const EMULATED_DEVICE: &str = "emulated";

/// Everything a run needs, merged from the `--cfg` file and the command line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: String,
    pub input: Option<PathBuf>,
    pub codec: Option<Codec>,
    pub size: Option<Resolution>,
    pub fps: Option<u32>,
    pub input_buffers: usize,
    pub input_buffer_size: usize,
    pub extra_output_buffers: usize,
    pub continue_data_transfer: bool,
    pub decode_order: bool,
    pub fullscreen: bool,
    pub paused: bool,
    pub secure: bool,
    pub save_frames: Option<PathBuf>,
    pub interactive: bool,
    pub log_level: String,
    pub emulated: EmulatedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: EMULATED_DEVICE.to_string(),
            input: None,
            codec: None,
            size: None,
            fps: None,
            input_buffers: decoder::DEFAULT_INPUT_BUFFER_COUNT,
            input_buffer_size: decoder::DEFAULT_INPUT_BUFFER_SIZE,
            extra_output_buffers: decoder::DEFAULT_EXTRA_OUTPUT_BUFFERS,
            continue_data_transfer: false,
            decode_order: false,
            fullscreen: false,
            paused: false,
            secure: false,
            save_frames: None,
            interactive: false,
            log_level: String::from("info"),
            emulated: EmulatedConfig::default(),
        }
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let file = File::open(path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

impl TryFrom<Command> for Config {
    type Error = anyhow::Error;

    /// Values given on the command line override the ones from `--cfg`.
    fn try_from(cmd: Command) -> Result<Config> {
        let mut cfg = match &cmd.cfg {
            Some(path) => load_config_file(path)?,
            None => Config::default(),
        };

        if let Some(device) = cmd.device {
            cfg.device = device;
        }
        if cmd.input.is_some() {
            cfg.input = cmd.input;
        }
        cfg.codec = cmd.codec.or(cfg.codec);
        cfg.size = cmd.size.or(cfg.size);
        cfg.fps = cmd.fps.or(cfg.fps);
        if let Some(n) = cmd.input_buffers {
            cfg.input_buffers = n;
        }
        if let Some(n) = cmd.extra_output_buffers {
            cfg.extra_output_buffers = n;
        }
        cfg.continue_data_transfer |= cmd.continue_data_transfer;
        cfg.decode_order |= cmd.decode_order;
        cfg.fullscreen |= cmd.fullscreen;
        cfg.paused |= cmd.paused;
        cfg.secure |= cmd.secure;
        if cmd.save_frames.is_some() {
            cfg.save_frames = cmd.save_frames;
        }
        cfg.interactive |= cmd.interactive;

        if let Some(level) = cmd.log_level {
            cfg.log_level = level;
        } else if cmd.quiet {
            cfg.log_level = String::from("error");
        } else if cmd.verbose {
            cfg.log_level = String::from("debug");
        }

        if let Some(depth) = cmd.emulate_reorder {
            cfg.emulated.reorder_depth = depth;
        }
        if !cmd.emulate_resize.is_empty() {
            cfg.emulated.resolution_changes = cmd.emulate_resize;
        }
        cfg.emulated.drop_timestamps |= cmd.emulate_drop_timestamps;

        cfg.validate()?;
        Ok(cfg)
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.input.is_none() {
            bail!("missing stream to decode");
        }
        if self.input_buffers == 0 {
            bail!("at least one input buffer is needed");
        }
        if self.interactive && self.save_frames.is_none() {
            bail!("--interactive needs --save-frames");
        }
        Ok(())
    }

    pub fn stream_hints(&self) -> StreamHints {
        StreamHints {
            codec: self.codec,
            resolution: self.size,
            frame_rate: self.fps,
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            input_buffer_count: self.input_buffers,
            input_buffer_size: self.input_buffer_size,
            extra_output_buffers: self.extra_output_buffers,
            output_order: if self.decode_order {
                OutputOrder::Decode
            } else {
                OutputOrder::Display
            },
            continue_data_transfer: self.continue_data_transfer,
            secure: self.secure,
            start_paused: self.paused,
            frame_rate: self.fps,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use decoder::backend::emulated::ResolutionChange;
    use tempfile::NamedTempFile;

    use super::*;

    fn command(input: &str) -> Command {
        Command {
            input: Some(PathBuf::from(input)),
            ..Default::default()
        }
    }

    fn config_file(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let cfg = Config::try_from(command("a.ivf")).unwrap();
        assert_eq!(cfg.device, EMULATED_DEVICE);
        assert_eq!(cfg.input_buffers, 6);
        assert_eq!(cfg.log_level, "info");
        let dec = cfg.decoder_config();
        assert_eq!(dec.output_order, OutputOrder::Display);
        assert!(!dec.start_paused);
    }

    #[test]
    fn missing_input() {
        assert!(Config::try_from(Command::default()).is_err());
    }

    #[test]
    fn interactive_needs_sink() {
        let mut cmd = command("a.ivf");
        cmd.interactive = true;
        assert!(Config::try_from(cmd).is_err());
    }

    #[test]
    fn verbosity() {
        let mut cmd = command("a.ivf");
        cmd.verbose = true;
        assert_eq!(Config::try_from(cmd).unwrap().log_level, "debug");

        let mut cmd = command("a.ivf");
        cmd.verbose = true;
        cmd.quiet = true;
        assert_eq!(Config::try_from(cmd).unwrap().log_level, "error");

        let mut cmd = command("a.ivf");
        cmd.quiet = true;
        cmd.log_level = Some(String::from("trace"));
        assert_eq!(Config::try_from(cmd).unwrap().log_level, "trace");
    }

    #[test]
    fn command_line_overrides_file() {
        let file = config_file(
            r#"{
                "input": "from_file.h264",
                "codec": "h264",
                "fps": 25,
                "input_buffers": 3,
                "decode_order": true,
                "emulated": { "reorder_depth": 4 }
            }"#,
        );
        let mut cmd = command("from_cmdline.h264");
        cmd.cfg = Some(file.path().to_path_buf());
        cmd.fps = Some(60);
        cmd.emulate_resize = vec![ResolutionChange {
            at_frame: 5,
            resolution: Resolution::new(640, 360),
        }];

        let cfg = Config::try_from(cmd).unwrap();
        assert_eq!(cfg.input, Some(PathBuf::from("from_cmdline.h264")));
        assert_eq!(cfg.codec, Some(Codec::H264));
        assert_eq!(cfg.fps, Some(60));
        assert_eq!(cfg.input_buffers, 3);
        assert!(cfg.decode_order);
        assert_eq!(cfg.emulated.reorder_depth, 4);
        assert_eq!(cfg.emulated.resolution_changes.len(), 1);
        assert_eq!(cfg.decoder_config().output_order, OutputOrder::Decode);
    }

    #[test]
    fn file_alone_is_enough() {
        let file = config_file(r#"{ "input": "clip.ivf", "paused": true }"#);
        let cmd = Command {
            cfg: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = Config::try_from(cmd).unwrap();
        assert_eq!(cfg.input, Some(PathBuf::from("clip.ivf")));
        assert!(cfg.decoder_config().start_paused);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let file = config_file(r#"{ "input": "clip.ivf", "bogus": 1 }"#);
        let cmd = Command {
            cfg: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(Config::try_from(cmd).is_err());
    }
}
