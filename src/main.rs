// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decodes a compressed video stream through a stateful hardware decoder.

mod cmdline;
mod config;

use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use base::error;
use base::info;
use base::syslog;
use base::syslog::LogConfig;
use base::warn;
use base::SignalFd;
use decoder::backend::emulated::EmulatedDecoder;
use decoder::demux::open_demuxer;
use decoder::memory::ShmAllocator;
use decoder::sink::FrameDumpSink;
use decoder::sink::PresentationSink;
use decoder::DecoderDriver;
use decoder::SessionStats;

use crate::cmdline::Command;
use crate::config::Config;
use crate::config::EMULATED_DEVICE;

fn create_driver(cfg: &Config) -> Result<Arc<dyn DecoderDriver>> {
    if cfg.device != EMULATED_DEVICE {
        return Err(anyhow!(
            "unsupported decoder driver \"{}\", only \"{}\" is built in",
            cfg.device,
            EMULATED_DEVICE
        ));
    }
    let driver = EmulatedDecoder::new(cfg.emulated.clone())
        .context("failed to create the emulated decoder")?;
    Ok(Arc::new(driver))
}

fn create_sink(cfg: &Config) -> Result<Option<Box<dyn PresentationSink>>> {
    if cfg.fullscreen {
        warn!("fullscreen needs a display, ignoring it");
    }
    match &cfg.save_frames {
        Some(dir) => {
            let sink = FrameDumpSink::new(dir, cfg.interactive)
                .with_context(|| format!("failed to save frames to {}", dir.display()))?;
            info!("saving frames to {}", dir.display());
            Ok(Some(Box::new(sink)))
        }
        None => Ok(None),
    }
}

fn run_decoder(cfg: Config, shutdown: &SignalFd) -> Result<SessionStats> {
    let input = cfg
        .input
        .as_deref()
        .context("missing stream to decode")?;
    let demuxer = open_demuxer(input, cfg.stream_hints())
        .with_context(|| format!("failed to open {}", input.display()))?;
    let driver = create_driver(&cfg)?;
    let sink = create_sink(&cfg)?;

    let stats = decoder::run_session(
        driver,
        demuxer,
        sink,
        Arc::new(ShmAllocator),
        &cfg.decoder_config(),
        Some(shutdown),
    )
    .context("decoding failed")?;
    Ok(stats)
}

fn vdec_main(cfg: Config) -> Result<()> {
    // Must exist before any thread is spawned so every thread inherits the blocked mask.
    let shutdown = SignalFd::new(&[libc::SIGINT, libc::SIGTERM])
        .context("failed to create the signalfd")?;

    let stats = run_decoder(cfg, &shutdown)?;
    if stats.unknown_timestamps > 0 {
        info!(
            "{} pictures were shown without a known timestamp",
            stats.unknown_timestamps
        );
    }
    Ok(())
}

fn main() {
    let cmd: Command = argh::from_env();
    let cfg = match Config::try_from(cmd) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("vdec: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = syslog::init_with(LogConfig {
        filter: cfg.log_level.clone(),
        ..Default::default()
    }) {
        eprintln!("failed to initialize syslog: {}", e);
        std::process::exit(1);
    }

    std::process::exit(match vdec_main(cfg) {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    });
}
