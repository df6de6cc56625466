// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer-queue and timestamp-reordering engine for stateful hardware video decoders.
//!
//! A session runs two loops: the feeder moves access units from a demuxer into free input
//! buffers, and the completion loop dequeues consumed inputs, decoded pictures and driver events,
//! pairs every picture with its presentation timestamp and lends it to a presentation sink.

pub mod backend;
pub mod bitstream;
pub mod demux;
pub mod error;
pub mod feeder;
pub mod format;
pub mod memory;
pub mod pool;
pub mod reconfig;
pub mod session;
pub mod sink;
pub mod timestamp;
mod utils;
pub mod worker;

use std::sync::Arc;
use std::thread;

use base::debug;
use base::error;
use base::info;
use base::warn;
use base::AsRawDescriptor;

pub use crate::backend::DecoderDriver;
use crate::backend::Control;
use crate::backend::Direction;
use crate::backend::EventKind;
use crate::backend::OutputOrder;
use crate::backend::PerfLevel;
use crate::bitstream::StreamPreparer;
use crate::demux::Demuxer;
pub use crate::error::DecoderError;
pub use crate::error::DecoderResult;
use crate::feeder::run_feeder;
use crate::memory::MemoryAllocator;
use crate::pool::InputPool;
use crate::reconfig::ReconfigurationController;
use crate::session::Session;
pub use crate::session::SessionStats;
use crate::sink::PresentationSink;
use crate::worker::CompletionLoop;

pub const DEFAULT_INPUT_BUFFER_COUNT: usize = 6;
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_EXTRA_OUTPUT_BUFFERS: usize = 4;

/// Tunables of a decoding session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub input_buffer_count: usize,
    pub input_buffer_size: usize,
    /// Output buffer count to ask for; the driver minimum wins when larger.
    pub extra_output_buffers: usize,
    pub output_order: OutputOrder,
    pub continue_data_transfer: bool,
    pub perf_level: PerfLevel,
    pub secure: bool,
    pub start_paused: bool,
    pub frame_rate: Option<u32>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            input_buffer_count: DEFAULT_INPUT_BUFFER_COUNT,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            extra_output_buffers: DEFAULT_EXTRA_OUTPUT_BUFFERS,
            output_order: OutputOrder::Display,
            continue_data_transfer: false,
            perf_level: PerfLevel::Turbo,
            secure: false,
            start_paused: false,
            frame_rate: None,
        }
    }
}

fn setup_error(what: &str, e: DecoderError) -> DecoderError {
    DecoderError::FatalSetup(format!("failed to {}: {}", what, e))
}

fn apply_controls(driver: &dyn DecoderDriver, config: &DecoderConfig) -> DecoderResult<()> {
    if config.output_order == OutputOrder::Decode {
        driver
            .set_control(Control::OutputOrder(OutputOrder::Decode))
            .map_err(|e| setup_error("set output order", e))?;
    }
    driver
        .set_control(Control::ContinueDataTransfer(config.continue_data_transfer))
        .map_err(|e| setup_error("set data transfer mode", e))?;
    driver
        .set_control(Control::PerfLevel(config.perf_level))
        .map_err(|e| setup_error("set perf level", e))?;
    if let Some(fps) = config.frame_rate {
        driver
            .set_control(Control::FrameRate(fps))
            .map_err(|e| setup_error("set frame rate", e))?;
    }
    Ok(())
}

/// Decodes `demuxer` to completion, or until the session is told to stop.
///
/// `shutdown` is polled by the completion loop; once readable the session ends cleanly. Both
/// queues are always stopped before any buffer is released.
pub fn run_session(
    driver: Arc<dyn DecoderDriver>,
    mut demuxer: Box<dyn Demuxer>,
    sink: Option<Box<dyn PresentationSink>>,
    allocator: Arc<dyn MemoryAllocator>,
    config: &DecoderConfig,
    shutdown: Option<&dyn AsRawDescriptor>,
) -> DecoderResult<SessionStats> {
    let codec = demuxer.codec();
    let resolution = demuxer.resolution();
    info!("decoding {} stream of {}", codec, resolution);

    for kind in EventKind::ALL {
        driver
            .subscribe_event(kind)
            .map_err(|e| setup_error("subscribe to driver events", e))?;
    }
    if config.secure {
        driver
            .set_control(Control::SecureMode(true))
            .map_err(|e| setup_error("enable secure mode", e))?;
    }

    let input_format = driver
        .set_input_format(codec, resolution, config.input_buffer_size)
        .map_err(|e| setup_error("set input format", e))?;
    let count = driver
        .request_buffers(Direction::Input, config.input_buffer_count)
        .map_err(|e| setup_error("request input buffers", e))?;
    let memories = (0..count)
        .map(|i| allocator.allocate(&format!("input_{}", i), input_format.buffer_size))
        .collect::<DecoderResult<Vec<_>>>()
        .map_err(|e| setup_error("allocate input buffers", e))?;
    info!(
        "{} input buffers of {} bytes",
        memories.len(),
        input_format.buffer_size
    );

    apply_controls(&*driver, config)?;
    driver
        .set_stream(Direction::Input, true)
        .map_err(|e| setup_error("start the input queue", e))?;

    let session = Session::new(
        driver.clone(),
        InputPool::new(memories),
        resolution,
        config.start_paused,
    )?;
    let result = run_loops(
        &session,
        demuxer.as_mut(),
        sink,
        allocator,
        config,
        shutdown,
    );
    teardown(&session);

    let stats = session.stats();
    info!(
        "Total frames captured {} ({} units fed, {} dropped, {} reconfigurations)",
        stats.pictures_presented, stats.units_submitted, stats.units_dropped, stats.reconfigurations
    );
    result?;
    match session.take_error() {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

fn run_loops(
    session: &Arc<Session>,
    demuxer: &mut dyn Demuxer,
    mut sink: Option<Box<dyn PresentationSink>>,
    allocator: Arc<dyn MemoryAllocator>,
    config: &DecoderConfig,
    shutdown: Option<&dyn AsRawDescriptor>,
) -> DecoderResult<()> {
    let mut controller = ReconfigurationController::new(allocator, config.extra_output_buffers);
    let format = controller
        .build_initial(session, demuxer.resolution())
        .map_err(|e| setup_error("set up the output queue", e))?;
    let aspect_ratio = demuxer.aspect_ratio();
    if let Some(sink) = &mut sink {
        sink.configure(&format, aspect_ratio)?;
    }

    let mut preparer = StreamPreparer::new(demuxer.codec(), demuxer.codec_extradata());
    let mut worker = CompletionLoop::new(session.clone(), controller, sink, aspect_ratio);

    thread::scope(|scope| {
        let feeder = thread::Builder::new()
            .name("feeder".into())
            .spawn_scoped(scope, || {
                if let Err(e) = run_feeder(session, demuxer, &mut preparer) {
                    session.fail(e);
                }
            })
            .map_err(|e| {
                DecoderError::FatalSetup(format!("failed to spawn the feeder thread: {}", e))
            })?;

        if let Err(e) = worker.run(shutdown) {
            session.fail(e);
        }
        session.finish();
        if feeder.join().is_err() {
            error!("feeder thread panicked");
        }
        Ok::<(), DecoderError>(())
    })?;

    // Pictures still held by the sink come back here, before the buffers are torn down.
    drop(worker.into_sink());
    Ok(())
}

/// Stops both queues, then releases every buffer. Safe to call more than once.
fn teardown(session: &Session) {
    let driver = session.driver();
    for direction in [Direction::Input, Direction::Output] {
        if let Err(e) = driver.set_stream(direction, false) {
            warn!("failed to stop the {} queue: {}", direction, e);
        }
    }

    let mut inner = session.lock();
    let inputs = inner.input_pool.teardown();
    let outputs = inner.output_pool.teardown();
    let dangling = inner.tracker.clear();
    drop(inner);
    debug!(
        "released {} input and {} output buffers ({} still shown), {} unpaired timestamps",
        inputs, outputs.destroyed, outputs.deferred, dangling
    );

    for direction in [Direction::Input, Direction::Output] {
        if let Err(e) = driver.request_buffers(direction, 0) {
            warn!("failed to free the {} buffers: {}", direction, e);
        }
    }
}
