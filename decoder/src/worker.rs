// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The completion loop: reacts to everything the driver, the sink and the outside world report.

use std::sync::Arc;
use std::time::Duration;

use base::debug;
use base::error;
use base::info;
use base::warn;
use base::AsRawDescriptor;
use base::EventToken;
use base::EventType;
use base::WaitContext;
use enumn::N;

use crate::backend::BufferFlags;
use crate::backend::DequeuedPicture;
use crate::backend::DriverEvent;
use crate::backend::ReadySource;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::format::AspectRatio;
use crate::pool::OutputCompletion;
use crate::reconfig::ReconfigurationController;
use crate::session::Session;
use crate::sink::Picture;
use crate::sink::PresentationSink;
use crate::sink::ReleaseCallback;
use crate::sink::UserInput;
use crate::timestamp::PresentationTime;

/// How long to wait before retrying output slots the driver refused to take back.
const REQUEUE_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
#[repr(u32)]
enum Token {
    InputDone,
    PictureReady,
    DriverEvent,
    Sink,
    Wake,
    Shutdown,
}

impl EventToken for Token {
    fn as_raw_token(&self) -> u64 {
        *self as u64
    }

    fn from_raw_token(data: u64) -> Self {
        // Only tokens produced by `as_raw_token` are ever registered.
        Token::n(data as u32).unwrap_or(Token::Wake)
    }
}

pub struct CompletionLoop {
    session: Arc<Session>,
    controller: ReconfigurationController,
    sink: Option<Box<dyn PresentationSink>>,
    aspect_ratio: Option<AspectRatio>,
    next_sequence: u64,
}

impl CompletionLoop {
    pub fn new(
        session: Arc<Session>,
        controller: ReconfigurationController,
        sink: Option<Box<dyn PresentationSink>>,
        aspect_ratio: Option<AspectRatio>,
    ) -> CompletionLoop {
        CompletionLoop {
            session,
            controller,
            sink,
            aspect_ratio,
            next_sequence: 0,
        }
    }

    /// Gives the sink back so its owner can drop it once the session is over.
    pub fn into_sink(self) -> Option<Box<dyn PresentationSink>> {
        self.sink
    }

    fn build_wait_context(
        &self,
        shutdown: Option<&dyn AsRawDescriptor>,
    ) -> DecoderResult<WaitContext<Token>> {
        let driver = self.session.driver();
        WaitContext::build_with(&[
            (driver.readiness(ReadySource::InputDone), Token::InputDone),
            (
                driver.readiness(ReadySource::PictureReady),
                Token::PictureReady,
            ),
            (driver.readiness(ReadySource::Event), Token::DriverEvent),
            (self.session.wake_event(), Token::Wake),
        ])
        .and_then(|wc| {
            if let Some(sink) = &self.sink {
                wc.add(sink.event_source(), Token::Sink)?;
            }
            if let Some(shutdown) = shutdown {
                wc.add(shutdown, Token::Shutdown)?;
            }
            Ok(wc)
        })
        .map_err(DecoderError::Wait)
    }

    /// Services every source until the session finishes. `shutdown` becomes readable when the
    /// process is asked to terminate.
    ///
    /// Transient errors are logged; the first fatal one ends the loop and is returned.
    pub fn run(&mut self, shutdown: Option<&dyn AsRawDescriptor>) -> DecoderResult<()> {
        let wait_ctx = self.build_wait_context(shutdown)?;
        let session = self.session.clone();

        while !session.is_finished() {
            let requeue_pending = match session.requeue_free_outputs() {
                Ok(0) => false,
                Ok(n) => {
                    debug!("requeued {} output slots", n);
                    false
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    true
                }
            };
            let events = if requeue_pending {
                wait_ctx.wait_timeout(REQUEUE_RETRY_DELAY)
            } else {
                wait_ctx.wait()
            }
            .map_err(DecoderError::Wait)?;
            for event in events.iter().filter(|e| e.is_readable) {
                let result = match event.token {
                    Token::InputDone => self.handle_input_done(),
                    Token::PictureReady => self.handle_pictures(&wait_ctx),
                    Token::DriverEvent => self.handle_driver_events(&wait_ctx),
                    Token::Sink => self.handle_sink(),
                    Token::Wake => session
                        .wake_event()
                        .wait()
                        .map_err(|e| DecoderError::TransientIo {
                            op: "clear wake event",
                            source: e,
                        }),
                    Token::Shutdown => {
                        info!("shutdown requested");
                        session.finish();
                        Ok(())
                    }
                };
                match result {
                    Ok(()) => (),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("{}", e),
                }
            }
            if let Some(sink) = &self.sink {
                if !sink.is_running() {
                    info!("presentation sink closed");
                    session.finish();
                }
            }
        }
        Ok(())
    }

    fn handle_input_done(&mut self) -> DecoderResult<()> {
        loop {
            match self.session.driver().dequeue_input() {
                Ok(index) => self.session.complete_input(index)?,
                Err(e) if e.is_would_block() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_pictures(&mut self, wait_ctx: &WaitContext<Token>) -> DecoderResult<()> {
        while !self.session.is_finished() {
            match self.session.driver().dequeue_output() {
                Ok(picture) => self.handle_picture(picture, wait_ctx)?,
                Err(e) if e.is_would_block() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn end_of_stream(&self, wait_ctx: &WaitContext<Token>) -> DecoderResult<()> {
        info!("end of stream reached");
        self.session.finish();
        let source = self.session.driver().readiness(ReadySource::PictureReady);
        wait_ctx
            .modify(source, EventType::None, Token::PictureReady)
            .map_err(DecoderError::Wait)
    }

    fn handle_picture(
        &mut self,
        dequeued: DequeuedPicture,
        wait_ctx: &WaitContext<Token>,
    ) -> DecoderResult<()> {
        let picture = {
            let mut inner = self.session.lock();
            let completion = inner
                .output_pool
                .complete(dequeued.index, dequeued.bytes_used)?;
            let (memory, generation) = match completion {
                OutputCompletion::Picture { memory, generation } => (memory, generation),
                OutputCompletion::Empty => {
                    drop(inner);
                    return self.end_of_stream(wait_ctx);
                }
            };
            let resolved = inner
                .tracker
                .resolve_for_output(dequeued.observed_timestamp());
            if resolved.time == PresentationTime::Unknown {
                inner.stats.unknown_timestamps += 1;
            }
            inner.state.prerolled = true;
            inner.stats.pictures_presented += 1;
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            debug!(
                "picture {} in output slot {} (generation {}), {} bytes, time {:?}",
                sequence, dequeued.index, generation, dequeued.bytes_used, resolved.time
            );
            Picture {
                index: dequeued.index,
                generation,
                memory,
                bytes_used: dequeued.bytes_used,
                timestamp: resolved.time,
                sequence,
            }
        };

        let (index, generation) = (picture.index, picture.generation);
        match &mut self.sink {
            Some(sink) => {
                let session = self.session.clone();
                let release =
                    ReleaseCallback::new(move || session.release_output(index, generation));
                sink.show(picture, release)?;
            }
            None => {
                self.session.recycle_output(index, generation)?;
            }
        }

        if dequeued.flags.contains(BufferFlags::END_OF_STREAM) {
            self.end_of_stream(wait_ctx)?;
        }
        Ok(())
    }

    fn handle_driver_events(&mut self, wait_ctx: &WaitContext<Token>) -> DecoderResult<()> {
        loop {
            let event = match self.session.driver().dequeue_event() {
                Ok(event) => event,
                Err(e) if e.is_would_block() => return Ok(()),
                Err(e) => return Err(e),
            };
            match event {
                DriverEvent::SettingsChanged {
                    sufficient: false,
                    resolution,
                    ..
                } => self
                    .controller
                    .on_resolution_change(&self.session, resolution)?,
                DriverEvent::SettingsChanged {
                    sufficient: true,
                    resolution,
                    bit_depth,
                    interlaced,
                    color_space,
                } => {
                    info!(
                        "stream settings changed to {} (bit depth {:?}, interlaced {:?}, color \
                         space {:?}), current buffers suffice",
                        resolution, bit_depth, interlaced, color_space
                    );
                    let mut inner = self.session.lock();
                    inner.state.current_width = resolution.width;
                    inner.state.current_height = resolution.height;
                }
                DriverEvent::FlushDone { output: true, .. } => {
                    if self.controller.on_flush_done() {
                        // Pictures completed before the flush still go out first.
                        self.handle_pictures(wait_ctx)?;
                        let format = self.controller.rebuild(&self.session)?;
                        if let Some(sink) = &mut self.sink {
                            sink.configure(&format, self.aspect_ratio)?;
                        }
                    }
                }
                DriverEvent::FlushDone { .. } => debug!("input flush done"),
                DriverEvent::SysError => error!("decoder reported a system error"),
                DriverEvent::HwOverload => warn!("decoder hardware overloaded"),
                DriverEvent::HwUnsupported => warn!("stream unsupported by the decoder hardware"),
                DriverEvent::ReleaseBufferReference { index }
                | DriverEvent::ReleaseUnqueuedBuffer { index } => {
                    debug!("driver released its reference to output slot {}", index)
                }
            }
        }
    }

    fn handle_sink(&mut self) -> DecoderResult<()> {
        let inputs = match &mut self.sink {
            Some(sink) => sink.dispatch()?,
            None => return Ok(()),
        };
        for input in inputs {
            match input {
                UserInput::Quit => {
                    info!("quit requested");
                    self.session.finish();
                }
                UserInput::TogglePause => {
                    let paused = self.session.toggle_pause();
                    info!("{}", if paused { "Pause" } else { "Resume" });
                }
                UserInput::FrameStep => {
                    info!("Frame step");
                    self.session.frame_step();
                }
                UserInput::ToggleFullscreen => debug!("fullscreen toggled"),
            }
        }
        Ok(())
    }
}
