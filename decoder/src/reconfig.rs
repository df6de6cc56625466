// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Output queue reallocation after a resolution change the current buffers cannot hold.
//!
//! `Streaming -> FlushRequested -> Flushing -> Draining -> Reconfigured -> Streaming`. The
//! controller is owned by the completion loop; pictures still shown by the sink when the pool is
//! rebuilt survive as parked slots of the previous generation.

use std::sync::Arc;

use base::debug;
use base::info;

use crate::backend::DecoderDriver;
use crate::backend::Direction;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::format::OutputFormat;
use crate::format::Resolution;
use crate::memory::MemoryAllocator;
use crate::session::Session;
use crate::session::SessionInner;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReconfigState {
    Streaming,
    /// The flush request is being issued.
    FlushRequested,
    /// Waiting for the driver's flush-done event.
    Flushing,
    /// Flush done; pictures completed before it are being presented.
    Draining,
    /// The new pool is built but the output queue is not restarted yet.
    Reconfigured,
}

pub struct ReconfigurationController {
    allocator: Arc<dyn MemoryAllocator>,
    extra_buffers: usize,
    state: ReconfigState,
    pending: Option<Resolution>,
}

fn fatal(e: DecoderError) -> DecoderError {
    DecoderError::Reconfiguration(Box::new(e))
}

impl ReconfigurationController {
    pub fn new(allocator: Arc<dyn MemoryAllocator>, extra_buffers: usize) -> Self {
        ReconfigurationController {
            allocator,
            extra_buffers,
            state: ReconfigState::Streaming,
            pending: None,
        }
    }

    pub fn state(&self) -> ReconfigState {
        self.state
    }

    /// Builds the first output pool (generation 0) and starts the output queue.
    pub fn build_initial(
        &mut self,
        session: &Session,
        resolution: Resolution,
    ) -> DecoderResult<OutputFormat> {
        let mut inner = session.lock();
        let generation = inner.state.generation;
        let format = self.build_pool(session.driver(), &mut inner, resolution, generation)?;
        session.driver().set_stream(Direction::Output, true)?;
        Ok(format)
    }

    /// The driver reported a resolution the allocated output buffers cannot hold.
    pub fn on_resolution_change(
        &mut self,
        session: &Session,
        resolution: Resolution,
    ) -> DecoderResult<()> {
        {
            let mut inner = session.lock();
            inner.state.current_width = resolution.width;
            inner.state.current_height = resolution.height;
            self.pending = Some(resolution);
            if self.state != ReconfigState::Streaming {
                debug!("resolution changed to {} during reconfiguration", resolution);
                return Ok(());
            }
            inner.state.reconfiguring = true;
        }
        info!("resolution changed to {}, flushing output queue", resolution);
        self.state = ReconfigState::FlushRequested;
        session.driver().flush(Direction::Output).map_err(fatal)?;
        self.state = ReconfigState::Flushing;
        Ok(())
    }

    /// The output flush completed. Returns whether a reconfiguration is waiting on it, in which
    /// case the caller presents every remaining picture and then calls `rebuild`.
    pub fn on_flush_done(&mut self) -> bool {
        if self.state == ReconfigState::Flushing {
            self.state = ReconfigState::Draining;
            true
        } else {
            false
        }
    }

    /// Replaces the output pool with one sized for the new resolution and restarts the queue.
    ///
    /// Any failure is fatal to the session.
    pub fn rebuild(&mut self, session: &Session) -> DecoderResult<OutputFormat> {
        if self.state != ReconfigState::Draining {
            return Err(fatal(DecoderError::ProtocolViolation(format!(
                "output rebuild requested while {:?}",
                self.state
            ))));
        }
        let driver = session.driver();
        let mut inner = session.lock();
        let resolution = self.pending.take().unwrap_or_else(|| inner.state.resolution());

        // The hardware must stop writing before any buffer goes away.
        driver.set_stream(Direction::Output, false).map_err(fatal)?;
        let retired = inner.output_pool.retire();
        driver
            .request_buffers(Direction::Output, 0)
            .map_err(fatal)?;
        debug!(
            "retired output pool: {} destroyed, {} still shown",
            retired.destroyed, retired.deferred
        );

        let generation = inner.state.generation + 1;
        let format = self
            .build_pool(driver, &mut inner, resolution, generation)
            .map_err(fatal)?;
        self.state = ReconfigState::Reconfigured;
        driver.set_stream(Direction::Output, true).map_err(fatal)?;
        inner.state.generation = generation;
        inner.state.reconfiguring = false;
        inner.stats.reconfigurations += 1;
        self.state = ReconfigState::Streaming;
        info!(
            "output reconfigured to {} ({} buffers, generation {})",
            format.resolution,
            inner.output_pool.active_count(),
            generation
        );
        Ok(format)
    }

    /// Allocates a fresh pool of `generation` and queues every slot of it.
    fn build_pool(
        &self,
        driver: &dyn DecoderDriver,
        inner: &mut SessionInner,
        resolution: Resolution,
        generation: u64,
    ) -> DecoderResult<OutputFormat> {
        let format = driver.set_output_format(resolution)?;
        let wanted = driver.min_output_buffers()?.max(self.extra_buffers);
        let count = driver.request_buffers(Direction::Output, wanted)?;
        let memories = (0..count)
            .map(|i| {
                self.allocator
                    .allocate(&format!("output_{}_{}", generation, i), format.buffer_size)
            })
            .collect::<DecoderResult<Vec<_>>>()?;
        inner.output_pool.rebuild(generation, memories);
        inner.output_pool.submit_all_free(driver)?;
        inner.state.current_width = format.resolution.width;
        inner.state.current_height = format.resolution.height;
        Ok(format)
    }
}
