// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! State shared by the feeder thread, the completion loop and the sink's release context.
//!
//! A single mutex guards all bookkeeping (slot states, flags, timestamp records). The condvar
//! wakes the feeder when an input slot frees up, when pause state changes, or when the session
//! finishes. Buffer contents are never touched under the lock; the slot state decides who may.

use std::sync::Arc;

use base::error;
use base::warn;
use base::Event;
use sync::Condvar;
use sync::Mutex;
use sync::MutexGuard;

use crate::backend::BufferFlags;
use crate::backend::DecoderDriver;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::format::Resolution;
use crate::format::Timestamp;
use crate::memory::BufferMemory;
use crate::pool::InputPool;
use crate::pool::OutputPool;
use crate::pool::RecycleOutcome;
use crate::timestamp::PendingTimestampTracker;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub paused: bool,
    /// A picture was shown since feeding was last allowed to proceed while paused.
    pub prerolled: bool,
    pub finished: bool,
    pub failed: bool,
    pub reconfiguring: bool,
    /// Number of completed reconfigurations.
    pub generation: u64,
    pub current_width: u32,
    pub current_height: u32,
}

impl SessionState {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.current_width, self.current_height)
    }

    /// The feeder holds back while paused once a picture made it to the screen.
    pub fn feeding_blocked(&self) -> bool {
        self.paused && self.prerolled
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub units_submitted: u64,
    pub units_dropped: u64,
    pub pictures_presented: u64,
    pub unknown_timestamps: u64,
    pub reconfigurations: u64,
}

/// Timing of an access unit being submitted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitTiming {
    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
    pub duration: Option<Timestamp>,
    pub stream_base_offset: Timestamp,
    pub is_sync: bool,
}

pub struct SessionInner {
    pub state: SessionState,
    pub input_pool: InputPool,
    pub output_pool: OutputPool,
    pub tracker: PendingTimestampTracker,
    pub stats: SessionStats,
    error: Option<DecoderError>,
}

pub struct Session {
    inner: Mutex<SessionInner>,
    input_cond: Condvar,
    driver: Arc<dyn DecoderDriver>,
    wake: Event,
}

impl Session {
    pub fn new(
        driver: Arc<dyn DecoderDriver>,
        input_pool: InputPool,
        resolution: Resolution,
        start_paused: bool,
    ) -> DecoderResult<Arc<Session>> {
        let wake = Event::new()
            .map_err(|e| DecoderError::FatalSetup(format!("failed to create wake event: {}", e)))?;
        Ok(Arc::new(Session {
            inner: Mutex::new(SessionInner {
                state: SessionState {
                    paused: start_paused,
                    current_width: resolution.width,
                    current_height: resolution.height,
                    ..Default::default()
                },
                input_pool,
                output_pool: OutputPool::default(),
                tracker: PendingTimestampTracker::new(),
                stats: SessionStats::default(),
                error: None,
            }),
            input_cond: Condvar::new(),
            driver,
            wake,
        }))
    }

    pub fn lock(&self) -> MutexGuard<SessionInner> {
        self.inner.lock()
    }

    pub fn driver(&self) -> &dyn DecoderDriver {
        &*self.driver
    }

    /// Readable once the session finished or failed from any thread.
    pub fn wake_event(&self) -> &Event {
        &self.wake
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    pub fn is_finished(&self) -> bool {
        self.lock().state.finished
    }

    /// Wakes the feeder after a change to input slots or pause state.
    pub fn notify_feeder(&self) {
        self.input_cond.notify_all();
    }

    /// Blocks until a `Free` input slot may be filled. Returns `None` once the session is
    /// finishing.
    pub fn wait_for_free_input(&self) -> Option<(usize, Arc<BufferMemory>)> {
        let inner = self.input_cond.wait_while(self.lock(), |inner| {
            !inner.state.finished
                && (inner.state.feeding_blocked() || inner.input_pool.find_free().is_none())
        });
        if inner.state.finished {
            return None;
        }
        let index = inner.input_pool.find_free()?;
        inner
            .input_pool
            .free_memory(index)
            .ok()
            .map(|memory| (index, memory))
    }

    /// Records the unit's timing and queues slot `index` holding `payload_len` bytes, both under
    /// the same lock so that no picture can be dequeued before its record exists.
    ///
    /// Returns `false` if the session finished in the meantime and nothing was submitted.
    pub fn submit_access_unit(
        &self,
        index: usize,
        payload_len: usize,
        timing: UnitTiming,
    ) -> DecoderResult<bool> {
        let mut inner = self.lock();
        if inner.state.finished {
            return Ok(false);
        }
        let handle = inner.tracker.insert(
            timing.pts,
            timing.dts,
            timing.duration,
            timing.stream_base_offset,
            timing.is_sync,
        );
        let mut flags = BufferFlags::empty();
        if timing.is_sync {
            flags |= BufferFlags::KEY_FRAME;
        }
        if timing.pts.is_none() {
            flags |= BufferFlags::TIMESTAMP_INVALID;
        }
        let submitted = inner.input_pool.submit(
            &*self.driver,
            index,
            payload_len,
            flags,
            timing.pts.unwrap_or(0),
        );
        if let Err(e) = submitted {
            inner.tracker.remove(handle);
            return Err(e);
        }
        inner.stats.units_submitted += 1;
        Ok(true)
    }

    /// Queues an empty end-of-stream buffer on slot `index`.
    pub fn submit_end_of_stream(&self, index: usize) -> DecoderResult<bool> {
        let mut inner = self.lock();
        if inner.state.finished {
            return Ok(false);
        }
        inner.input_pool.submit(
            &*self.driver,
            index,
            0,
            BufferFlags::END_OF_STREAM | BufferFlags::TIMESTAMP_INVALID,
            0,
        )?;
        Ok(true)
    }

    /// The driver consumed input slot `index`.
    pub fn complete_input(&self, index: usize) -> DecoderResult<()> {
        self.lock().input_pool.complete(index)?;
        self.input_cond.notify_all();
        Ok(())
    }

    /// Returns output slot `index` of `generation` from the sink. The slot goes back to the
    /// driver unless the session is finishing or a reconfiguration is under way.
    pub fn recycle_output(&self, index: usize, generation: u64) -> DecoderResult<RecycleOutcome> {
        let mut inner = self.lock();
        let resubmit = !inner.state.finished && !inner.state.reconfiguring;
        inner
            .output_pool
            .recycle(&*self.driver, index, generation, resubmit)
    }

    /// Queues the `Free` output slots a failed requeue left behind. Does nothing while the
    /// session is finishing or reconfiguring.
    pub fn requeue_free_outputs(&self) -> DecoderResult<usize> {
        let mut inner = self.lock();
        if inner.state.finished || inner.state.reconfiguring {
            return Ok(0);
        }
        inner.output_pool.submit_all_free(&*self.driver)
    }

    /// Release path used from the sink's context, where errors cannot be returned.
    pub fn release_output(&self, index: usize, generation: u64) {
        match self.recycle_output(index, generation) {
            Ok(_) => (),
            Err(e) if e.is_fatal() => self.fail(e),
            Err(e) => {
                warn!("failed to requeue output slot {}: {}", index, e);
                // The completion loop retries on its next iteration.
                if let Err(e) = self.wake.signal() {
                    error!("failed to wake the completion loop: {}", e);
                }
            }
        }
    }

    pub fn toggle_pause(&self) -> bool {
        let paused = {
            let mut inner = self.lock();
            inner.state.paused = !inner.state.paused;
            inner.state.paused
        };
        self.input_cond.notify_all();
        paused
    }

    /// Lets one more picture through while paused.
    pub fn frame_step(&self) {
        self.lock().state.prerolled = false;
        self.input_cond.notify_all();
    }

    /// Cooperative shutdown: stops the feeder and wakes the completion loop.
    pub fn finish(&self) {
        self.lock().state.finished = true;
        self.input_cond.notify_all();
        if let Err(e) = self.wake.signal() {
            error!("failed to wake the completion loop: {}", e);
        }
    }

    /// Records a fatal error and finishes the session. Only the first error is kept.
    pub fn fail(&self, err: DecoderError) {
        error!("decoding session failed: {}", err);
        {
            let mut inner = self.lock();
            inner.state.failed = true;
            if inner.error.is_none() {
                inner.error = Some(err);
            }
        }
        self.finish();
    }

    pub fn take_error(&self) -> Option<DecoderError> {
        self.lock().error.take()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::backend::recording::DriverCall;
    use crate::backend::recording::RecordingDriver;
    use crate::memory::MemoryAllocator;
    use crate::memory::ShmAllocator;
    use crate::pool::SlotState;

    fn session(driver: &Arc<RecordingDriver>, inputs: usize, paused: bool) -> Arc<Session> {
        let memories = (0..inputs)
            .map(|_| ShmAllocator.allocate("session_test", 4096).unwrap())
            .collect();
        Session::new(
            driver.clone(),
            InputPool::new(memories),
            Resolution::new(320, 240),
            paused,
        )
        .unwrap()
    }

    #[test]
    fn submit_records_timing_with_flags() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 2, false);
        let (index, _) = session.wait_for_free_input().unwrap();
        let timing = UnitTiming {
            dts: Some(10),
            is_sync: true,
            ..Default::default()
        };
        assert!(session.submit_access_unit(index, 5, timing).unwrap());
        assert_eq!(session.lock().tracker.len(), 1);
        assert_eq!(
            driver.calls(),
            vec![DriverCall::SubmitInput {
                index,
                bytes_used: 5,
                flags: BufferFlags::KEY_FRAME | BufferFlags::TIMESTAMP_INVALID,
                timestamp: 0,
            }]
        );
    }

    #[test]
    fn failed_submission_drops_its_record() {
        let driver = RecordingDriver::new();
        driver.fail_on("submit_input");
        let session = session(&driver, 1, false);
        assert!(session
            .submit_access_unit(0, 5, UnitTiming::default())
            .is_err());
        let inner = session.lock();
        assert!(inner.tracker.is_empty());
        assert_eq!(inner.input_pool.state(0), Some(SlotState::Free));
        assert_eq!(inner.stats.units_dropped, 0);
    }

    #[test]
    fn feeder_wakes_when_input_completes() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 1, false);
        session
            .submit_access_unit(0, 1, UnitTiming::default())
            .unwrap();

        let waiter = {
            let session = session.clone();
            thread::spawn(move || session.wait_for_free_input().map(|(index, _)| index))
        };
        thread::sleep(Duration::from_millis(20));
        session.complete_input(0).unwrap();
        assert_eq!(waiter.join().unwrap(), Some(0));
    }

    #[test]
    fn finish_releases_waiting_feeder() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 0, false);
        let waiter = {
            let session = session.clone();
            thread::spawn(move || session.wait_for_free_input().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        session.finish();
        assert!(waiter.join().unwrap());
        assert!(!session.submit_end_of_stream(0).unwrap());
    }

    #[test]
    fn pause_blocks_only_after_preroll() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 1, true);
        // Nothing shown yet: the first picture may still be fed.
        assert!(session.wait_for_free_input().is_some());

        session.lock().state.prerolled = true;
        let waiter = {
            let session = session.clone();
            thread::spawn(move || session.wait_for_free_input().map(|(index, _)| index))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        session.frame_step();
        assert_eq!(waiter.join().unwrap(), Some(0));

        assert!(!session.toggle_pause());
        assert!(!session.state().paused);
    }

    #[test]
    fn first_error_is_kept() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 0, false);
        session.fail(DecoderError::ProtocolViolation("first".into()));
        session.fail(DecoderError::ProtocolViolation("second".into()));
        let state = session.state();
        assert!(state.failed && state.finished);
        assert!(matches!(
            session.take_error(),
            Some(DecoderError::ProtocolViolation(msg)) if msg == "first"
        ));
        assert_eq!(
            session.wake_event().wait_timeout(Duration::ZERO).unwrap(),
            base::EventWaitResult::Signaled(2)
        );
    }
}
