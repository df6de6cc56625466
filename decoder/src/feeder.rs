// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Moves access units from the demuxer into free input buffers.

use std::thread;
use std::time::Duration;

use base::debug;
use base::error;
use base::info;
use base::warn;

use crate::bitstream::StreamPreparer;
use crate::demux::DemuxError;
use crate::demux::Demuxer;
use crate::error::DecoderError;
use crate::error::DecoderResult;
use crate::session::Session;
use crate::session::UnitTiming;

/// Pause between two fetches while the demuxer has nothing to give.
const DEMUX_RETRY_DELAY: Duration = Duration::from_millis(1);
/// Pause before queueing a slot again after the driver refused it.
const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(2);

/// Calls `submit` until it stops failing with a transient error. Fatal errors are returned.
fn submit_with_retry<F>(session: &Session, index: usize, mut submit: F) -> DecoderResult<bool>
where
    F: FnMut() -> DecoderResult<bool>,
{
    let mut attempts = 0u32;
    loop {
        match submit() {
            Err(e @ DecoderError::TransientIo { .. }) => {
                if attempts == 0 {
                    warn!("failed to queue input slot {}, retrying: {}", index, e);
                } else {
                    debug!("input slot {} refused again: {}", index, e);
                }
                attempts += 1;
                if session.is_finished() {
                    return Ok(false);
                }
                thread::sleep(SUBMIT_RETRY_DELAY);
            }
            result => return result,
        }
    }
}

/// Feeds `demuxer` into the session until the end of the stream, then queues the end-of-stream
/// buffer. Returns early without error once the session finishes.
pub fn run_feeder(
    session: &Session,
    demuxer: &mut dyn Demuxer,
    preparer: &mut StreamPreparer,
) -> DecoderResult<()> {
    loop {
        let unit = match demuxer.next_access_unit() {
            Ok(Some(unit)) => unit,
            Ok(None) => break,
            Err(DemuxError::Again) => {
                if session.is_finished() {
                    return Ok(());
                }
                thread::sleep(DEMUX_RETRY_DELAY);
                continue;
            }
            Err(e) => {
                error!("failed to read the stream, ending it here: {}", e);
                break;
            }
        };

        let data = preparer.prepare(&unit.data);
        let (index, memory) = match session.wait_for_free_input() {
            Some(slot) => slot,
            None => return Ok(()),
        };
        if data.len() > memory.size() {
            let err = DecoderError::PayloadTooLarge {
                len: data.len(),
                capacity: memory.size(),
            };
            warn!("dropping access unit: {}", err);
            session.lock().stats.units_dropped += 1;
            continue;
        }
        // The slot is Free and only this thread fills Free input slots.
        memory.write_slice(&data, 0)?;

        let timing = UnitTiming {
            pts: unit.pts,
            dts: unit.dts,
            duration: unit.duration,
            stream_base_offset: demuxer.stream_start_offset(),
            is_sync: unit.is_sync,
        };
        debug!(
            "input slot {} size={} pts={:?} dts={:?} duration={:?}",
            index,
            data.len(),
            unit.pts,
            unit.dts,
            unit.duration
        );
        let len = data.len();
        if !submit_with_retry(session, index, || {
            session.submit_access_unit(index, len, timing)
        })? {
            return Ok(());
        }
    }

    let index = match session.wait_for_free_input() {
        Some((index, _)) => index,
        None => return Ok(()),
    };
    if submit_with_retry(session, index, || session.submit_end_of_stream(index))? {
        info!("end of stream queued on input slot {}", index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;
    use crate::backend::recording::DriverCall;
    use crate::backend::recording::RecordingDriver;
    use crate::backend::BufferFlags;
    use crate::demux::AccessUnit;
    use crate::demux::DemuxResult;
    use crate::format::Codec;
    use crate::format::Resolution;
    use crate::memory::MemoryAllocator;
    use crate::memory::ShmAllocator;
    use crate::pool::InputPool;
    use crate::pool::SlotState;

    enum Step {
        Unit(AccessUnit),
        Again,
        Fail,
    }

    struct ScriptedDemuxer(VecDeque<Step>);

    impl Demuxer for ScriptedDemuxer {
        fn codec(&self) -> Codec {
            Codec::H264
        }

        fn resolution(&self) -> Resolution {
            Resolution::new(64, 32)
        }

        fn stream_start_offset(&self) -> i64 {
            100
        }

        fn next_access_unit(&mut self) -> DemuxResult<Option<AccessUnit>> {
            match self.0.pop_front() {
                None => Ok(None),
                Some(Step::Unit(unit)) => Ok(Some(unit)),
                Some(Step::Again) => Err(DemuxError::Again),
                Some(Step::Fail) => Err(DemuxError::Truncated),
            }
        }
    }

    fn unit(len: usize, dts: i64, is_sync: bool) -> Step {
        Step::Unit(AccessUnit {
            data: vec![0xab; len],
            pts: Some(dts + 200),
            dts: Some(dts),
            duration: Some(40),
            is_sync,
        })
    }

    fn session(driver: &Arc<RecordingDriver>, inputs: usize) -> Arc<Session> {
        let memories = (0..inputs)
            .map(|_| ShmAllocator.allocate("feeder_test", 4096).unwrap())
            .collect();
        Session::new(
            driver.clone(),
            InputPool::new(memories),
            Resolution::new(64, 32),
            false,
        )
        .unwrap()
    }

    fn feed(session: &Session, steps: Vec<Step>) -> DecoderResult<()> {
        let mut demuxer = ScriptedDemuxer(steps.into());
        let mut preparer = StreamPreparer::new(Codec::H264, &[]);
        run_feeder(session, &mut demuxer, &mut preparer)
    }

    #[test]
    fn feeds_units_then_end_of_stream() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 4);
        feed(
            &session,
            vec![unit(10, 0, true), Step::Again, unit(20, 40, false)],
        )
        .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SubmitInput {
                    index: 0,
                    bytes_used: 10,
                    flags: BufferFlags::KEY_FRAME,
                    timestamp: 200,
                },
                DriverCall::SubmitInput {
                    index: 1,
                    bytes_used: 20,
                    flags: BufferFlags::empty(),
                    timestamp: 240,
                },
                DriverCall::SubmitInput {
                    index: 2,
                    bytes_used: 0,
                    flags: BufferFlags::END_OF_STREAM | BufferFlags::TIMESTAMP_INVALID,
                    timestamp: 0,
                },
            ]
        );
        let inner = session.lock();
        assert_eq!(inner.tracker.len(), 2);
        assert_eq!(inner.stats.units_submitted, 2);
        assert_eq!(inner.input_pool.state(2), Some(SlotState::Queued));
    }

    #[test]
    fn oversized_units_are_dropped() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 2);
        feed(&session, vec![unit(5000, 0, true), unit(8, 40, false)]).unwrap();
        let stats = session.stats();
        assert_eq!(stats.units_dropped, 1);
        assert_eq!(stats.units_submitted, 1);
        assert_eq!(session.lock().tracker.len(), 1);
    }

    #[test]
    fn refused_unit_is_queued_again() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 4);
        driver.fail_times("submit_input", 2);
        feed(&session, vec![unit(10, 0, true), unit(20, 40, false)]).unwrap();

        let calls = driver.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(
            calls[0],
            DriverCall::SubmitInput {
                index: 0,
                bytes_used: 10,
                timestamp: 200,
                ..
            }
        ));
        let stats = session.stats();
        assert_eq!(stats.units_submitted, 2);
        assert_eq!(stats.units_dropped, 0);
        assert_eq!(session.lock().tracker.len(), 2);
        assert!(!session.state().failed);
    }

    #[test]
    fn refused_end_of_stream_is_queued_again() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 2);
        driver.fail_times("submit_input", 1);
        feed(&session, Vec::new()).unwrap();
        assert!(matches!(
            driver.calls()[..],
            [DriverCall::SubmitInput { index: 0, bytes_used: 0, flags, .. }]
                if flags.contains(BufferFlags::END_OF_STREAM)
        ));
        assert_eq!(session.lock().input_pool.state(0), Some(SlotState::Queued));
        assert!(!session.state().failed);
    }

    #[test]
    fn finished_session_stops_retrying() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 1);
        driver.fail_on("submit_input");
        let feeder = {
            let session = session.clone();
            thread::spawn(move || feed(&session, vec![unit(8, 0, true)]))
        };
        thread::sleep(Duration::from_millis(20));
        session.finish();
        feeder.join().unwrap().unwrap();
        assert!(driver.calls().is_empty());
        assert_eq!(session.stats().units_submitted, 0);
    }

    #[test]
    fn demux_failure_ends_the_stream() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 2);
        feed(&session, vec![unit(8, 0, true), Step::Fail, unit(8, 40, false)]).unwrap();
        let calls = driver.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(
            calls[1],
            DriverCall::SubmitInput { bytes_used: 0, flags, .. }
                if flags.contains(BufferFlags::END_OF_STREAM)
        ));
    }

    #[test]
    fn waits_for_completed_inputs() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 1);
        let feeder = {
            let session = session.clone();
            thread::spawn(move || feed(&session, vec![unit(8, 0, true), unit(8, 40, false)]))
        };
        for _ in 0..2 {
            while session.lock().input_pool.queued_count() == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            session.complete_input(0).unwrap();
        }
        feeder.join().unwrap().unwrap();
        assert_eq!(driver.calls().len(), 3);
    }

    #[test]
    fn finished_session_stops_feeding() {
        let driver = RecordingDriver::new();
        let session = session(&driver, 1);
        session.finish();
        feed(&session, vec![unit(8, 0, true)]).unwrap();
        assert!(driver.calls().is_empty());
    }
}
