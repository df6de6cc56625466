// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Where decoded pictures go.

mod dump;

use std::fmt;
use std::io;
use std::sync::Arc;

use base::AsRawDescriptor;
use remain::sorted;
use thiserror::Error as ThisError;

pub use self::dump::FrameDumpSink;
use crate::format::AspectRatio;
use crate::format::OutputFormat;
use crate::memory::BufferMemory;
use crate::timestamp::PresentationTime;

#[sorted]
#[derive(Debug, ThisError)]
pub enum SinkError {
    #[error("failed to create sink event: {0}")]
    CreateEvent(base::Error),
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("picture shown before the sink was configured")]
    NotConfigured,
    #[error("sink worker thread is gone")]
    WorkerGone,
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Requests coming from the person watching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UserInput {
    Quit,
    TogglePause,
    FrameStep,
    ToggleFullscreen,
}

/// A decoded picture lent to the sink.
pub struct Picture {
    /// Output slot the picture lives in.
    pub index: usize,
    pub generation: u64,
    pub memory: Arc<BufferMemory>,
    pub bytes_used: usize,
    pub timestamp: PresentationTime,
    /// Position in presentation order, starting at 0.
    pub sequence: u64,
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Picture")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("bytes_used", &self.bytes_used)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Gives a picture's buffer back to the decoder. Runs exactly once: on `release()`, or when
/// dropped without having been released.
pub struct ReleaseCallback {
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseCallback {
    pub fn new<F: FnOnce() + Send + 'static>(callback: F) -> ReleaseCallback {
        ReleaseCallback {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl Drop for ReleaseCallback {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for ReleaseCallback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReleaseCallback")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A display or any other consumer of decoded pictures.
///
/// The sink owns a picture's buffer from `show` until the matching `ReleaseCallback` runs, which
/// may happen on any thread.
pub trait PresentationSink: Send {
    /// Called before the first picture and after every output reconfiguration.
    fn configure(
        &mut self,
        format: &OutputFormat,
        aspect_ratio: Option<AspectRatio>,
    ) -> SinkResult<()>;

    fn show(&mut self, picture: Picture, release: ReleaseCallback) -> SinkResult<()>;

    /// Readable when `dispatch` has work to do.
    fn event_source(&self) -> &dyn AsRawDescriptor;

    /// Services the event source and returns the user input it produced.
    fn dispatch(&mut self) -> SinkResult<Vec<UserInput>>;

    /// `false` once the sink was closed and the session should end.
    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn release_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let release = ReleaseCallback::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        release.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        drop(ReleaseCallback::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
