// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::io;
use std::io::BufRead;
use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;

use base::debug;
use base::error;
use base::info;
use base::AsRawDescriptor;

use super::Picture;
use super::PresentationSink;
use super::ReleaseCallback;
use super::SinkError;
use super::SinkResult;
use super::UserInput;
use crate::format::AspectRatio;
use crate::format::OutputFormat;
use crate::utils::SyncEventQueue;

struct DumpJob {
    picture: Picture,
    release: ReleaseCallback,
}

/// Writes every picture to `<dir>/frameNNNN.nv12` from a dedicated thread, which also gives the
/// buffer back once the file is written.
pub struct FrameDumpSink {
    format: Option<OutputFormat>,
    jobs: Option<mpsc::Sender<DumpJob>>,
    writer: Option<JoinHandle<()>>,
    inputs: SyncEventQueue<UserInput>,
}

impl FrameDumpSink {
    /// With `interactive`, single-letter commands read from stdin are reported as user input.
    pub fn new(dir: &Path, interactive: bool) -> SinkResult<FrameDumpSink> {
        fs::create_dir_all(dir)?;
        let dir = dir.to_path_buf();
        let (jobs, job_rx) = mpsc::channel::<DumpJob>();
        let writer = thread::Builder::new()
            .name("frame_dump".into())
            .spawn(move || {
                for job in job_rx {
                    if let Err(e) = write_picture(&dir, &job.picture) {
                        error!("failed to save picture {}: {}", job.picture.sequence, e);
                    }
                    job.release.release();
                }
            })?;

        let inputs = SyncEventQueue::new().map_err(SinkError::CreateEvent)?;
        if interactive {
            let queue = inputs.clone();
            thread::Builder::new()
                .name("stdin_commands".into())
                .spawn(move || read_commands(io::stdin().lock(), &queue))?;
        }

        Ok(FrameDumpSink {
            format: None,
            jobs: Some(jobs),
            writer: Some(writer),
            inputs,
        })
    }
}

fn picture_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("frame{:04}.nv12", sequence))
}

fn write_picture(dir: &Path, picture: &Picture) -> io::Result<()> {
    let data = picture
        .memory
        .to_vec(picture.bytes_used)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    fs::write(picture_path(dir, picture.sequence), data)
}

/// Maps a line typed on the terminal to user input. Unknown characters are ignored.
pub fn parse_commands(line: &str) -> Vec<UserInput> {
    line.chars()
        .filter_map(|c| match c.to_ascii_lowercase() {
            'q' => Some(UserInput::Quit),
            ' ' | 'p' => Some(UserInput::TogglePause),
            's' => Some(UserInput::FrameStep),
            'f' => Some(UserInput::ToggleFullscreen),
            _ => None,
        })
        .collect()
}

fn read_commands<R: BufRead>(reader: R, queue: &SyncEventQueue<UserInput>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("failed to read commands: {}", e);
                return;
            }
        };
        for input in parse_commands(&line) {
            if let Err(e) = queue.queue_event(input) {
                error!("failed to queue user input: {}", e);
                return;
            }
        }
    }
    debug!("end of command input");
}

impl PresentationSink for FrameDumpSink {
    fn configure(
        &mut self,
        format: &OutputFormat,
        aspect_ratio: Option<AspectRatio>,
    ) -> SinkResult<()> {
        info!(
            "saving {:?} frames {} (stride {}, {} bytes), aspect ratio {:?}",
            format.pixel_format,
            format.resolution,
            format.stride,
            format.buffer_size,
            aspect_ratio
        );
        self.format = Some(*format);
        Ok(())
    }

    fn show(&mut self, picture: Picture, release: ReleaseCallback) -> SinkResult<()> {
        if self.format.is_none() {
            return Err(SinkError::NotConfigured);
        }
        let jobs = self.jobs.as_ref().ok_or(SinkError::WorkerGone)?;
        // A failed send hands the job back; dropping it releases the picture.
        jobs.send(DumpJob { picture, release })
            .map_err(|_| SinkError::WorkerGone)
    }

    fn event_source(&self) -> &dyn AsRawDescriptor {
        &self.inputs
    }

    fn dispatch(&mut self) -> SinkResult<Vec<UserInput>> {
        let mut inputs = Vec::new();
        while let Some(input) = self
            .inputs
            .dequeue_event()
            .map_err(|e| SinkError::Io(e.into()))?
        {
            inputs.push(input);
        }
        Ok(inputs)
    }

    fn is_running(&self) -> bool {
        self.writer.as_ref().map_or(false, |w| !w.is_finished())
    }
}

impl Drop for FrameDumpSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish the backlog and exit.
        self.jobs.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("frame dump thread panicked");
            }
        }
    }
}
