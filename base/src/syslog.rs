// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide logger setup.
//!
//! Records go through the `log` facade (re-exported from this crate) and are formatted by an
//! `env_logger` logger as
//! `[<UTC timestamp> <LEVEL> <proc>] [file:line] message`.
//!
//! ```
//! use base::syslog;
//!
//! if let Err(e) = syslog::init() {
//!     eprintln!("failed to initialize logging: {}", e);
//! }
//! base::warn!("this is your {} warning", "final");
//! ```

use std::env;
use std::io::Write;
use std::path::Path;

use remain::sorted;
use thiserror::Error as ThisError;

/// Errors returned by `syslog::init_with()`.
#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// A logger was already installed for this process.
    #[error("a logger is already installed: {0}")]
    AlreadyInitialized(log::SetLoggerError),
}

/// Logger configuration.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// `env_logger` filter directives, e.g. `info` or `warn,decoder::worker=trace`.
    pub filter: String,
    /// Name printed in each line. Defaults to the executable name.
    pub proc_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: String::from("info"),
            proc_name: get_proc_name().unwrap_or_else(|| String::from("vdec")),
        }
    }
}

fn get_proc_name() -> Option<String> {
    env::args_os()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
}

/// Installs the logger with the default configuration.
pub fn init() -> Result<(), Error> {
    init_with(LogConfig::default())
}

/// Installs the logger. Only the first call in a process succeeds.
pub fn init_with(cfg: LogConfig) -> Result<(), Error> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&cfg.filter);
    builder.target(env_logger::Target::Stderr);
    let proc_name = cfg.proc_name;
    builder.format(move |buf, record| {
        write!(
            buf,
            "[{} {:5} {}] ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            record.level(),
            proc_name,
        )?;
        if let Some(path) = record.file() {
            write!(buf, "[{}", path)?;
            if let Some(line) = record.line() {
                write!(buf, ":{}", line)?;
            }
            write!(buf, "] ")?;
        }
        writeln!(buf, "{}", record.args())
    });
    builder.try_init().map_err(Error::AlreadyInitialized)
}
