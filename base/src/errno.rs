// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fmt::Display;
use std::io;
use std::result;

/// An errno value returned by a failed libc call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error(i32);
pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// Constructs a new error with the given error number.
    pub fn new<T: TryInto<i32>>(e: T) -> Error {
        Error(e.try_into().unwrap_or_default())
    }

    /// Constructs an Error from the most recent system error.
    ///
    /// Only meaningful right after a libc call that reported failure.
    pub fn last() -> Error {
        Error(io::Error::last_os_error().raw_os_error().unwrap_or_default())
    }

    pub fn errno(self) -> i32 {
        self.0
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error(e.raw_os_error().unwrap_or_default())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::from_raw_os_error(e.0)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Into::<io::Error>::into(*self).fmt(f)
    }
}

/// Returns the last errno as a Result that is always an error.
pub fn errno_result<T>() -> Result<T> {
    Err(Error::last())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_round_trip_keeps_errno() {
        let err = Error::new(libc::EAGAIN);
        let io_err: io::Error = err.into();
        assert_eq!(io_err.raw_os_error(), Some(libc::EAGAIN));
        assert_eq!(Error::from(io_err), err);
    }
}
