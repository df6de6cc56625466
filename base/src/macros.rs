// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Retries a libc call returning a negative value with `errno == EINTR` until it stops being
/// interrupted.
macro_rules! handle_eintr_errno {
    ($x:expr) => {{
        let mut res;
        loop {
            res = $x;
            if res != -1 || $crate::Error::last().errno() != libc::EINTR {
                break;
            }
        }
        res
    }};
}
