// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time;

/// Default chunk size used when streaming upload/download payloads
/// through the shell channel's stdin/stdout.
pub const COPY_BUFSIZE: usize = 64 * 1024;

/// Exit code used when a download's remote-reported length is negative
/// (length determination failed on the remote side).
pub const LENGTH_UNAVAILABLE_CODE: i32 = 23;

/// Minimum number of decimal digits a framing token must have. Tokens
/// are drawn from a uniform distribution over a wide range so that
/// accidental collision with command output is vanishingly unlikely;
/// this is a probabilistic guarantee, not an absolute one.
pub const TOKEN_MIN_DIGITS: usize = 10;

/// How long a channel read may block before the channel is considered
/// lost.
pub const READ_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// git-annex's on-disk layout version this store glue writes/expects
/// by default.
pub const LAYOUT_VERSION: &str = "1";

/// The overridable knobs of a [`crate::shell::ShellChannel`]/
/// [`crate::shell::ShellWorker`]: how large a chunk to move per read
/// and how long a read may block before the channel is given up for
/// lost. Defaults match [`COPY_BUFSIZE`]/[`READ_TIMEOUT`]; `ria-cli`
/// overrides either from its config file.
#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    pub copy_bufsize: usize,
    pub read_timeout: time::Duration,
}

impl Default for ShellOptions {
    fn default() -> Self {
        ShellOptions { copy_bufsize: COPY_BUFSIZE, read_timeout: READ_TIMEOUT }
    }
}
