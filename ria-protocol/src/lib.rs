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

//! Data model shared across the RIA store transport: the opaque annex
//! key, the dataset id, the closed error variant callers can match on,
//! and the reporter capability a handler is constructed with.

use std::fmt;

mod key;
mod scheme;

pub use key::{DatasetId, Key};
pub use scheme::Scheme;

/// The outcome of every fallible operation this workspace exposes.
pub type Result<T> = std::result::Result<T, RiaError>;

/// Why the shell channel or the child process behind it became unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellLostReason {
    /// The child process exited before the expected framing was seen.
    ChildExited { code: Option<i32> },
    /// stdout reached EOF without ever producing the expected sentinel.
    StdoutEof,
    /// A read on the channel exceeded its configured timeout.
    ReadTimeout,
}

impl fmt::Display for ShellLostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellLostReason::ChildExited { code: Some(c) } => {
                write!(f, "child process exited with code {c}")
            }
            ShellLostReason::ChildExited { code: None } => {
                write!(f, "child process exited (no exit code, likely a signal)")
            }
            ShellLostReason::StdoutEof => write!(f, "stdout reached EOF before framing completed"),
            ShellLostReason::ReadTimeout => write!(f, "read on the shell channel timed out"),
        }
    }
}

/// The closed set of errors this workspace can surface to a caller.
///
/// This mirrors the error-kind table in the design: each variant names
/// a condition a caller might reasonably want to match on and react to
/// differently (e.g. `KeyNotPresent` is not fatal, `ShellLost` means the
/// handler needs to be re-prepared before it can be used again).
#[derive(Debug, thiserror::Error)]
pub enum RiaError {
    /// Missing/invalid URL, missing/invalid dataset id, or an
    /// unsupported `ria+<scheme>` prefix.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The persistent shell channel (and the process behind it) is no
    /// longer usable. The handler must be re-prepared before further
    /// use.
    #[error("shell lost: {0}")]
    ShellLost(ShellLostReason),

    /// A remote command completed with a nonzero exit code.
    #[error("command `{cmd}` failed with code {code}: {stderr}")]
    RemoteCommandFailed { cmd: String, code: i32, stdout: Vec<u8>, stderr: Vec<u8> },

    /// An upload or download's length/return-code framing did not add
    /// up (e.g. the remote reported a negative length, or a nonzero
    /// return code after the byte stream completed).
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// `transfer_retrieve` was asked for a key that is not present.
    #[error("key not present: {0}")]
    KeyNotPresent(String),

    /// A local filesystem operation failed.
    #[error("local I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// `ensure_writable` was asked to toggle the writable bit on
    /// something that is not a plain file or directory (e.g. a
    /// symlink or device node); refused rather than chmod'd.
    #[error("refusing to toggle permissions on non-file/non-directory: {0}")]
    PermissionRefused(String),
}

/// The capability a handler needs from its caller: progress and debug
/// reporting. Supplied at construction time (dependency injection)
/// rather than held as a back-pointer into the caller's own object.
pub trait Reporter: Send + Sync {
    /// Called after each chunk of an upload/download is transferred.
    fn progress(&self, done: u64, total: u64) {
        let _ = (done, total);
    }

    /// A low-level diagnostic message, roughly `DEBUG` level.
    fn debug(&self, msg: &str) {
        let _ = msg;
    }

    /// A user-facing informational message.
    fn info(&self, msg: &str) {
        let _ = msg;
    }
}

/// A [`Reporter`] that discards everything. Useful for tests and for
/// callers that don't care about progress/debug feedback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}
