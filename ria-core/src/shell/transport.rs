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

//! Bulk byte transfer over a [`ShellChannel`]: upload embeds the
//! payload length directly in the remote command (`head -c N`) since
//! the local side always knows it upfront; download can't do that
//! (the remote side knows the length, we don't), so the remote command
//! is made to report it as the first line of its own output, which we
//! parse with a small state machine before reading the raw body.

use std::io::{Read, Write};

use ria_protocol::{Reporter, Result as RiaResult, RiaError};

use super::channel::ShellChannel;
use crate::consts::LENGTH_UNAVAILABLE_CODE;

/// Upload exactly `total_len` bytes read from `source` to `remote_cmd`,
/// a shell command expected to consume exactly that many bytes from
/// its stdin (e.g. `head -c 1234 > /remote/path`). `copy_bufsize` sizes
/// the local read buffer; it has no bearing on wire framing.
pub fn upload(
    channel: &mut ShellChannel,
    remote_cmd: &str,
    source: &mut dyn Read,
    total_len: u64,
    reporter: &dyn Reporter,
    copy_bufsize: usize,
) -> RiaResult<()> {
    let pending = channel.begin_command(remote_cmd)?;

    let mut sent: u64 = 0;
    let mut buf = vec![0u8; copy_bufsize];
    while sent < total_len {
        let want = ((total_len - sent) as usize).min(buf.len());
        let n = source.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        channel.write_payload(&buf[..n])?;
        sent += n as u64;
        reporter.progress(sent, total_len);
    }

    let output = channel.finish_command(pending)?;
    if output.status != 0 {
        return Err(RiaError::TransferFailed(format!(
            "upload command exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    if sent < total_len {
        return Err(RiaError::TransferFailed(format!(
            "local source exhausted after {sent} of {total_len} bytes"
        )));
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum DownloadState {
    WaitLength,
    ReadBody,
    ReadRetcode,
    Done,
}

/// Download a file by running `remote_cmd`, a shell command expected
/// to write exactly: a decimal length and newline, then that many raw
/// body bytes, then a decimal return code and newline. A negative
/// length means the remote side failed to determine it; in that case
/// no body follows and the call fails immediately.
pub fn download(
    channel: &mut ShellChannel,
    remote_cmd: &str,
    sink: &mut dyn Write,
    reporter: &dyn Reporter,
) -> RiaResult<()> {
    // This protocol doesn't use the tag/status sentinel framing at
    // all: the remote command's own output *is* the response, read
    // directly off the raw stdout stream.
    channel.write_command_line(remote_cmd)?;

    let mut state = DownloadState::WaitLength;
    // Bytes pulled off the wire but not yet consumed by the current
    // phase; carried across chunk boundaries (a length, a body, or a
    // retcode frame need not align with how the transport chunked it).
    let mut buf: Vec<u8> = Vec::new();
    let mut length: u64 = 0;
    let mut read: u64 = 0;
    let mut retcode_digits = Vec::new();

    while state != DownloadState::Done {
        let made_progress = match state {
            DownloadState::WaitLength => {
                if let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                    let digits = buf[..nl].to_vec();
                    buf.drain(..=nl);
                    let parsed: i64 = std::str::from_utf8(&digits)
                        .ok()
                        .and_then(|s| s.trim().parse().ok())
                        .ok_or_else(|| {
                            RiaError::TransferFailed(format!("malformed length frame: {digits:?}"))
                        })?;
                    if parsed < 0 {
                        return Err(RiaError::TransferFailed(format!(
                            "remote could not determine download length (code {LENGTH_UNAVAILABLE_CODE})"
                        )));
                    }
                    length = parsed as u64;
                    state = DownloadState::ReadBody;
                    true
                } else {
                    false
                }
            }
            DownloadState::ReadBody => {
                let take = ((length - read) as usize).min(buf.len());
                if take > 0 {
                    sink.write_all(&buf[..take])?;
                    read += take as u64;
                    reporter.progress(read, length);
                    buf.drain(..take);
                }
                if read >= length {
                    state = DownloadState::ReadRetcode;
                    true
                } else {
                    take > 0
                }
            }
            DownloadState::ReadRetcode => {
                if let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                    retcode_digits.extend_from_slice(&buf[..nl]);
                    buf.drain(..=nl);
                    state = DownloadState::Done;
                    true
                } else if !buf.is_empty() {
                    retcode_digits.extend_from_slice(&buf);
                    buf.clear();
                    true
                } else {
                    false
                }
            }
            DownloadState::Done => unreachable!(),
        };

        if !made_progress {
            buf.extend_from_slice(&channel.next_raw_stdout_chunk()?);
        }
    }

    let code: i32 = std::str::from_utf8(&retcode_digits)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            RiaError::TransferFailed(format!("malformed return code frame: {retcode_digits:?}"))
        })?;
    if code != 0 {
        return Err(RiaError::TransferFailed(format!("download command exited with status {code}")));
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ria_protocol::NoopReporter;

    use super::*;
    use crate::consts::ShellOptions;

    fn sh() -> ShellChannel {
        ShellChannel::spawn("/bin/sh", &[], ShellOptions::default()).expect("spawning /bin/sh for tests")
    }

    #[test]
    fn upload_then_cat_back_round_trips() {
        let mut channel = sh();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploaded.bin");
        let payload = b"some bytes to carry over the wire\n".to_vec();

        let mut src = Cursor::new(payload.clone());
        upload(
            &mut channel,
            &format!("head -c {} > {}", payload.len(), path.display()),
            &mut src,
            payload.len() as u64,
            &NoopReporter,
            ShellOptions::default().copy_bufsize,
        )
        .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn download_reads_length_prefixed_body() {
        let mut channel = sh();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("to_download.bin");
        let payload = b"downloaded payload\n".to_vec();
        std::fs::write(&path, &payload).unwrap();

        let mut out = Vec::new();
        download(
            &mut channel,
            &format!("wc -c < {p} ; cat {p}; echo $?", p = path.display()),
            &mut out,
            &NoopReporter,
        )
        .unwrap();

        assert_eq!(out, payload);
    }

    #[test]
    fn download_reports_negative_length_as_failure() {
        let mut channel = sh();
        let mut out = Vec::new();
        let err = download(&mut channel, "echo -1", &mut out, &NoopReporter).unwrap_err();
        assert!(matches!(err, RiaError::TransferFailed(_)));
    }
}
