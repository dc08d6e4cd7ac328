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

//! A persistent remote shell reached over one long-lived child process
//! (typically `ssh user@host`, but any interactive `/bin/sh`-compatible
//! command works, which is what the test suite uses).
//!
//! The process' login banner is swallowed once at construction time,
//! after which [`ShellChannel::begin_command`]/[`finish_command`] frame
//! each command's stdout/stderr against a pair of random per-command
//! tokens so that ordinary command output can never be mistaken for
//! end-of-response framing.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use ria_protocol::{Result as RiaResult, RiaError, ShellLostReason};
use tracing::{debug, instrument, warn};

use crate::consts::{ShellOptions, TOKEN_MIN_DIGITS};
use crate::pattern_filter::PatternFilter;

enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    StdoutEof,
    StderrEof,
}

/// Captured stdout/stderr and the shell-reported exit status of one
/// framed command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: i32,
}

/// An in-progress command: its tag has been written and echoed back to
/// the shell, but the response hasn't been collected yet. Lets a caller
/// (the upload transport) inject raw bytes on stdin between issuing the
/// command and reading its response.
pub struct PendingCommand {
    stdout_filter: PatternFilter,
    status_filter: PatternFilter,
}

fn random_token(prefix: &str) -> String {
    let lower = 10u64.pow(TOKEN_MIN_DIGITS as u32 - 1);
    let upper = 10u64.pow(TOKEN_MIN_DIGITS as u32);
    let n: u64 = rand::thread_rng().gen_range(lower..upper);
    format!("{prefix}{n}")
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    tx: Sender<ChannelEvent>,
    wrap: fn(Vec<u8>) -> ChannelEvent,
    eof: fn() -> ChannelEvent,
    copy_bufsize: usize,
) {
    thread::spawn(move || {
        let mut buf = vec![0u8; copy_bufsize];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(eof());
                    return;
                }
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(_) => {
                    let _ = tx.send(eof());
                    return;
                }
            }
        }
    });
}

pub struct ShellChannel {
    child: Child,
    stdin: ChildStdin,
    events: Receiver<ChannelEvent>,
    read_timeout: time::Duration,
}

impl ShellChannel {
    /// Spawn `program args...` and swallow whatever login banner it
    /// prints before accepting commands.
    #[instrument(skip_all, fields(program))]
    pub fn spawn(program: &str, args: &[String], options: ShellOptions) -> RiaResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = crossbeam_channel::unbounded();
        spawn_reader(stdout, tx.clone(), ChannelEvent::Stdout, || ChannelEvent::StdoutEof, options.copy_bufsize);
        spawn_reader(stderr, tx, ChannelEvent::Stderr, || ChannelEvent::StderrEof, options.copy_bufsize);

        let mut channel =
            ShellChannel { child, stdin, events: rx, read_timeout: options.read_timeout };
        channel.swallow_login_banner()?;
        Ok(channel)
    }

    fn recv_event(&mut self) -> RiaResult<ChannelEvent> {
        match self.events.recv_timeout(self.read_timeout) {
            Ok(ev) => Ok(ev),
            Err(RecvTimeoutError::Timeout) => Err(self.lost(ShellLostReason::ReadTimeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.lost(ShellLostReason::StdoutEof)),
        }
    }

    fn lost(&mut self, fallback: ShellLostReason) -> RiaError {
        if let Ok(Some(status)) = self.child.try_wait() {
            return RiaError::ShellLost(ShellLostReason::ChildExited { code: status.code() });
        }
        RiaError::ShellLost(fallback)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> RiaResult<()> {
        self.stdin.write_all(bytes)?;
        self.stdin.flush()?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn swallow_login_banner(&mut self) -> RiaResult<()> {
        let tag = random_token("login-end-");
        let pattern = format!("{tag}\n");
        self.write_raw(format!("echo {tag}\n").as_bytes())?;

        let mut filter = PatternFilter::new(pattern.into_bytes());
        loop {
            match self.recv_event()? {
                ChannelEvent::Stdout(chunk) => {
                    let (_before, found, _after) = filter.filter(&chunk);
                    if found {
                        debug!("login banner swallowed");
                        return Ok(());
                    }
                }
                ChannelEvent::StdoutEof => return Err(self.lost(ShellLostReason::StdoutEof)),
                ChannelEvent::Stderr(data) => {
                    warn!("stderr during login: {:?}", String::from_utf8_lossy(&data));
                }
                ChannelEvent::StderrEof => {}
            }
        }
    }

    /// Write `command` extended with end-of-response framing, without
    /// waiting for the response. Lets a caller stream raw bytes on
    /// stdin (e.g. an upload payload) before calling
    /// [`ShellChannel::finish_command`].
    pub fn begin_command(&mut self, command: &str) -> RiaResult<PendingCommand> {
        let tag = random_token("ria-cmd-");
        let stdout_pattern = format!("\n{tag}\n");
        let status_pattern = format!("{tag}: ");
        let framed = format!(
            "{command}; __ria_status=$?; echo; echo \"{tag}\"; echo \"{tag}: $__ria_status\" >&2\n"
        );
        self.write_raw(framed.as_bytes())?;
        Ok(PendingCommand {
            stdout_filter: PatternFilter::new(stdout_pattern.into_bytes()),
            status_filter: PatternFilter::new(status_pattern.into_bytes()),
        })
    }

    /// Write a bare command line, no sentinel framing at all. Used by
    /// the download transport, whose own response is the length/body/
    /// retcode protocol rather than the tag/status sentinel dance.
    pub fn write_command_line(&mut self, command: &str) -> RiaResult<()> {
        self.write_raw(format!("{command}\n").as_bytes())
    }

    /// Write raw bytes directly to the child's stdin, with no framing.
    /// Only meaningful between [`begin_command`](Self::begin_command)
    /// and [`finish_command`](Self::finish_command), to inject a
    /// payload a previously-issued command (e.g. `head -c N > file`)
    /// is already waiting to consume.
    pub fn write_payload(&mut self, bytes: &[u8]) -> RiaResult<()> {
        self.write_raw(bytes)
    }

    /// Collect the response to a command started with
    /// [`begin_command`](Self::begin_command).
    pub fn finish_command(&mut self, mut pending: PendingCommand) -> RiaResult<CommandOutput> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status_buf: Option<Vec<u8>> = None;
        let mut stdout_done = false;
        let mut status: Option<i32> = None;

        while status.is_none() || !stdout_done {
            match self.recv_event()? {
                ChannelEvent::Stdout(chunk) => {
                    if !stdout_done {
                        let (before, found, after) = pending.stdout_filter.filter(&chunk);
                        stdout.extend_from_slice(&before);
                        if found {
                            stdout_done = true;
                            stdout.extend_from_slice(&after);
                        }
                    }
                }
                ChannelEvent::Stderr(chunk) => {
                    if let Some(buf) = status_buf.as_mut() {
                        buf.extend_from_slice(&chunk);
                    } else {
                        let (before, found, after) = pending.status_filter.filter(&chunk);
                        stderr.extend_from_slice(&before);
                        if found {
                            status_buf = Some(after);
                        }
                    }
                    if let Some(buf) = status_buf.as_mut() {
                        if let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                            let digits = buf[..nl].to_vec();
                            let code = std::str::from_utf8(&digits)
                                .ok()
                                .and_then(|s| s.trim().parse::<i32>().ok())
                                .ok_or_else(|| {
                                    RiaError::TransferFailed(format!(
                                        "malformed status frame: {digits:?}"
                                    ))
                                })?;
                            status = Some(code);
                        }
                    }
                }
                ChannelEvent::StdoutEof | ChannelEvent::StderrEof => {
                    return Err(self.lost(ShellLostReason::StdoutEof));
                }
            }
        }

        Ok(CommandOutput { stdout, stderr, status: status.expect("loop invariant") })
    }

    /// Run `command` to completion and return its framed response.
    #[instrument(skip(self))]
    pub fn run_command(&mut self, command: &str) -> RiaResult<CommandOutput> {
        let pending = self.begin_command(command)?;
        self.finish_command(pending)
    }

    /// Pull the next raw stdout chunk off the wire, for protocols (like
    /// download) that read length-prefixed binary payloads rather than
    /// sentinel-framed text. Any interleaved stderr is logged and
    /// discarded: well-formed download commands never write to stderr.
    pub fn next_raw_stdout_chunk(&mut self) -> RiaResult<Vec<u8>> {
        loop {
            match self.recv_event()? {
                ChannelEvent::Stdout(chunk) => return Ok(chunk),
                ChannelEvent::Stderr(data) => {
                    warn!("unexpected stderr during raw read: {:?}", String::from_utf8_lossy(&data));
                }
                ChannelEvent::StdoutEof | ChannelEvent::StderrEof => {
                    return Err(self.lost(ShellLostReason::StdoutEof));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> ShellChannel {
        ShellChannel::spawn("/bin/sh", &[], ShellOptions::default()).expect("spawning /bin/sh for tests")
    }

    #[test]
    fn swallows_banner_and_runs_a_command() {
        let mut channel = sh();
        let out = channel.run_command("echo hello").unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr, b"");
    }

    #[test]
    fn swallows_a_multi_line_login_banner() {
        // Stand in for a login shell that prints a multi-line MOTD
        // before becoming interactive: the banner-swallow loop must
        // consume all of it and the first real command still sees
        // exactly its own output.
        let mut channel = ShellChannel::spawn(
            "/bin/sh",
            &["-c".to_string(), "echo line1; echo line2; echo line3; exec /bin/sh".to_string()],
            ShellOptions::default(),
        )
        .unwrap();
        let out = channel.run_command("echo hi").unwrap();
        assert_eq!(out.stdout, b"hi\n");
    }

    #[test]
    fn captures_nonzero_exit_status() {
        let mut channel = sh();
        let out = channel.run_command("exit 7").unwrap();
        assert_eq!(out.status, 7);
    }

    #[test]
    fn captures_stderr_separately() {
        let mut channel = sh();
        let out = channel.run_command("echo oops 1>&2").unwrap();
        assert_eq!(out.stdout, b"");
        assert_eq!(out.stderr, b"oops\n");
        assert_eq!(out.status, 0);
    }

    #[test]
    fn runs_several_commands_in_sequence() {
        let mut channel = sh();
        for i in 0..5 {
            let out = channel.run_command(&format!("echo {i}")).unwrap();
            assert_eq!(out.stdout, format!("{i}\n").into_bytes());
        }
    }
}
