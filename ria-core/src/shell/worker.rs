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

//! A single consumer thread that owns one [`ShellChannel`] and executes
//! requests handed to it through a FIFO queue, so that every other
//! thread in the process sees one sequential, serialized shell.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use ria_protocol::{Reporter, Result as RiaResult, RiaError, ShellLostReason};
use tracing::{instrument, warn};

use super::channel::{CommandOutput, ShellChannel};
use super::transport;
use crate::consts::ShellOptions;

enum WorkerRequest {
    Execute { command: String, reply: Sender<RiaResult<CommandOutput>> },
    Upload {
        local_path: PathBuf,
        remote_cmd: String,
        total_len: u64,
        reporter: Arc<dyn Reporter>,
        reply: Sender<RiaResult<()>>,
    },
    Download {
        remote_cmd: String,
        local_path: PathBuf,
        reporter: Arc<dyn Reporter>,
        reply: Sender<RiaResult<()>>,
    },
    Shutdown { reply: Sender<()> },
}

fn disconnected() -> RiaError {
    RiaError::ShellLost(ShellLostReason::ChildExited { code: None })
}

/// A persistent shell, fronted by a single worker thread that processes
/// one request at a time. Safe to call from multiple threads: calls
/// serialize on `run_lock`, and the worker only ever does one thing at
/// once regardless.
pub struct ShellWorker {
    request_tx: Sender<WorkerRequest>,
    join: Mutex<Option<JoinHandle<()>>>,
    run_lock: Mutex<()>,
}

impl ShellWorker {
    /// Spawn `program args...` as the persistent shell and start the
    /// worker thread. Blocks until the shell has been spawned and its
    /// login banner swallowed (or that setup has failed).
    pub fn spawn(program: impl Into<String>, args: Vec<String>) -> RiaResult<Self> {
        Self::spawn_with_options(program, args, ShellOptions::default())
    }

    /// Like [`spawn`](Self::spawn), overriding the channel's default
    /// copy buffer size and read timeout.
    pub fn spawn_with_options(
        program: impl Into<String>,
        args: Vec<String>,
        options: ShellOptions,
    ) -> RiaResult<Self> {
        let program = program.into();
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<WorkerRequest>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<RiaResult<()>>(1);

        let join = thread::spawn(move || {
            let channel = match ShellChannel::spawn(&program, &args, options) {
                Ok(c) => {
                    let _ = ready_tx.send(Ok(()));
                    c
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            consumer_loop(channel, request_rx, options.copy_bufsize);
        });

        ready_rx.recv().map_err(|_| disconnected())??;
        Ok(ShellWorker { request_tx, join: Mutex::new(Some(join)), run_lock: Mutex::new(()) })
    }

    #[instrument(skip(self))]
    pub fn execute(&self, command: &str) -> RiaResult<CommandOutput> {
        let _guard = self.run_lock.lock().unwrap();
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.request_tx
            .send(WorkerRequest::Execute { command: command.to_string(), reply })
            .map_err(|_| disconnected())?;
        rx.recv().map_err(|_| disconnected())?
    }

    pub fn upload(
        &self,
        local_path: impl Into<PathBuf>,
        remote_cmd: impl Into<String>,
        total_len: u64,
        reporter: Arc<dyn Reporter>,
    ) -> RiaResult<()> {
        let _guard = self.run_lock.lock().unwrap();
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.request_tx
            .send(WorkerRequest::Upload {
                local_path: local_path.into(),
                remote_cmd: remote_cmd.into(),
                total_len,
                reporter,
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().map_err(|_| disconnected())?
    }

    pub fn download(
        &self,
        remote_cmd: impl Into<String>,
        local_path: impl Into<PathBuf>,
        reporter: Arc<dyn Reporter>,
    ) -> RiaResult<()> {
        let _guard = self.run_lock.lock().unwrap();
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.request_tx
            .send(WorkerRequest::Download {
                remote_cmd: remote_cmd.into(),
                local_path: local_path.into(),
                reporter,
                reply,
            })
            .map_err(|_| disconnected())?;
        rx.recv().map_err(|_| disconnected())?
    }

    /// Ask the worker thread to exit and wait for it to do so. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        let _guard = self.run_lock.lock().unwrap();
        let (reply, rx) = crossbeam_channel::bounded(1);
        if self.request_tx.send(WorkerRequest::Shutdown { reply }).is_ok() {
            let _ = rx.recv();
        }
        if let Some(handle) = self.join.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("shell worker thread panicked");
            }
        }
    }
}

impl Drop for ShellWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consumer_loop(mut channel: ShellChannel, rx: Receiver<WorkerRequest>, copy_bufsize: usize) {
    for req in rx.iter() {
        match req {
            WorkerRequest::Execute { command, reply } => {
                let result = channel.run_command(&command);
                let lost = matches!(result, Err(RiaError::ShellLost(_)));
                let _ = reply.send(result);
                if lost {
                    break;
                }
            }
            WorkerRequest::Upload { local_path, remote_cmd, total_len, reporter, reply } => {
                let result = File::open(&local_path).map_err(RiaError::from).and_then(|mut f| {
                    transport::upload(
                        &mut channel,
                        &remote_cmd,
                        &mut f,
                        total_len,
                        reporter.as_ref(),
                        copy_bufsize,
                    )
                });
                let lost = matches!(result, Err(RiaError::ShellLost(_)));
                let _ = reply.send(result);
                if lost {
                    break;
                }
            }
            WorkerRequest::Download { remote_cmd, local_path, reporter, reply } => {
                let result = File::create(&local_path).map_err(RiaError::from).and_then(|mut f| {
                    transport::download(&mut channel, &remote_cmd, &mut f, reporter.as_ref())
                });
                let lost = matches!(result, Err(RiaError::ShellLost(_)));
                let _ = reply.send(result);
                if lost {
                    break;
                }
            }
            WorkerRequest::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ria_protocol::NoopReporter;

    use super::*;

    #[test]
    fn executes_commands_in_order() {
        let worker = ShellWorker::spawn("/bin/sh", vec![]).unwrap();
        assert_eq!(worker.execute("echo one").unwrap().stdout, b"one\n");
        assert_eq!(worker.execute("echo two").unwrap().stdout, b"two\n");
    }

    #[test]
    fn upload_and_download_round_trip_through_worker() {
        let worker = ShellWorker::spawn("/bin/sh", vec![]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let local_src = dir.path().join("src.bin");
        let remote = dir.path().join("remote.bin");
        let local_dst = dir.path().join("dst.bin");
        std::fs::write(&local_src, b"round trip payload").unwrap();

        worker
            .upload(
                &local_src,
                format!("head -c 18 > {}", remote.display()),
                18,
                Arc::new(NoopReporter),
            )
            .unwrap();
        assert_eq!(std::fs::read(&remote).unwrap(), b"round trip payload");

        worker
            .download(
                format!("wc -c < {p} ; cat {p}; echo $?", p = remote.display()),
                &local_dst,
                Arc::new(NoopReporter),
            )
            .unwrap();
        assert_eq!(std::fs::read(&local_dst).unwrap(), b"round trip payload");
    }

    #[test]
    fn shutdown_is_idempotent() {
        let worker = ShellWorker::spawn("/bin/sh", vec![]).unwrap();
        worker.shutdown();
        worker.shutdown();
    }
}
