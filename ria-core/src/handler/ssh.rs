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

//! The SSH-backed `RiaHandler`: every operation is a shell command run
//! through a [`ShellWorker`], serialized behind `command_lock` so a
//! store/retrieve/remove is never interleaved with another one against
//! the same key.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ria_protocol::{DatasetId, Key, Reporter, Result as RiaResult, RiaError};
use tracing::{instrument, warn};

use super::RiaHandler;
use crate::consts::ShellOptions;
use crate::shell::ShellWorker;
use crate::store::{self, KeyLocation};

pub struct SshRiaHandler {
    worker: ShellWorker,
    base_path: String,
    dataset_id: DatasetId,
    reporter: Arc<dyn Reporter>,
    command_lock: Mutex<()>,
}

impl SshRiaHandler {
    /// Spawn `program args...` (typically `ssh user@host`) and bind it
    /// to `base_path/dataset_id` on the far end.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        base_path: impl Into<String>,
        dataset_id: DatasetId,
        reporter: Arc<dyn Reporter>,
    ) -> RiaResult<Self> {
        Self::new_with_options(program, args, base_path, dataset_id, reporter, ShellOptions::default())
    }

    /// Like [`new`](Self::new), overriding the channel's default copy
    /// buffer size and read timeout.
    pub fn new_with_options(
        program: impl Into<String>,
        args: Vec<String>,
        base_path: impl Into<String>,
        dataset_id: DatasetId,
        reporter: Arc<dyn Reporter>,
        shell_options: ShellOptions,
    ) -> RiaResult<Self> {
        let worker = ShellWorker::spawn_with_options(program, args, shell_options)?;
        Ok(SshRiaHandler {
            worker,
            base_path: base_path.into(),
            dataset_id,
            reporter,
            command_lock: Mutex::new(()),
        })
    }

    fn remote_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.base_path.trim_end_matches('/'))
    }

    fn dataset_root(&self) -> String {
        let (a, b) = self.dataset_id.split_prefix();
        format!("{a}/{b}")
    }

    fn ensure_writable<T>(
        &self,
        path: &str,
        f: impl FnOnce(&Self) -> RiaResult<T>,
    ) -> RiaResult<T> {
        let ls = self.worker.execute(&format!("ls -ldn {}", shell_quote(path)))?;
        if ls.status != 0 {
            return Err(RiaError::TransferFailed(format!("ls -ldn {path} failed")));
        }
        let stdout = String::from_utf8_lossy(&ls.stdout).into_owned();
        let mode = stdout
            .split_whitespace()
            .next()
            .ok_or_else(|| RiaError::TransferFailed(format!("no output from ls -ldn {path}")))?;
        let mode_bytes = mode.as_bytes();
        let file_type = *mode_bytes.first().unwrap_or(&b'?') as char;
        if file_type != '-' && file_type != 'd' {
            return Err(RiaError::PermissionRefused(path.to_string()));
        }
        let owner_writable = mode_bytes.get(2).copied() == Some(b'w');
        let needs_chmod = !owner_writable;

        if needs_chmod {
            self.worker.execute(&format!("chmod u+w {}", shell_quote(path)))?;
        }
        let result = f(self);
        if needs_chmod {
            if let Err(e) = self.worker.execute(&format!("chmod u-w {}", shell_quote(path))) {
                warn!("failed to restore permissions on {path}: {e}");
            }
        }
        result
    }

    fn make_remote_tempfile(&self) -> RiaResult<String> {
        let out = self.worker.execute("mktemp")?;
        if out.status != 0 {
            return Err(RiaError::TransferFailed(format!(
                "mktemp failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn store_via_tempfile(
        &self,
        remote_temp: &str,
        key_dir: &str,
        key_path: &str,
        local_file: &Path,
    ) -> RiaResult<()> {
        let total_len = std::fs::metadata(local_file)?.len();
        self.worker.upload(
            local_file,
            format!("head -c {total_len} > {}", shell_quote(remote_temp)),
            total_len,
            Arc::clone(&self.reporter),
        )?;

        let mkdir = self.worker.execute(&format!("mkdir -p {}", shell_quote(key_dir)))?;
        if mkdir.status != 0 {
            return Err(RiaError::TransferFailed(format!("mkdir -p {key_dir} failed")));
        }

        self.ensure_writable(key_dir, |h| {
            let mv = h
                .worker
                .execute(&format!("mv -f {} {}", shell_quote(remote_temp), shell_quote(key_path)))?;
            if mv.status != 0 {
                return Err(RiaError::TransferFailed(format!(
                    "mv -f {remote_temp} {key_path} failed: {}",
                    String::from_utf8_lossy(&mv.stderr)
                )));
            }
            Ok(())
        })
    }

    fn locked_checkpresent(&self, key: &Key) -> bool {
        let loc = KeyLocation::new(&self.dataset_id, key);
        let key_path = self.remote_path(&loc.key_path());
        matches!(self.worker.execute(&format!("test -f {}", shell_quote(&key_path))), Ok(out) if out.status == 0)
    }

    fn ensure_layout_version(&self) -> RiaResult<()> {
        let path = self.remote_path("ria-layout-version");
        let cat = self.worker.execute(&format!("cat {}", shell_quote(&path)))?;
        if cat.status == 0 {
            let content = String::from_utf8_lossy(&cat.stdout);
            if !store::is_supported_layout_version(&content) {
                return Err(RiaError::ConfigError(format!(
                    "unsupported ria-layout-version: {:?}",
                    content.trim()
                )));
            }
            return Ok(());
        }
        let write =
            self.worker.execute(&format!("echo {} > {}", store::layout_version(), shell_quote(&path)))?;
        if write.status != 0 {
            return Err(RiaError::ConfigError("failed to bootstrap ria-layout-version".into()));
        }
        Ok(())
    }
}

impl RiaHandler for SshRiaHandler {
    fn initremote(&self) -> RiaResult<()> {
        self.prepare()
    }

    #[instrument(skip(self))]
    fn prepare(&self) -> RiaResult<()> {
        let dataset_dir = self.remote_path(&self.dataset_root());
        let mkdir = self.worker.execute(&format!("mkdir -p {}", shell_quote(&dataset_dir)))?;
        if mkdir.status != 0 {
            return Err(RiaError::ConfigError(format!("mkdir -p {dataset_dir} failed")));
        }
        self.ensure_layout_version()
    }

    #[instrument(skip(self, local_file))]
    fn transfer_store(&self, key: &Key, local_file: &Path) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if self.locked_checkpresent(key) {
            return Ok(());
        }

        let loc = KeyLocation::new(&self.dataset_id, key);
        let key_path = self.remote_path(&loc.key_path());
        let key_dir = self.remote_path(&loc.key_dir());

        let remote_temp = self.make_remote_tempfile()?;
        let result = self.store_via_tempfile(&remote_temp, &key_dir, &key_path, local_file);
        if let Err(e) = self.worker.execute(&format!("rm -f {}", shell_quote(&remote_temp))) {
            warn!("failed to clean up remote temp file {remote_temp}: {e}");
        }
        result
    }

    #[instrument(skip(self, local_file))]
    fn transfer_retrieve(&self, key: &Key, local_file: &Path) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if !self.locked_checkpresent(key) {
            return Err(RiaError::KeyNotPresent(key.as_str().to_string()));
        }

        let loc = KeyLocation::new(&self.dataset_id, key);
        let key_path = self.remote_path(&loc.key_path());
        let quoted = shell_quote(&key_path);
        self.worker.download(
            format!("wc -c < {quoted} 2>/dev/null || echo -1; cat {quoted}; echo $?"),
            local_file,
            Arc::clone(&self.reporter),
        )
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &Key) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if !self.locked_checkpresent(key) {
            return Ok(());
        }

        let loc = KeyLocation::new(&self.dataset_id, key);
        let key_dir = self.remote_path(&loc.key_dir());
        let key_dir_parent = self.remote_path(&loc.key_dir_parent());
        self.ensure_writable(&key_dir_parent, |h| {
            let rm = h.worker.execute(&format!("rm -rf {}", shell_quote(&key_dir)))?;
            if rm.status != 0 {
                return Err(RiaError::TransferFailed(format!("rm -rf {key_dir} failed")));
            }
            Ok(())
        })
    }

    fn checkpresent(&self, key: &Key) -> bool {
        let _guard = self.command_lock.lock().unwrap();
        self.locked_checkpresent(key)
    }
}

/// Wrap `s` in single quotes for use as one POSIX shell word, escaping
/// any embedded single quotes.
fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use ria_protocol::NoopReporter;
    use tempfile::tempdir;

    use super::*;

    fn handler(base_path: &str) -> SshRiaHandler {
        SshRiaHandler::new(
            "/bin/sh",
            vec![],
            base_path,
            DatasetId::parse("01234567-89ab-cdef-0123-456789abcdef").unwrap(),
            Arc::new(NoopReporter),
        )
        .unwrap()
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }

    #[test]
    fn store_then_retrieve_round_trips() {
        let root = tempdir().unwrap();
        let h = handler(root.path().to_str().unwrap());
        h.prepare().unwrap();

        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();

        assert!(!h.checkpresent(&key));
        h.transfer_store(&key, &src).unwrap();
        assert!(h.checkpresent(&key));

        let dst = src_dir.path().join("retrieved");
        h.transfer_retrieve(&key, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"content1");
    }

    #[test]
    fn retrieve_missing_key_is_an_error() {
        let root = tempdir().unwrap();
        let h = handler(root.path().to_str().unwrap());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--deadbeef00000000000000000000.txt").unwrap();
        let dst = root.path().join("nope");
        let err = h.transfer_retrieve(&key, &dst).unwrap_err();
        assert!(matches!(err, RiaError::KeyNotPresent(_)));
    }

    #[test]
    fn store_is_idempotent() {
        let root = tempdir().unwrap();
        let h = handler(root.path().to_str().unwrap());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();

        h.transfer_store(&key, &src).unwrap();
        h.transfer_store(&key, &src).unwrap();
        assert!(h.checkpresent(&key));
    }

    #[test]
    fn write_protected_parent_is_restored() {
        let root = tempdir().unwrap();
        let h = handler(root.path().to_str().unwrap());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();
        h.transfer_store(&key, &src).unwrap();

        let loc = KeyLocation::new(
            &DatasetId::parse("01234567-89ab-cdef-0123-456789abcdef").unwrap(),
            &key,
        );
        let key_dir_parent = root.path().join(loc.key_dir_parent());
        std::fs::set_permissions(&key_dir_parent, std::fs::Permissions::from_mode(0o555)).unwrap();

        h.remove(&key).unwrap();

        let mode = std::fs::metadata(&key_dir_parent).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o555);
    }

    #[test]
    fn remove_clears_key_but_keeps_grandparent() {
        let root = tempdir().unwrap();
        let h = handler(root.path().to_str().unwrap());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();
        h.transfer_store(&key, &src).unwrap();

        let loc = KeyLocation::new(&DatasetId::parse("01234567-89ab-cdef-0123-456789abcdef").unwrap(), &key);
        let grandparent = root.path().join(loc.key_dir_parent());
        assert!(grandparent.exists());

        h.remove(&key).unwrap();
        assert!(!h.checkpresent(&key));
        assert!(!root.path().join(loc.key_dir()).exists());
        assert!(grandparent.exists());
    }
}
