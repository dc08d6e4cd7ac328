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

//! The local-filesystem-backed `RiaHandler`: identical external
//! contract to [`super::SshRiaHandler`], but every operation is a
//! direct filesystem syscall rather than a shell round trip.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ria_protocol::{DatasetId, Key, Result as RiaResult, RiaError};
use tracing::{instrument, warn};

use super::RiaHandler;
use crate::store::{self, KeyLocation};

pub struct FileRiaHandler {
    base_path: PathBuf,
    dataset_id: DatasetId,
    command_lock: Mutex<()>,
}

impl FileRiaHandler {
    pub fn new(base_path: impl Into<PathBuf>, dataset_id: DatasetId) -> Self {
        FileRiaHandler { base_path: base_path.into(), dataset_id, command_lock: Mutex::new(()) }
    }

    fn key_location(&self, key: &Key) -> KeyLocation {
        KeyLocation::new(&self.dataset_id, key)
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.base_path.join(self.key_location(key).key_path())
    }

    fn key_dir(&self, key: &Key) -> PathBuf {
        self.base_path.join(self.key_location(key).key_dir())
    }

    fn dataset_root(&self) -> PathBuf {
        let (a, b) = self.dataset_id.split_prefix();
        self.base_path.join(a).join(b)
    }

    fn transfer_dir(&self) -> PathBuf {
        self.dataset_root().join("transfer")
    }

    /// Temporarily chmod `path` owner-writable for the duration of
    /// `f`, restoring its previous mode afterwards. Refuses to touch
    /// anything that isn't a plain file or directory.
    fn ensure_writable<T>(&self, path: &Path, f: impl FnOnce() -> RiaResult<T>) -> RiaResult<T> {
        let meta = std::fs::symlink_metadata(path)?;
        let file_type = meta.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            return Err(RiaError::PermissionRefused(path.display().to_string()));
        }

        let mode = meta.permissions().mode();
        let needs_chmod = mode & 0o200 == 0;
        if needs_chmod {
            let mut perm = meta.permissions();
            perm.set_mode(mode | 0o200);
            std::fs::set_permissions(path, perm)?;
        }

        let result = f();

        if needs_chmod {
            match std::fs::symlink_metadata(path) {
                Ok(meta) => {
                    let mut perm = meta.permissions();
                    perm.set_mode(perm.mode() & !0o200);
                    if let Err(e) = std::fs::set_permissions(path, perm) {
                        warn!("failed to restore permissions on {path:?}: {e}");
                    }
                }
                Err(e) => warn!("failed to stat {path:?} while restoring permissions: {e}"),
            }
        }

        result
    }

    fn store_via_tempfile(
        &self,
        temp_path: &Path,
        key_dir: &Path,
        key_path: &Path,
        local_file: &Path,
    ) -> RiaResult<()> {
        std::fs::copy(local_file, temp_path)?;
        std::fs::create_dir_all(key_dir)?;
        self.ensure_writable(key_dir, || {
            std::fs::rename(temp_path, key_path)?;
            Ok(())
        })
    }

    fn locked_checkpresent(&self, key: &Key) -> bool {
        self.key_path(key).is_file()
    }

    fn ensure_layout_version(&self) -> RiaResult<()> {
        let path = self.base_path.join("ria-layout-version");
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                if !store::is_supported_layout_version(&content) {
                    return Err(RiaError::ConfigError(format!(
                        "unsupported ria-layout-version: {:?}",
                        content.trim()
                    )));
                }
                Ok(())
            }
            Err(_) => {
                std::fs::write(&path, format!("{}\n", store::layout_version()))?;
                Ok(())
            }
        }
    }
}

impl RiaHandler for FileRiaHandler {
    fn initremote(&self) -> RiaResult<()> {
        self.prepare()
    }

    #[instrument(skip(self))]
    fn prepare(&self) -> RiaResult<()> {
        std::fs::create_dir_all(self.dataset_root())?;
        self.ensure_layout_version()
    }

    #[instrument(skip(self, local_file))]
    fn transfer_store(&self, key: &Key, local_file: &Path) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if self.locked_checkpresent(key) {
            return Ok(());
        }

        let key_path = self.key_path(key);
        let key_dir = key_path.parent().expect("key_path always has a parent").to_path_buf();
        let transfer_dir = self.transfer_dir();
        std::fs::create_dir_all(&transfer_dir)?;
        let temp_path = transfer_dir.join(key.as_str());

        let result = self.store_via_tempfile(&temp_path, &key_dir, &key_path, local_file);
        if temp_path.exists() {
            if let Err(e) = std::fs::remove_file(&temp_path) {
                warn!("failed to clean up transfer temp file {temp_path:?}: {e}");
            }
        }
        result
    }

    #[instrument(skip(self, local_file))]
    fn transfer_retrieve(&self, key: &Key, local_file: &Path) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if !self.locked_checkpresent(key) {
            return Err(RiaError::KeyNotPresent(key.as_str().to_string()));
        }
        std::fs::copy(self.key_path(key), local_file)?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &Key) -> RiaResult<()> {
        let _guard = self.command_lock.lock().unwrap();
        if !self.locked_checkpresent(key) {
            return Ok(());
        }

        let key_dir = self.key_dir(key);
        let mut deleted_name = key_dir.file_name().expect("key dir has a name").to_os_string();
        deleted_name.push(".deleted");
        let deleted_path = key_dir.with_file_name(deleted_name);
        let key_dir_parent = key_dir.parent().expect("key dir has a parent").to_path_buf();

        self.ensure_writable(&key_dir_parent, || {
            if deleted_path.exists() {
                std::fs::remove_dir_all(&deleted_path)?;
            }
            std::fs::rename(&key_dir, &deleted_path)?;
            Ok(())
        })
    }

    fn checkpresent(&self, key: &Key) -> bool {
        let _guard = self.command_lock.lock().unwrap();
        self.locked_checkpresent(key)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn dataset_id() -> DatasetId {
        DatasetId::parse("01234567-89ab-cdef-0123-456789abcdef").unwrap()
    }

    #[test]
    fn store_then_retrieve_round_trips() {
        let root = tempdir().unwrap();
        let h = FileRiaHandler::new(root.path(), dataset_id());
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
    fn store_is_idempotent() {
        let root = tempdir().unwrap();
        let h = FileRiaHandler::new(root.path(), dataset_id());
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
    fn remove_renames_to_deleted_suffix_and_keeps_grandparent() {
        let root = tempdir().unwrap();
        let h = FileRiaHandler::new(root.path(), dataset_id());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();
        h.transfer_store(&key, &src).unwrap();

        let key_dir = h.key_dir(&key);
        let grandparent = key_dir.parent().unwrap().to_path_buf();

        h.remove(&key).unwrap();
        assert!(!h.checkpresent(&key));
        assert!(!key_dir.exists());
        assert!(grandparent.exists());

        let mut deleted_name = key_dir.file_name().unwrap().to_os_string();
        deleted_name.push(".deleted");
        assert!(key_dir.with_file_name(deleted_name).is_dir());
    }

    #[test]
    fn retrieve_missing_key_is_an_error() {
        let root = tempdir().unwrap();
        let h = FileRiaHandler::new(root.path(), dataset_id());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--deadbeef00000000000000000000.txt").unwrap();
        let dst = root.path().join("nope");
        let err = h.transfer_retrieve(&key, &dst).unwrap_err();
        assert!(matches!(err, RiaError::KeyNotPresent(_)));
    }

    #[test]
    fn write_protected_parent_is_restored() {
        let root = tempdir().unwrap();
        let h = FileRiaHandler::new(root.path(), dataset_id());
        h.prepare().unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("content");
        std::fs::write(&src, b"content1").unwrap();
        h.transfer_store(&key, &src).unwrap();

        let key_dir_parent = h.key_dir(&key).parent().unwrap().to_path_buf();
        std::fs::set_permissions(&key_dir_parent, std::fs::Permissions::from_mode(0o555)).unwrap();

        h.remove(&key).unwrap();

        let mode = std::fs::metadata(&key_dir_parent).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o555);
    }
}
