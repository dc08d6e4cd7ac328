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

//! The two concrete stores (SSH-backed, local-filesystem-backed)
//! behind one shared interface, mirroring the Python `RIAHandler`
//! abstract base class.

mod file;
mod ssh;

use std::path::Path;

use ria_protocol::{Key, Result as RiaResult};

pub use file::FileRiaHandler;
pub use ssh::SshRiaHandler;

/// The operations the annex request protocol needs from a RIA store,
/// regardless of which transport backs it.
pub trait RiaHandler: Send + Sync {
    /// One-time setup for a freshly configured remote. Idempotent.
    fn initremote(&self) -> RiaResult<()>;

    /// Per-process setup: lazily establish the transport, ensure the
    /// dataset's directory tree and `ria-layout-version` exist.
    fn prepare(&self) -> RiaResult<()>;

    /// Store `local_file`'s contents under `key`. A no-op if the key
    /// is already present.
    fn transfer_store(&self, key: &Key, local_file: &Path) -> RiaResult<()>;

    /// Retrieve `key`'s content into `local_file`. Fails with
    /// `KeyNotPresent` if the key isn't stored.
    fn transfer_retrieve(&self, key: &Key, local_file: &Path) -> RiaResult<()>;

    /// Remove `key`. A no-op if the key isn't present.
    fn remove(&self, key: &Key) -> RiaResult<()>;

    /// Whether `key` is present. Failures other than "definitely not
    /// present" are reported as `false`, never raised: the annex
    /// protocol only trusts a `true` answer.
    fn checkpresent(&self, key: &Key) -> bool;
}
