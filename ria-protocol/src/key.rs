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

use std::fmt;

use uuid::Uuid;

use crate::RiaError;

/// An opaque annex key, e.g. `MD5E-s8--7e55db001d319a94b0b713529a756623.txt`.
///
/// The caller is expected to have already sanitized the key (per the
/// annex protocol), but construction still rejects the malformed shapes
/// that would otherwise corrupt the on-disk layout: embedded path
/// separators, embedded whitespace, and the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn new(raw: impl Into<String>) -> Result<Self, RiaError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(RiaError::ConfigError("key must not be empty".into()));
        }
        if !raw.is_ascii() {
            return Err(RiaError::ConfigError(format!("key {raw:?} is not ASCII")));
        }
        if raw.chars().any(|c| c.is_whitespace()) {
            return Err(RiaError::ConfigError(format!("key {raw:?} contains whitespace")));
        }
        if raw.contains('/') || raw.contains('\\') {
            return Err(RiaError::ConfigError(format!(
                "key {raw:?} contains a path separator"
            )));
        }
        Ok(Key(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A dataset id: a UUID identifying a logical dataset within a store.
///
/// Stores its canonical hyphenated form (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`)
/// so that [`DatasetId::split_prefix`] can reliably take the first three
/// characters as the store's top-level directory component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn parse(raw: &str) -> Result<Self, RiaError> {
        let id = Uuid::parse_str(raw)
            .map_err(|e| RiaError::ConfigError(format!("invalid dataset id {raw:?}: {e}")))?;
        Ok(DatasetId(id.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split as `id[:3]`/`id[3:]`, the two path components that form
    /// the store's top-level prefix for this dataset.
    pub fn split_prefix(&self) -> (&str, &str) {
        self.0.split_at(3)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
