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

//! Maps an annex key onto the two short path segments that shard a
//! store's `annex/objects/` tree.
//!
//! This is a best-effort stand-in for git-annex's own hash table
//! (`dirhash-lower`/`dirhash-mixed`): it is not a byte-for-byte port,
//! just a deterministic function with the same two-segment shape. A
//! real deployment delegates this to the `git-annex` binary itself;
//! this workspace never needs to agree with it, only to be stable for
//! a given key and spread keys evenly across directories.

use md5::{Digest, Md5};

use ria_protocol::Key;

/// The two short directory components a key hashes to, e.g. `("1a2", "b3c")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    pub hash_a: String,
    pub hash_b: String,
}

impl KeyPath {
    pub fn for_key(key: &Key) -> Self {
        let digest = Md5::digest(key.as_str().as_bytes());
        let hex = hex_encode(&digest);
        // Two three-character segments drawn from the digest's leading
        // hex characters, giving 16^3 = 4096 buckets per level.
        let hash_a = hex[0..3].to_string();
        let hash_b = hex[3..6].to_string();
        KeyPath { hash_a, hash_b }
    }

    /// The two segments joined as a relative path, e.g. `1a2/b3c`.
    pub fn as_relative_path(&self) -> String {
        format!("{}/{}", self.hash_a, self.hash_b)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}
