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

//! Path construction for the RIA on-disk layout, shared by both
//! handler variants:
//!
//! ```text
//! <root>/<id[:3]>/<id[3:]>/annex/objects/<hA>/<hB>/<key>/<key>
//! ```

use ria_protocol::{DatasetId, Key};

use crate::consts::LAYOUT_VERSION;
use crate::dirhash::KeyPath as DirhashPrefix;

/// Everything below a store root needed to locate one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLocation {
    /// `<id[:3]>/<id[3:]>`, relative to the store root.
    pub dataset_root: String,
    /// `<hA>/<hB>`, relative to `dataset_root/annex/objects`.
    pub dirhash_prefix: DirhashPrefix,
    key: String,
}

impl KeyLocation {
    pub fn new(dataset_id: &DatasetId, key: &Key) -> Self {
        let (a, b) = dataset_id.split_prefix();
        KeyLocation {
            dataset_root: format!("{a}/{b}"),
            dirhash_prefix: DirhashPrefix::for_key(key),
            key: key.as_str().to_string(),
        }
    }

    /// The full relative path to the key's blob: `.../<hA>/<hB>/<key>/<key>`.
    pub fn key_path(&self) -> String {
        format!(
            "{}/annex/objects/{}/{}/{}",
            self.dataset_root,
            self.dirhash_prefix.as_relative_path(),
            self.key,
            self.key
        )
    }

    /// The key's own directory: `.../<hA>/<hB>/<key>`. Removing this
    /// (and only this) is what `remove` does: the dirhash-level
    /// ancestors are shared with other keys and are left alone.
    pub fn key_dir(&self) -> String {
        format!(
            "{}/annex/objects/{}/{}",
            self.dataset_root,
            self.dirhash_prefix.as_relative_path(),
            self.key
        )
    }

    /// The parent of [`KeyLocation::key_dir`]: `.../<hA>/<hB>`.
    pub fn key_dir_parent(&self) -> String {
        format!("{}/annex/objects/{}", self.dataset_root, self.dirhash_prefix.as_relative_path())
    }
}

/// The `ria-layout-version` file's expected content (a single token,
/// trailing newline optional).
pub fn layout_version() -> &'static str {
    LAYOUT_VERSION
}

/// Whether `content`, as read from a store's `ria-layout-version` file,
/// names a layout version this workspace understands.
pub fn is_supported_layout_version(content: &str) -> bool {
    content.trim() == LAYOUT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_canonical_key_path() {
        let dataset = DatasetId::parse("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let key = Key::new("MD5E-s8--7e55db001d319a94b0b713529a756623.txt").unwrap();
        let loc = KeyLocation::new(&dataset, &key);

        let expected_suffix = format!(
            "annex/objects/{}/{}",
            loc.dirhash_prefix.hash_a, loc.dirhash_prefix.hash_b
        );
        assert!(loc.key_path().starts_with("012/34567-89ab-cdef-0123-456789abcdef/"));
        assert!(loc.key_path().contains(&expected_suffix));
        assert!(loc.key_path().ends_with(&format!("{0}/{0}", key.as_str())));
        assert_eq!(loc.key_dir(), format!("{}/{}", loc.key_dir_parent(), key.as_str()));
        assert!(loc.key_path().starts_with(&loc.key_dir()));
    }

    #[test]
    fn recognizes_current_layout_version_only() {
        assert!(is_supported_layout_version("1"));
        assert!(is_supported_layout_version("1\n"));
        assert!(!is_supported_layout_version("2"));
    }
}
