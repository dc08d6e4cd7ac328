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

/// The `ria+<scheme>` transports a RIA URL can name.
///
/// `Http`/`Https` are recognized so that `ria+http://`/`ria+https://`
/// fail with a precise `UnsupportedScheme`-flavored `ConfigError`
/// rather than a generic parse failure; they have no handler behind
/// them (reserved, per the design's non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ssh,
    File,
    Http,
    Https,
}

impl Scheme {
    /// All schemes this workspace recognizes, in a fixed, read-only
    /// table populated once rather than a runtime-built map.
    pub const ALL: &'static [(&'static str, Scheme)] = &[
        ("ssh", Scheme::Ssh),
        ("file", Scheme::File),
        ("http", Scheme::Http),
        ("https", Scheme::Https),
    ];

    pub fn parse(name: &str) -> Option<Scheme> {
        Self::ALL.iter().find(|(n, _)| *n == name).map(|(_, s)| *s)
    }

    /// Whether this scheme has a constructible handler behind it.
    pub fn is_implemented(self) -> bool {
        matches!(self, Scheme::Ssh | Scheme::File)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = Self::ALL.iter().find(|(_, s)| *s == *self).map(|(n, _)| *n).unwrap_or("?");
        write!(f, "{name}")
    }
}
