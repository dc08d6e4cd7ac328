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

//! The RIA store transport: a streaming pattern filter, a persistent
//! shell channel with command framing, a worker thread serializing
//! operations onto that channel, and the SSH- and filesystem-backed
//! store handlers built on top of it.

mod consts;
mod dirhash;
mod handler;
mod pattern_filter;
mod selector;
mod shell;
mod store;

pub use consts::ShellOptions;
pub use dirhash::KeyPath;
pub use handler::{FileRiaHandler, RiaHandler, SshRiaHandler};
pub use pattern_filter::PatternFilter;
pub use selector::{build_handler, build_handler_with_options, parse_ria_url, HandlerOptions, ParsedRiaUrl};
pub use shell::{CommandOutput, ShellChannel, ShellWorker};
pub use store::KeyLocation;
