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

//! The persistent-shell transport: a framed command channel, bulk
//! upload/download on top of it, and a worker thread that serializes
//! access to both for callers.

mod channel;
mod transport;
mod worker;

pub use channel::{CommandOutput, ShellChannel};
pub use worker::ShellWorker;
