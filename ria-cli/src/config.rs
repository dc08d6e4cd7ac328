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

//! Operator-level configuration for the `ria` binary: knobs that apply
//! across every invocation, as opposed to the per-call `ria+<scheme>`
//! URL. Not the annex `initremote` configuration, which stays out of
//! scope.

use std::fs;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, instrument};

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let Some(config_path) = config_file else {
        return Ok(Config::default());
    };
    info!("parsing config file ({})", config_path);
    let config_str = fs::read_to_string(config_path).context("reading config toml")?;
    toml::from_str(&config_str).context("parsing config file")
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Identity file passed to `ssh -i` when no `-i` is given on the
    /// command line.
    pub ssh_identity: Option<String>,

    /// Seconds a persistent shell read may block (login banner as well
    /// as every later command response) before the channel is given up
    /// for lost. Overrides the built-in default.
    pub connect_timeout_secs: Option<u64>,

    /// Overrides `ria-core`'s default upload/download chunk size.
    pub copy_bufsize: Option<usize>,
}
