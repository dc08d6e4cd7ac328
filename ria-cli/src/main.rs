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

//! `ria` is operator tooling for exercising a RIA store directly. It is
//! not the git-annex external special-remote protocol adapter; it just
//! drives the same handler surface that adapter would use.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use ria_core::{HandlerOptions, ShellOptions};
use ria_protocol::{Key, NoopReporter};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

mod config;

#[derive(Parser, Debug)]
#[clap(author, about, version)]
struct Args {
    #[clap(short, long, action, help = "The file to write logs to (default: stderr)")]
    log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    verbose: u8,

    #[clap(short, long, action, help = "A toml file containing operator-level configuration")]
    config_file: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "Create the store's directory tree and ria-layout-version file")]
    Init {
        #[clap(help = "A ria+ssh:// or ria+file:// URL naming the store and dataset")]
        url: String,
    },

    #[clap(about = "Check whether a key is present in the store")]
    Check {
        #[clap(help = "A ria+ssh:// or ria+file:// URL naming the store and dataset")]
        url: String,
        #[clap(help = "The annex key to look up")]
        key: String,
    },

    #[clap(about = "Store a local file's contents under a key")]
    Store {
        #[clap(help = "A ria+ssh:// or ria+file:// URL naming the store and dataset")]
        url: String,
        #[clap(help = "The annex key to store under")]
        key: String,
        #[clap(help = "The local file to upload")]
        local_file: PathBuf,
    },

    #[clap(about = "Retrieve a key's content into a local file")]
    Retrieve {
        #[clap(help = "A ria+ssh:// or ria+file:// URL naming the store and dataset")]
        url: String,
        #[clap(help = "The annex key to retrieve")]
        key: String,
        #[clap(help = "Where to write the retrieved content")]
        local_file: PathBuf,
    },

    #[clap(about = "Remove a key from the store")]
    Remove {
        #[clap(help = "A ria+ssh:// or ria+file:// URL naming the store and dataset")]
        url: String,
        #[clap(help = "The annex key to remove")]
        key: String,
    },
}

fn main() {
    let args = Args::parse();

    let trace_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    if let Some(log_file) = args.log_file.clone() {
        match std::fs::File::create(&log_file) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_max_level(trace_level)
                    .with_thread_ids(true)
                    .with_target(false)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_writer(std::sync::Mutex::new(file))
                    .init();
            }
            Err(e) => eprintln!("failed to open log file {log_file}: {e}"),
        }
    } else {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    if let Err(err) = run(args) {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = config::read_config(&args.config_file)?;
    let options = handler_options(&config);

    let reporter = Arc::new(NoopReporter);
    match args.command {
        Commands::Init { url } => {
            let handler = ria_core::build_handler_with_options(&url, reporter, &options)?;
            handler.initremote().map_err(|e| anyhow!(e))?;
            println!("initialized {url}");
        }
        Commands::Check { url, key } => {
            let handler = ria_core::build_handler_with_options(&url, reporter, &options)?;
            let key = Key::new(key).map_err(|e| anyhow!(e))?;
            handler.prepare().map_err(|e| anyhow!(e))?;
            println!("{}", handler.checkpresent(&key));
        }
        Commands::Store { url, key, local_file } => {
            let handler = ria_core::build_handler_with_options(&url, reporter, &options)?;
            let key = Key::new(key).map_err(|e| anyhow!(e))?;
            handler.prepare().map_err(|e| anyhow!(e))?;
            handler
                .transfer_store(&key, &local_file)
                .with_context(|| format!("storing {local_file:?}"))?;
        }
        Commands::Retrieve { url, key, local_file } => {
            let handler = ria_core::build_handler_with_options(&url, reporter, &options)?;
            let key = Key::new(key).map_err(|e| anyhow!(e))?;
            handler.prepare().map_err(|e| anyhow!(e))?;
            handler
                .transfer_retrieve(&key, &local_file)
                .with_context(|| format!("retrieving into {local_file:?}"))?;
        }
        Commands::Remove { url, key } => {
            let handler = ria_core::build_handler_with_options(&url, reporter, &options)?;
            let key = Key::new(key).map_err(|e| anyhow!(e))?;
            handler.prepare().map_err(|e| anyhow!(e))?;
            handler.remove(&key).map_err(|e| anyhow!(e))?;
        }
    }

    Ok(())
}

/// Turn the parsed config file into the overrides `ria-core` accepts,
/// falling back to its defaults for anything left unset.
fn handler_options(config: &config::Config) -> HandlerOptions {
    let defaults = ShellOptions::default();
    HandlerOptions {
        ssh_identity: config.ssh_identity.clone(),
        shell: ShellOptions {
            copy_bufsize: config.copy_bufsize.unwrap_or(defaults.copy_bufsize),
            read_timeout: config.connect_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.read_timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_config_falls_back_to_shell_option_defaults() {
        let options = handler_options(&config::Config::default());
        let defaults = ShellOptions::default();
        assert_eq!(options.ssh_identity, None);
        assert_eq!(options.shell.copy_bufsize, defaults.copy_bufsize);
        assert_eq!(options.shell.read_timeout, defaults.read_timeout);
    }

    #[test]
    fn config_values_override_defaults() {
        let config = config::Config {
            ssh_identity: Some("/home/alice/.ssh/id_ed25519".to_string()),
            connect_timeout_secs: Some(5),
            copy_bufsize: Some(4096),
        };
        let options = handler_options(&config);
        assert_eq!(options.ssh_identity.as_deref(), Some("/home/alice/.ssh/id_ed25519"));
        assert_eq!(options.shell.copy_bufsize, 4096);
        assert_eq!(options.shell.read_timeout, Duration::from_secs(5));
    }
}
