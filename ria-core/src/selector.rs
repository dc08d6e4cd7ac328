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

//! Turns a `ria+<scheme>://...` URL into a constructed [`RiaHandler`].
//!
//! `ria+ssh://[user@]host[:port]/base/path/<dataset-id>` selects
//! [`SshRiaHandler`]; `ria+file:///base/path/<dataset-id>` selects
//! [`FileRiaHandler`]. The trailing path segment is always the
//! dataset id; everything before it is the store's base path.

use std::sync::Arc;

use ria_protocol::{DatasetId, Reporter, Result as RiaResult, RiaError, Scheme};
use url::Url;

use crate::consts::ShellOptions;
use crate::handler::{FileRiaHandler, RiaHandler, SshRiaHandler};

/// Operator-overridable knobs threaded into the handler a `ria+...` URL
/// selects. `ssh_identity` becomes `-i <path>` on the `ssh` argv;
/// `shell` overrides the persistent channel's copy buffer size and
/// read timeout.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub ssh_identity: Option<String>,
    pub shell: ShellOptions,
}

/// A `ria+<scheme>` URL, broken into the pieces a handler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRiaUrl {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_path: String,
    pub dataset_id: DatasetId,
}

/// Parse `raw` as a `ria+<scheme>://...` URL.
pub fn parse_ria_url(raw: &str) -> RiaResult<ParsedRiaUrl> {
    let url = Url::parse(raw).map_err(|e| RiaError::ConfigError(format!("invalid URL {raw:?}: {e}")))?;

    let scheme_name = url
        .scheme()
        .strip_prefix("ria+")
        .ok_or_else(|| RiaError::ConfigError(format!("URL {raw:?} is missing the ria+ prefix")))?;
    let scheme = Scheme::parse(scheme_name)
        .ok_or_else(|| RiaError::ConfigError(format!("unrecognized ria+ scheme: {scheme_name:?}")))?;
    if !scheme.is_implemented() {
        return Err(RiaError::ConfigError(format!("ria+{scheme} is recognized but not implemented")));
    }

    let user = if url.username().is_empty() { None } else { Some(url.username().to_string()) };
    let host = url.host_str().map(str::to_string);
    let port = url.port();

    let path = url.path().trim_start_matches('/');
    let (base_path, raw_id) = path
        .rsplit_once('/')
        .map(|(base, id)| (base, id))
        .unwrap_or(("", path));
    if raw_id.is_empty() {
        return Err(RiaError::ConfigError(format!(
            "URL {raw:?} is missing a trailing dataset id path segment"
        )));
    }
    let dataset_id = DatasetId::parse(raw_id)?;

    Ok(ParsedRiaUrl { scheme, user, host, port, base_path: base_path.to_string(), dataset_id })
}

/// Parse `raw` and construct the handler it names, with default
/// transport options.
pub fn build_handler(raw: &str, reporter: Arc<dyn Reporter>) -> RiaResult<Box<dyn RiaHandler>> {
    build_handler_with_options(raw, reporter, &HandlerOptions::default())
}

/// Parse `raw` and construct the handler it names, applying `options`
/// to the shell it spawns (ssh-backed handlers only; `ria+file` has no
/// channel to configure).
pub fn build_handler_with_options(
    raw: &str,
    reporter: Arc<dyn Reporter>,
    options: &HandlerOptions,
) -> RiaResult<Box<dyn RiaHandler>> {
    let parsed = parse_ria_url(raw)?;
    match parsed.scheme {
        Scheme::Ssh => {
            let host = parsed
                .host
                .ok_or_else(|| RiaError::ConfigError(format!("ria+ssh URL {raw:?} is missing a host")))?;
            let args = ssh_argv(parsed.user.as_deref(), &host, parsed.port, options.ssh_identity.as_deref());
            let handler = SshRiaHandler::new_with_options(
                "ssh",
                args,
                parsed.base_path,
                parsed.dataset_id,
                reporter,
                options.shell,
            )?;
            Ok(Box::new(handler))
        }
        Scheme::File => Ok(Box::new(FileRiaHandler::new(parsed.base_path, parsed.dataset_id))),
        Scheme::Http | Scheme::Https => {
            Err(RiaError::ConfigError(format!("ria+{} is recognized but not implemented", parsed.scheme)))
        }
    }
}

/// Build the `ssh` argv for `[user@]host[:port]`, appending `-i
/// <identity>` when one is configured. `destination` is always last,
/// since `ssh` takes its flags before the destination argument.
fn ssh_argv(user: Option<&str>, host: &str, port: Option<u16>, identity: Option<&str>) -> Vec<String> {
    let destination = match user {
        Some(user) => format!("{user}@{host}"),
        None => host.to_string(),
    };
    let mut args = Vec::new();
    if let Some(port) = port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(identity) = identity {
        args.push("-i".to_string());
        args.push(identity.to_string());
    }
    args.push(destination);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_id() -> &'static str {
        "01234567-89ab-cdef-0123-456789abcdef"
    }

    #[test]
    fn parses_ssh_url_with_user_and_port() {
        let raw = format!("ria+ssh://alice@example.com:2222/srv/ria/{}", dataset_id());
        let parsed = parse_ria_url(&raw).unwrap();
        assert_eq!(parsed.scheme, Scheme::Ssh);
        assert_eq!(parsed.user.as_deref(), Some("alice"));
        assert_eq!(parsed.host.as_deref(), Some("example.com"));
        assert_eq!(parsed.port, Some(2222));
        assert_eq!(parsed.base_path, "srv/ria");
        assert_eq!(parsed.dataset_id.as_str(), dataset_id());
    }

    #[test]
    fn parses_file_url_without_host() {
        let raw = format!("ria+file:///srv/ria/{}", dataset_id());
        let parsed = parse_ria_url(&raw).unwrap();
        assert_eq!(parsed.scheme, Scheme::File);
        assert_eq!(parsed.base_path, "srv/ria");
        assert_eq!(parsed.dataset_id.as_str(), dataset_id());
    }

    #[test]
    fn rejects_unknown_scheme_name() {
        let raw = format!("ria+ftp://h/{}", dataset_id());
        let err = parse_ria_url(&raw).unwrap_err();
        assert!(matches!(err, RiaError::ConfigError(_)));
    }

    #[test]
    fn rejects_missing_ria_prefix() {
        let raw = format!("ssh://example.com/{}", dataset_id());
        let err = parse_ria_url(&raw).unwrap_err();
        assert!(matches!(err, RiaError::ConfigError(_)));
    }

    #[test]
    fn rejects_unimplemented_scheme() {
        let raw = format!("ria+http://example.com/{}", dataset_id());
        let err = build_handler(&raw, Arc::new(ria_protocol::NoopReporter)).unwrap_err();
        assert!(matches!(err, RiaError::ConfigError(_)));
    }

    #[test]
    fn rejects_missing_dataset_id() {
        let err = parse_ria_url("ria+file:///").unwrap_err();
        assert!(matches!(err, RiaError::ConfigError(_)));
    }

    #[test]
    fn builds_file_handler() {
        let raw = format!("ria+file:///srv/ria/{}", dataset_id());
        build_handler(&raw, Arc::new(ria_protocol::NoopReporter)).unwrap();
    }

    #[test]
    fn ssh_argv_places_identity_and_port_before_destination() {
        let args = ssh_argv(Some("alice"), "example.com", Some(2222), Some("/home/alice/.ssh/id_ed25519"));
        assert_eq!(
            args,
            vec![
                "-p".to_string(),
                "2222".to_string(),
                "-i".to_string(),
                "/home/alice/.ssh/id_ed25519".to_string(),
                "alice@example.com".to_string(),
            ]
        );
    }

    #[test]
    fn ssh_argv_omits_unset_knobs() {
        let args = ssh_argv(None, "example.com", None, None);
        assert_eq!(args, vec!["example.com".to_string()]);
    }
}
