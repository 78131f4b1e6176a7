// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Core data model: endpoints, hints, users and the top-level configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::server::factory::ServerFactory;
use crate::server::middleware::Middleware;

/// A link shown in the directory listing, rendered as an OSC 8 hyperlink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.is_empty() {
            return Ok(());
        }
        if self.name.is_empty() {
            return write!(f, "{}", self.url);
        }
        write!(f, "{} {}", self.name, self.url)
    }
}

/// Ordered chain of session interceptors attached to a served endpoint.
///
/// Presence of any interceptor marks the endpoint as one the supervisor
/// should start a listener for.
#[derive(Clone, Default)]
pub struct MiddlewareChain(pub Vec<Arc<dyn Middleware>>);

impl MiddlewareChain {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Middleware>> {
        self.0.iter()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|m| m.name()))
            .finish()
    }
}

/// A single directory entry describing how to SSH into a target.
///
/// Deserialized from the YAML configuration or produced by the OpenSSH-style
/// config intake. Endpoints are immutable once handed to the supervisor; the
/// only way to change the set afterwards is a full replacement through the
/// update channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoint {
    /// Display label and command-line selector. Unique within a directory.
    #[serde(default)]
    pub name: String,
    /// `host:port` to connect to. If empty for a served endpoint, the
    /// supervisor assigns one next to the listing address.
    #[serde(default)]
    pub address: String,
    /// User to authenticate as. Falls back to the parent session's user, then
    /// the local OS user.
    #[serde(default)]
    pub user: String,
    /// Forward the parent's SSH agent into the brokered session.
    #[serde(default)]
    pub forward_agent: bool,
    /// Request a TTY even when a remote command is set.
    #[serde(default)]
    pub request_tty: bool,
    /// Command to run instead of a shell.
    #[serde(default)]
    pub remote_command: String,
    /// Optional description; the listing shows its first line.
    #[serde(default, rename = "description")]
    pub desc: String,
    #[serde(default)]
    pub link: Link,
    /// `[user@]host[:port]` of an intermediate jump host.
    #[serde(default)]
    pub proxy_jump: String,
    /// Glob patterns selecting parent environment variables to forward.
    /// `LC_*` and `LANG` are always included.
    #[serde(default)]
    pub send_env: Vec<String>,
    /// `KEY=VALUE` pairs set on the session. Wins over `send_env`.
    #[serde(default)]
    pub set_env: Vec<String>,
    #[serde(default)]
    pub preferred_authentications: Vec<String>,
    /// Private keys to offer, in order. Only used in local mode.
    #[serde(default)]
    pub identity_files: Vec<String>,
    /// Dial timeout in seconds. Zero means no explicit timeout.
    #[serde(default)]
    pub connect_timeout: u64,
    /// Interceptors served by the supervisor for this endpoint.
    #[serde(skip)]
    pub middlewares: MiddlewareChain,
}

impl Endpoint {
    /// An endpoint is valid when it has a name and either something to
    /// connect to or something to serve.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && (!self.address.is_empty() || !self.middlewares.is_empty())
    }

    /// Whether the supervisor should start a listener for this endpoint.
    pub fn should_listen(&self) -> bool {
        !self.middlewares.is_empty()
    }

    /// The host portion of the address, defaulting to the endpoint name.
    pub fn host(&self) -> String {
        let (host, _) = split_host_port(&self.address);
        if host.is_empty() {
            self.name.clone()
        } else {
            host
        }
    }

    /// The port portion of the address, defaulting to 22.
    pub fn port(&self) -> String {
        let (_, port) = split_host_port(&self.address);
        if port.is_empty() {
            "22".to_string()
        } else {
            port
        }
    }

    /// Normalized `host:port` used for dialing and known-hosts lines.
    pub fn dial_address(&self) -> String {
        join_host_port(&self.host(), &self.port())
    }

    /// Synthetic URL shown on every listing row.
    pub fn ssh_url(&self) -> String {
        format!("ssh://{}", self.dial_address())
    }

    /// Preferred authentication methods, in order.
    pub fn authentications(&self) -> Vec<String> {
        if self.preferred_authentications.is_empty() {
            return vec!["publickey".to_string(), "keyboard-interactive".to_string()];
        }
        self.preferred_authentications.clone()
    }

    /// Dial timeout, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        if self.connect_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connect_timeout))
        }
    }

    /// Evaluates `send_env` and `set_env` against the parent environment into
    /// the map to apply on the brokered session.
    ///
    /// A key is present iff `set_env` supplies it (which wins), or some
    /// `send_env` glob matches it and the parent environment carries it.
    /// Empty keys are dropped.
    pub fn environment<'a>(
        &self,
        parent_env: impl IntoIterator<Item = &'a str>,
    ) -> std::collections::HashMap<String, String> {
        let mut env = std::collections::HashMap::new();

        for pair in parent_env {
            let Some((k, v)) = pair.split_once('=') else {
                continue;
            };
            if k.is_empty() {
                continue;
            }
            if self.should_send(k) {
                env.insert(k.to_string(), v.to_string());
            } else {
                tracing::debug!(key = %k, "ignored parent env");
            }
        }

        for pair in &self.set_env {
            let Some((k, v)) = pair.split_once('=') else {
                continue;
            };
            if k.is_empty() {
                continue;
            }
            env.insert(k.to_string(), v.to_string());
        }

        env
    }

    fn should_send(&self, key: &str) -> bool {
        self.send_env
            .iter()
            .map(String::as_str)
            .chain(["LC_*", "LANG"])
            .any(|pattern| match glob::Pattern::new(pattern) {
                Ok(g) => g.matches(key),
                Err(_) => false,
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} => \"{}@{}\"", self.name, self.user, self.address)
    }
}

// Middlewares are runtime-only handlers; two endpoints are the same record
// when every configured field matches.
impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.address == other.address
            && self.user == other.user
            && self.forward_agent == other.forward_agent
            && self.request_tty == other.request_tty
            && self.remote_command == other.remote_command
            && self.desc == other.desc
            && self.link == other.link
            && self.proxy_jump == other.proxy_jump
            && self.send_env == other.send_env
            && self.set_env == other.set_env
            && self.preferred_authentications == other.preferred_authentications
            && self.identity_files == other.identity_files
            && self.connect_timeout == other.connect_timeout
    }
}

/// Splits `host:port`, tolerating a missing port and bracketed IPv6 hosts.
pub fn split_host_port(addr: &str) -> (String, String) {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').unwrap_or("");
            return (host.to_string(), port.to_string());
        }
    }
    match addr.rsplit_once(':') {
        Some((host, port))
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            (host.to_string(), port.to_string())
        }
        _ => (addr.to_string(), String::new()),
    }
}

/// Joins host and port back into the `host:port` form.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// An overlay matched by a glob against endpoint names, refining discovered
/// records at load time. Scalars overwrite when set; lists append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointHint {
    #[serde(default, rename = "match")]
    pub match_pattern: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub forward_agent: Option<bool>,
    #[serde(default)]
    pub request_tty: Option<bool>,
    #[serde(default)]
    pub remote_command: String,
    #[serde(default, rename = "description")]
    pub desc: String,
    #[serde(default)]
    pub link: Link,
    #[serde(default)]
    pub proxy_jump: String,
    #[serde(default)]
    pub send_env: Vec<String>,
    #[serde(default)]
    pub set_env: Vec<String>,
    #[serde(default)]
    pub preferred_authentications: Vec<String>,
    #[serde(default)]
    pub identity_files: Vec<String>,
    #[serde(default)]
    pub connect_timeout: u64,
}

/// A user allowed to access the served listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "public-keys")]
    pub public_keys: Vec<String>,
}

/// The wishlist configuration.
///
/// `factory` and `endpoint_channel` are runtime-only: the factory builds the
/// SSH server for each served endpoint, and the channel streams replacement
/// endpoint sets into running listings.
#[derive(Default, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on. Empty means all interfaces.
    #[serde(default)]
    pub listen: String,
    /// Port for the listing server. Zero probes 22 then 2222.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub hints: Vec<EndpointHint>,
    /// Users allowed in. Empty means open access.
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(skip)]
    pub factory: Option<Arc<dyn ServerFactory>>,
    #[serde(skip)]
    pub endpoint_channel: Option<tokio::sync::mpsc::Receiver<Vec<Endpoint>>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen", &self.listen)
            .field("port", &self.port)
            .field("endpoints", &self.endpoints.len())
            .field("hints", &self.hints.len())
            .field("users", &self.users.len())
            .field("factory", &self.factory.is_some())
            .field("endpoint_channel", &self.endpoint_channel.is_some())
            .finish()
    }
}

/// Returns the first non-empty string of the list.
pub fn first_non_empty<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}
