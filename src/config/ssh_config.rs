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

//! OpenSSH-style configuration intake.
//!
//! Parses a subset of the `ssh_config` keyword set into endpoints. `Host`
//! patterns containing `*` are wildcard sections, merged into every concrete
//! host they match. `Include` directives are expanded and merged recursively;
//! `Match` blocks are ignored.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

use super::types::{first_non_empty, join_host_port, split_host_port, Endpoint};
use super::utils::expand_tilde;

/// Accumulated settings for one `Host` section.
#[derive(Debug, Clone, Default, PartialEq)]
struct HostInfo {
    user: String,
    hostname: String,
    port: String,
    identity_files: Vec<String>,
    forward_agent: String,
    request_tty: String,
    remote_command: String,
    proxy_jump: String,
    send_env: Vec<String>,
    set_env: Vec<String>,
    preferred_authentications: Vec<String>,
    timeout_secs: u64,
}

/// Insertion-ordered map of host pattern to settings.
#[derive(Debug, Default)]
struct HostMap {
    inner: HashMap<String, HostInfo>,
    keys: Vec<String>,
}

impl HostMap {
    fn set(&mut self, key: &str, value: HostInfo) {
        if !self.inner.contains_key(key) {
            self.keys.push(key.to_string());
        }
        self.inner.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> HostInfo {
        self.inner.get(key).cloned().unwrap_or_default()
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &HostInfo)> {
        self.keys.iter().map(|k| (k, &self.inner[k]))
    }
}

/// Merges two sections: `primary` scalars win when non-empty, lists come out
/// as `base` entries followed by `primary` entries.
fn merge_info(primary: &HostInfo, mut base: HostInfo) -> HostInfo {
    if !primary.hostname.is_empty() {
        base.hostname = primary.hostname.clone();
    }
    if !primary.port.is_empty() {
        base.port = primary.port.clone();
    }
    if !primary.user.is_empty() {
        base.user = primary.user.clone();
    }
    if !primary.forward_agent.is_empty() {
        base.forward_agent = primary.forward_agent.clone();
    }
    if !primary.request_tty.is_empty() {
        base.request_tty = primary.request_tty.clone();
    }
    if !primary.remote_command.is_empty() {
        base.remote_command = primary.remote_command.clone();
    }
    if !primary.proxy_jump.is_empty() {
        base.proxy_jump = primary.proxy_jump.clone();
    }
    if primary.timeout_secs > 0 {
        base.timeout_secs = primary.timeout_secs;
    }
    base.identity_files.extend(primary.identity_files.iter().cloned());
    base.send_env.extend(primary.send_env.iter().cloned());
    base.set_env.extend(primary.set_env.iter().cloned());
    base.preferred_authentications
        .extend(primary.preferred_authentications.iter().cloned());
    base
}

/// Reads and parses the file at the given path, merging `seed` endpoints in.
pub fn parse_file(path: impl AsRef<Path>, seed: &[Endpoint]) -> Result<Vec<Endpoint>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to open config: {}", path.display()))?;
    parse_str(&content, seed)
}

/// Parses SSH-config text into endpoints, merging `seed` endpoints in.
///
/// Seed records (from discovery adapters) provide name and address; matching
/// concrete host sections refine them, and wildcard sections overlay both.
pub fn parse_str(content: &str, seed: &[Endpoint]) -> Result<Vec<Endpoint>> {
    let infos = parse_internal(content)?;
    let (wildcards, hosts) = split_sections(infos, seed);

    let mut endpoints = Vec::new();
    for (name, info) in hosts.iter() {
        let mut info = info.clone();
        for (pattern, overlay) in wildcards.iter() {
            let glob = match glob::Pattern::new(pattern) {
                Ok(glob) => glob,
                Err(err) => {
                    tracing::error!(pattern = %pattern, error = %err, "invalid Host pattern, skipping");
                    continue;
                }
            };
            if glob.matches(name) || (!info.hostname.is_empty() && glob.matches(&info.hostname)) {
                info = merge_info(&info, overlay.clone());
            }
        }

        endpoints.push(Endpoint {
            name: name.clone(),
            address: join_host_port(
                &first_non_empty([info.hostname.as_str(), name.as_str()]),
                &first_non_empty([info.port.as_str(), "22"]),
            ),
            user: info.user,
            identity_files: info.identity_files,
            forward_agent: string_to_bool(&info.forward_agent),
            request_tty: string_to_bool(&info.request_tty),
            remote_command: info.remote_command,
            connect_timeout: info.timeout_secs,
            set_env: info.set_env,
            send_env: info.send_env,
            preferred_authentications: info.preferred_authentications,
            proxy_jump: info.proxy_jump,
            ..Default::default()
        });
    }

    Ok(endpoints)
}

fn string_to_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "yes")
}

fn parse_internal(content: &str) -> Result<HostMap> {
    let mut infos = HostMap::default();
    let mut patterns: Vec<String> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Match sections are not supported; skip the header and let the
        // keyword lines below it fall through harmlessly as unknowns.
        if line.to_lowercase().starts_with("match") {
            continue;
        }

        let Some((key, value)) = split_node(line) else {
            bail!("invalid node: {line:?}");
        };

        if key.eq_ignore_ascii_case("host") {
            patterns = value.split_whitespace().map(str::to_string).collect();
            for pattern in &patterns {
                if !infos.contains(pattern) {
                    infos.set(pattern, HostInfo::default());
                }
            }
            continue;
        }

        if patterns.is_empty() {
            // top-level directives outside any Host block apply to every host
            patterns = vec!["*".to_string()];
        }

        for pattern in patterns.clone() {
            let mut info = infos.get(&pattern);
            match key.to_lowercase().as_str() {
                "hostname" => info.hostname = value.to_string(),
                "user" => info.user = value.to_string(),
                "port" => info.port = value.to_string(),
                "identityfile" => info.identity_files.push(value.to_string()),
                "forwardagent" => info.forward_agent = value.to_string(),
                "requesttty" => info.request_tty = value.to_string(),
                "remotecommand" => info.remote_command = value.to_string(),
                "proxyjump" => info.proxy_jump = value.to_string(),
                "connecttimeout" => {
                    info.timeout_secs = value
                        .parse()
                        .with_context(|| format!("invalid ConnectTimeout: {value}"))?;
                }
                "sendenv" => info.send_env.push(value.to_string()),
                "setenv" => info.set_env.push(value.to_string()),
                "preferredauthentications" => info
                    .preferred_authentications
                    .extend(value.split(',').map(|s| s.trim().to_string())),
                "include" => {
                    let path = expand_tilde(value);
                    match std::fs::read_to_string(&path) {
                        Ok(included) => {
                            infos.set(&pattern, info);
                            let included = parse_internal(&included)?;
                            infos = merge_maps(infos, included);
                            info = infos.get(&pattern);
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                            tracing::debug!(path = %path.display(), "include not found, skipping");
                        }
                        Err(err) => {
                            return Err(err).with_context(|| {
                                format!("failed to open config: {}", path.display())
                            });
                        }
                    }
                }
                other => {
                    tracing::debug!(key = %other, "ignoring unsupported keyword");
                }
            }
            infos.set(&pattern, info);
        }
    }

    Ok(infos)
}

/// Splits a config line into keyword and value, accepting both `Key value`
/// and `Key=value` forms.
fn split_node(line: &str) -> Option<(&str, &str)> {
    let idx = line.find([' ', '\t', '='])?;
    let (key, rest) = line.split_at(idx);
    let value = rest.trim_start_matches(['=', ' ', '\t']).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn merge_maps(current: HostMap, included: HostMap) -> HostMap {
    let mut result = HostMap::default();

    for (key, value) in current.iter() {
        if included.contains(key) {
            result.set(key, merge_info(value, included.get(key)));
        } else {
            result.set(key, value.clone());
        }
    }
    for (key, value) in included.iter() {
        if !result.contains(key) {
            result.set(key, value.clone());
        }
    }
    result
}

/// Separates wildcard sections from concrete hosts and seeds the latter with
/// discovery records. Concrete values win over seed values.
fn split_sections(infos: HostMap, seed: &[Endpoint]) -> (HostMap, HostMap) {
    let mut wildcards = HostMap::default();
    let mut hosts = HostMap::default();

    for endpoint in seed {
        let (hostname, port) = split_host_port(&endpoint.address);
        hosts.set(
            &endpoint.name,
            HostInfo {
                hostname,
                port,
                ..Default::default()
            },
        );
    }

    for (key, value) in infos.iter() {
        if key.contains('*') {
            wildcards.set(key, value.clone());
        } else {
            let seeded = hosts.get(key);
            hosts.set(key, merge_info(value, seeded));
        }
    }

    (wildcards, hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_basic() {
        let endpoints = parse_str(
            "Host foo\n  Hostname foo.example\n  Port 2222\n  User carlos\n",
            &[],
        )
        .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "foo");
        assert_eq!(endpoints[0].address, "foo.example:2222");
        assert_eq!(endpoints[0].user, "carlos");
    }

    #[test]
    fn test_parse_defaults() {
        let endpoints = parse_str("Host foo\n  User carlos\n", &[]).unwrap();
        assert_eq!(endpoints[0].address, "foo:22");
    }

    #[test]
    fn test_equals_form_and_comments() {
        let endpoints = parse_str(
            "# a comment\nHost foo\n  Hostname=foo.example\n  Port = 2222\n",
            &[],
        )
        .unwrap();
        assert_eq!(endpoints[0].address, "foo.example:2222");
    }

    #[test]
    fn test_wildcard_merge() {
        let endpoints = parse_str(
            "Host *\n  User shared\n  SendEnv FOO\nHost foo\n  Hostname foo.example\nHost bar\n  User own\n",
            &[],
        )
        .unwrap();
        let foo = endpoints.iter().find(|e| e.name == "foo").unwrap();
        assert_eq!(foo.user, "shared");
        assert_eq!(foo.send_env, ["FOO"]);

        // concrete value wins over the wildcard
        let bar = endpoints.iter().find(|e| e.name == "bar").unwrap();
        assert_eq!(bar.user, "own");
        assert_eq!(bar.send_env, ["FOO"]);
    }

    #[test]
    fn test_wildcard_matches_resolved_hostname() {
        let endpoints = parse_str(
            "Host *.example\n  User shared\nHost foo\n  Hostname foo.example\n",
            &[],
        )
        .unwrap();
        let foo = endpoints.iter().find(|e| e.name == "foo").unwrap();
        assert_eq!(foo.user, "shared");
    }

    #[test]
    fn test_match_ignored() {
        let endpoints =
            parse_str("Match user carlos\nHost foo\n  Port 22\n", &[]).unwrap();
        assert_eq!(endpoints.len(), 1);
    }

    #[test]
    fn test_preferred_authentications_comma_joined() {
        let endpoints = parse_str(
            "Host foo\n  PreferredAuthentications publickey,keyboard-interactive\n",
            &[],
        )
        .unwrap();
        assert_eq!(
            endpoints[0].preferred_authentications,
            ["publickey", "keyboard-interactive"]
        );
    }

    #[test]
    fn test_bools_and_command() {
        let endpoints = parse_str(
            "Host foo\n  ForwardAgent yes\n  RequestTTY true\n  RemoteCommand tmux a\n  ConnectTimeout 10\n",
            &[],
        )
        .unwrap();
        assert!(endpoints[0].forward_agent);
        assert!(endpoints[0].request_tty);
        assert_eq!(endpoints[0].remote_command, "tmux a");
        assert_eq!(endpoints[0].connect_timeout, 10);
    }

    #[test]
    fn test_invalid_connect_timeout() {
        assert!(parse_str("Host foo\n  ConnectTimeout nope\n", &[]).is_err());
    }

    #[test]
    fn test_include_merges_identity_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let included_path = dir.path().join("1.included");
        let mut included = std::fs::File::create(&included_path).unwrap();
        writeln!(included, "Host test.foo.bar\n  IdentityFile ~/.ssh/id_rsa2").unwrap();

        let main = format!(
            "Host test.foo.bar\n  Include {}\n  IdentityFile ~/.ssh/other_id\n",
            included_path.display()
        );
        let endpoints = parse_str(&main, &[]).unwrap();
        let endpoint = endpoints.iter().find(|e| e.name == "test.foo.bar").unwrap();
        assert_eq!(
            endpoint.identity_files,
            ["~/.ssh/id_rsa2", "~/.ssh/other_id"]
        );
    }

    #[test]
    fn test_missing_include_skipped() {
        let endpoints = parse_str(
            "Host foo\n  Include /definitely/not/here\n  Port 2222\n",
            &[],
        )
        .unwrap();
        assert_eq!(endpoints[0].address, "foo:2222");
    }

    #[test]
    fn test_seed_refined_by_config() {
        let seed = vec![Endpoint {
            name: "disco".to_string(),
            address: "disco.local:22".to_string(),
            ..Default::default()
        }];
        let endpoints = parse_str("Host disco\n  User ops\n  Port 2222\n", &seed).unwrap();
        let disco = endpoints.iter().find(|e| e.name == "disco").unwrap();
        assert_eq!(disco.user, "ops");
        assert_eq!(disco.address, "disco.local:2222");
    }

    #[test]
    fn test_seed_kept_without_config_section() {
        let seed = vec![Endpoint {
            name: "disco".to_string(),
            address: "disco.local:22".to_string(),
            ..Default::default()
        }];
        let endpoints = parse_str("Host other\n  Port 22\n", &seed).unwrap();
        assert!(endpoints.iter().any(|e| e.name == "disco"));
        assert!(endpoints.iter().any(|e| e.name == "other"));
    }
}
