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

//! ProxyJump specification parsing.
//!
//! A jump spec follows the OpenSSH `[user@]hostname[:port]` form. Usernames
//! may themselves contain `@` (everything up to the last `@` is the user);
//! the port defaults to 22.

use crate::config::split_host_port;

/// A parsed jump host specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpHost {
    /// Username override for the hop; empty means reuse the endpoint config.
    pub user: String,
    /// Hostname or address of the jump host.
    pub host: String,
    /// Port of the jump host.
    pub port: u16,
}

impl JumpHost {
    /// The `host:port` address to dial.
    pub fn address(&self) -> String {
        crate::config::join_host_port(&self.host, &self.port.to_string())
    }
}

/// Splits a jump spec into its user and `host:port` halves, defaulting the
/// port to 22.
///
/// `"user@bar@foo:2323"` becomes `("user@bar", "foo:2323")`; a bare `"foo"`
/// becomes `("", "foo:22")`.
pub fn split_jump(jump: &str) -> (String, String) {
    match jump.rsplit_once('@') {
        Some((user, host)) => (user.to_string(), ensure_jump_port(host)),
        None => (String::new(), ensure_jump_port(jump)),
    }
}

/// Parses a jump spec into a [`JumpHost`].
pub fn parse_jump(jump: &str) -> anyhow::Result<JumpHost> {
    let (user, address) = split_jump(jump);
    let (host, port) = split_host_port(&address);
    if host.is_empty() {
        anyhow::bail!("empty jump host in {jump:?}");
    }
    let port = port
        .parse::<u16>()
        .map_err(|err| anyhow::anyhow!("invalid jump port in {jump:?}: {err}"))?;
    Ok(JumpHost { user, host, port })
}

fn ensure_jump_port(addr: &str) -> String {
    let (_, port) = split_host_port(addr);
    if port.is_empty() {
        format!("{addr}:22")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_jump_plain_host() {
        assert_eq!(split_jump("foo"), ("".to_string(), "foo:22".to_string()));
    }

    #[test]
    fn test_split_jump_with_port() {
        assert_eq!(
            split_jump("foo:2234"),
            ("".to_string(), "foo:2234".to_string())
        );
    }

    #[test]
    fn test_split_jump_with_user() {
        assert_eq!(
            split_jump("user@foo:2323"),
            ("user".to_string(), "foo:2323".to_string())
        );
    }

    #[test]
    fn test_split_jump_user_contains_at() {
        assert_eq!(
            split_jump("user@bar@foo:2323"),
            ("user@bar".to_string(), "foo:2323".to_string())
        );
    }

    #[test]
    fn test_parse_jump() {
        let jump = parse_jump("admin@bastion:2222").unwrap();
        assert_eq!(jump.user, "admin");
        assert_eq!(jump.host, "bastion");
        assert_eq!(jump.port, 2222);
        assert_eq!(jump.address(), "bastion:2222");
    }

    #[test]
    fn test_parse_jump_defaults() {
        let jump = parse_jump("bastion").unwrap();
        assert_eq!(jump.user, "");
        assert_eq!(jump.port, 22);
    }

    #[test]
    fn test_parse_jump_errors() {
        assert!(parse_jump("").is_err());
        assert!(parse_jump("user@").is_err());
    }
}
