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

//! Trust-on-first-use host key verification.
//!
//! Every connection validates the presented host key against an OpenSSH
//! known-hosts file. Known key: accept. Unknown host: append and accept.
//! Changed key: refuse loudly. The file is opened per callback so concurrent
//! connections interleave appends safely.

use anyhow::{Context, Result};
use russh::keys::PublicKey;
use std::path::{Path, PathBuf};

/// Where the trust file lives for each deployment shape.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.ssh/known_hosts`, the local-mode trust file.
    pub fn user_default() -> Result<Self> {
        let dirs = directories::BaseDirs::new().context("failed to get user home dir")?;
        Ok(Self::new(dirs.home_dir().join(".ssh").join("known_hosts")))
    }

    /// `<dir>/known_hosts` under the served-mode trust directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("known_hosts"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validates `key` for `host:port`, appending it on first sight.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<()> {
        self.ensure_file()?;

        match russh::keys::check_known_hosts_path(host, port, key, &self.path) {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Host unknown: record it so the next connection matches.
                russh::keys::known_hosts::learn_known_hosts_path(host, port, key, &self.path)
                    .context("failed to append to known_hosts")?;
                tracing::info!(host = %host, port = %port, "added host key to known_hosts");
                Ok(())
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                anyhow::bail!(
                    "possible man-in-the-middle attack: host key for {host}:{port} changed; \
                     if your host's key changed, edit {} (line {line})",
                    self.path.display()
                )
            }
            Err(err) => Err(err).context("failed to check known_hosts"),
        }
    }

    /// Creates the file (mode 0600) and its parent directory when missing.
    fn ensure_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(&self.path)
            .with_context(|| format!("failed to open known_hosts: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::{Algorithm, PrivateKey};

    fn test_key() -> PublicKey {
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    #[test]
    fn test_tofu_first_connect_appends() {
        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::in_dir(dir.path());
        let key = test_key();

        kh.verify("h.example", 22, &key).unwrap();

        let content = std::fs::read_to_string(kh.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("h.example"));
    }

    #[test]
    fn test_second_connect_same_key_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::in_dir(dir.path());
        let key = test_key();

        kh.verify("h.example", 22, &key).unwrap();
        let before = std::fs::read_to_string(kh.path()).unwrap();

        kh.verify("h.example", 22, &key).unwrap();
        let after = std::fs::read_to_string(kh.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_changed_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::in_dir(dir.path());

        kh.verify("h.example", 22, &test_key()).unwrap();
        let err = kh.verify("h.example", 22, &test_key()).unwrap_err();
        assert!(err.to_string().contains("possible man-in-the-middle"));
    }

    #[test]
    fn test_distinct_hosts_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::in_dir(dir.path());

        kh.verify("a.example", 22, &test_key()).unwrap();
        kh.verify("b.example", 2222, &test_key()).unwrap();

        let content = std::fs::read_to_string(kh.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    #[cfg(unix)]
    fn test_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::in_dir(dir.path());
        kh.verify("h.example", 22, &test_key()).unwrap();

        let mode = std::fs::metadata(kh.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
