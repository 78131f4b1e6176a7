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

//! Configuration loading and search-order resolution.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::hints::apply_hints;
use super::ssh_config;
use super::types::{Config, Endpoint};
use super::utils::expand_tilde;

/// Candidate configuration paths, in order of preference.
pub fn user_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(".wishlist/config.yaml"),
        PathBuf::from(".wishlist/config.yml"),
        PathBuf::from(".wishlist/config"),
    ];

    if let Some(dirs) = directories::BaseDirs::new() {
        let cfg = dirs.config_dir();
        paths.push(cfg.join("wishlist.yaml"));
        paths.push(cfg.join("wishlist.yml"));
        paths.push(cfg.join("wishlist"));
        paths.push(dirs.home_dir().join(".ssh").join("config"));
    }

    paths.push(PathBuf::from("/etc/ssh/ssh_config"));
    paths
}

/// Loads the first readable configuration, trying the explicit path first and
/// the standard locations after it. `seed` endpoints come from discovery
/// adapters and are refined by whichever file wins.
///
/// Returns the parsed configuration and the path it came from.
pub fn load(explicit: Option<&Path>, seed: &[Endpoint]) -> Result<(Config, PathBuf)> {
    let mut not_found = Vec::new();

    let candidates = explicit
        .map(|p| p.to_path_buf())
        .into_iter()
        .chain(user_config_paths());

    for path in candidates {
        let path = expand_tilde(&path);
        match load_file(&path, seed) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "using configuration file");
                return Ok((config, path));
            }
            Err(err) => {
                tracing::info!(path = %path.display(), error = %err, "not using");
                let io_not_found = err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound);
                if io_not_found {
                    not_found.push(format!("{:?}: {err}", path.display()));
                    continue;
                }
                return Err(err);
            }
        }
    }

    anyhow::bail!("no valid config files found: {}", not_found.join("; "))
}

/// Loads a single configuration file, dispatching on extension: `.yaml`/`.yml`
/// parse as YAML, anything else as an OpenSSH-style config.
pub fn load_file(path: &Path, seed: &[Endpoint]) -> Result<Config> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => load_yaml(path, seed),
        _ => load_ssh_config(path, seed),
    }
}

fn load_yaml(path: &Path, seed: &[Endpoint]) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    let mut config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))?;

    let seeded = apply_hints(seed.to_vec(), &config.hints);
    config.endpoints.extend(seeded);
    Ok(config)
}

fn load_ssh_config(path: &Path, seed: &[Endpoint]) -> Result<Config> {
    let endpoints = ssh_config::parse_file(path, seed)?;
    Ok(Config {
        endpoints,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_with_hint_applied_to_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "endpoints:\n  - name: static\n    address: static:22\nhints:\n  - match: \"db-*\"\n    user: ops\n    port: \"2222\""
        )
        .unwrap();

        let seed = vec![Endpoint {
            name: "db-01".to_string(),
            address: "db-01:22".to_string(),
            ..Default::default()
        }];
        let config = load_file(&path, &seed).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        let db = config.endpoints.iter().find(|e| e.name == "db-01").unwrap();
        assert_eq!(db.user, "ops");
        assert_eq!(db.address, "db-01:2222");
    }

    #[test]
    fn test_ssh_config_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "Host foo\n  Port 2222\n").unwrap();

        let config = load_file(&path, &[]).unwrap();
        assert_eq!(config.endpoints[0].address, "foo:2222");
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mine.yaml");
        std::fs::write(&path, "endpoints:\n  - name: x\n    address: x:22\n").unwrap();

        let (config, used) = load(Some(&path), &[]).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.endpoints[0].name, "x");
    }

    #[test]
    fn test_broken_yaml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "endpoints: [unclosed").unwrap();
        assert!(load(Some(&path), &[]).is_err());
    }
}
