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

//! Authentication method resolution.
//!
//! Local parents collect identity files, the `$SSH_AUTH_SOCK` agent and the
//! conventional `~/.ssh/id_*` keys, in that order. Remote parents (served
//! mode) prefer the agent forwarded over the parent connection and fall back
//! to an endpoint-scoped ephemeral Ed25519 key under the trust directory.

use anyhow::{Context, Result};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKey, PublicKey};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use crate::config::{expand_tilde, Endpoint};
use crate::keygen;

/// Default key files probed when nothing else is configured.
const DEFAULT_KEY_NAMES: [&str; 5] = [
    "id_rsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
];

/// Name of the ephemeral client key under the served-mode trust directory.
const CLIENT_KEY_NAME: &str = "client_ed25519";

/// Transport an agent connection rides on.
pub trait AgentTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AgentTransport for T {}

/// Opens a fresh stream to the parent's agent.
///
/// Agent forwarding on the brokered connection means the far server opens
/// `auth-agent@openssh.com` channels back to us; each one is bridged to a new
/// upstream agent stream produced here.
#[async_trait::async_trait]
pub trait AgentBridge: Send + Sync {
    async fn open(&self) -> Result<Pin<Box<dyn AgentTransport>>>;
}

/// Bridges to the local `$SSH_AUTH_SOCK` agent.
pub struct LocalAgentBridge {
    socket: PathBuf,
}

impl LocalAgentBridge {
    /// The bridge for the current environment, when an agent socket exists.
    pub fn from_env() -> Option<Self> {
        let socket = std::env::var("SSH_AUTH_SOCK").ok()?;
        if socket.is_empty() {
            return None;
        }
        let socket = PathBuf::from(socket);
        socket.exists().then_some(Self { socket })
    }
}

#[async_trait::async_trait]
impl AgentBridge for LocalAgentBridge {
    async fn open(&self) -> Result<Pin<Box<dyn AgentTransport>>> {
        let stream = tokio::net::UnixStream::connect(&self.socket)
            .await
            .with_context(|| {
                format!("failed to connect to SSH_AUTH_SOCK: {}", self.socket.display())
            })?;
        Ok(Box::pin(stream))
    }
}

type BoxedAgent = AgentClient<Pin<Box<dyn AgentTransport>>>;

/// A connected SSH agent plus its advertised identities.
pub struct AgentAuth {
    pub client: tokio::sync::Mutex<BoxedAgent>,
    pub identities: Vec<PublicKey>,
}

impl AgentAuth {
    async fn from_stream(stream: impl AgentTransport + 'static) -> Result<Self> {
        let stream: Pin<Box<dyn AgentTransport>> = Box::pin(stream);
        let mut client: BoxedAgent = AgentClient::connect(stream);
        let identities = client
            .request_identities()
            .await
            .context("failed to request agent identities")?;
        for identity in &identities {
            log_offered_key(identity);
        }
        Ok(Self {
            client: tokio::sync::Mutex::new(client),
            identities,
        })
    }
}

/// One way to authenticate the outbound connection.
#[derive(Clone)]
pub enum AuthMethod {
    /// Offer these private keys, in order.
    Keys(Vec<Arc<PrivateKey>>),
    /// Sign with an agent's identities.
    Agent(Arc<AgentAuth>),
}

/// The outcome of resolution: methods to try in order, plus the agent handle
/// and bridge when one is available for forwarding into the child session.
pub struct ResolvedAuth {
    pub methods: Vec<AuthMethod>,
    pub agent: Option<Arc<AgentAuth>>,
    /// How the brokered connection reaches the parent's agent for forwarded
    /// channels. Present only when `agent` is.
    pub bridge: Option<Arc<dyn AgentBridge>>,
}

impl ResolvedAuth {
    pub fn agent_bridge(&self) -> Option<Arc<dyn AgentBridge>> {
        self.bridge.clone()
    }
}

/// Resolves authentication for a local parent.
///
/// Identity files configured on the endpoint come first (prompting for a
/// passphrase when a key is encrypted). A reachable `$SSH_AUTH_SOCK` agent is
/// added next; when neither produced anything, the default `~/.ssh` keys are
/// probed, skipping missing files silently.
pub async fn local_auth(endpoint: &Endpoint) -> Result<ResolvedAuth> {
    let mut methods = Vec::new();

    let identity_keys = load_identity_files(&endpoint.identity_files)?;
    if !identity_keys.is_empty() {
        methods.push(AuthMethod::Keys(identity_keys));
    }

    let agent = match try_local_agent().await {
        Ok(agent) => agent,
        Err(err) => {
            // No agent configured is not an error; the user just sees a note.
            eprintln!("wishlist: ssh agent not available");
            tracing::debug!(error = %err, "local agent unavailable");
            None
        }
    };
    if let Some(agent) = &agent {
        methods.push(AuthMethod::Agent(Arc::clone(agent)));
    }

    if methods.is_empty() {
        let fallback = load_default_keys()?;
        if !fallback.is_empty() {
            methods.push(AuthMethod::Keys(fallback));
        }
    }

    if methods.is_empty() {
        anyhow::bail!(
            "no authentication method available: configure identity_files, \
             start an ssh-agent, or create a key under ~/.ssh"
        );
    }

    let bridge = agent
        .as_ref()
        .and_then(|_| LocalAgentBridge::from_env())
        .map(|b| Arc::new(b) as Arc<dyn AgentBridge>);

    Ok(ResolvedAuth {
        methods,
        agent,
        bridge,
    })
}

/// Resolves authentication for a remote parent (served mode).
///
/// When the parent connection granted agent forwarding, `agent_stream` is the
/// opened agent channel and its signers are used. Otherwise the ephemeral
/// `client_ed25519` pair under the trust directory is created on first use
/// and offered.
pub async fn remote_auth(
    agent_stream: Option<impl AgentTransport + 'static>,
    agent_bridge: Option<Arc<dyn AgentBridge>>,
    trust_dir: &Path,
) -> Result<ResolvedAuth> {
    if let Some(stream) = agent_stream {
        match AgentAuth::from_stream(stream).await {
            Ok(agent) => {
                let agent = Arc::new(agent);
                return Ok(ResolvedAuth {
                    methods: vec![AuthMethod::Agent(Arc::clone(&agent))],
                    agent: Some(agent),
                    bridge: agent_bridge,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "forwarded agent unusable, falling back to ephemeral key");
            }
        }
    }

    let key = ephemeral_client_key(trust_dir)?;
    Ok(ResolvedAuth {
        methods: vec![AuthMethod::Keys(vec![key])],
        agent: None,
        bridge: None,
    })
}

/// Loads (or creates) the served-mode ephemeral client key.
pub fn ephemeral_client_key(trust_dir: &Path) -> Result<Arc<PrivateKey>> {
    let key = keygen::ensure_key_pair(&trust_dir.join(CLIENT_KEY_NAME), "wishlist-client")?;
    log_offered_key(key.public_key());
    Ok(Arc::new(key))
}

async fn try_local_agent() -> Result<Option<Arc<AgentAuth>>> {
    let socket = match std::env::var("SSH_AUTH_SOCK") {
        Ok(socket) if !socket.is_empty() => PathBuf::from(socket),
        _ => return Ok(None),
    };
    if !socket.exists() {
        return Ok(None);
    }

    let stream = tokio::net::UnixStream::connect(&socket)
        .await
        .with_context(|| format!("failed to connect to SSH_AUTH_SOCK: {}", socket.display()))?;
    tracing::info!("using SSH agent");
    Ok(Some(Arc::new(AgentAuth::from_stream(stream).await?)))
}

fn load_identity_files(identity_files: &[String]) -> Result<Vec<Arc<PrivateKey>>> {
    let mut keys = Vec::new();
    for file in identity_files {
        let path = expand_tilde(file);
        let key = load_private_key(&path)
            .with_context(|| format!("failed to read key: {path:?}"))?;
        log_offered_key(key.public_key());
        tracing::info!(path = %path.display(), "using identity file");
        keys.push(Arc::new(key));
    }
    Ok(keys)
}

fn load_default_keys() -> Result<Vec<Arc<PrivateKey>>> {
    let dirs = directories::BaseDirs::new().context("failed to get user home dir")?;
    let ssh_dir = dirs.home_dir().join(".ssh");

    let mut keys = Vec::new();
    for name in DEFAULT_KEY_NAMES {
        let path = ssh_dir.join(name);
        if !path.exists() {
            continue;
        }
        let key = load_private_key(&path)
            .with_context(|| format!("failed to read key: {path:?}"))?;
        log_offered_key(key.public_key());
        tracing::info!(path = %path.display(), "using key");
        keys.push(Arc::new(key));
    }
    Ok(keys)
}

/// Loads one private key, prompting for a passphrase when the file says it is
/// encrypted.
fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let contents = std::fs::read_to_string(path)?;

    let passphrase = if contents.contains("ENCRYPTED") {
        let prompt = format!("Enter the password for {path:?}: ");
        Some(Zeroizing::new(
            rpassword::prompt_password(prompt).context("failed to read password")?,
        ))
    } else {
        None
    };

    russh::keys::load_secret_key(path, passphrase.as_ref().map(|p| p.as_str()))
        .context("failed to parse private key")
}

fn log_offered_key(key: &PublicKey) {
    tracing::info!(
        key_type = %key.algorithm(),
        fingerprint = %key.fingerprint(HashAlg::Sha256),
        "offering public key"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::Algorithm;
    use ssh_key::LineEnding;

    fn write_plain_key(dir: &Path, name: &str) -> PathBuf {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_identity_files_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_plain_key(dir.path(), "a_key");
        let b = write_plain_key(dir.path(), "b_key");

        let keys = load_identity_files(&[
            a.to_string_lossy().to_string(),
            b.to_string_lossy().to_string(),
        ])
        .unwrap();
        assert_eq!(keys.len(), 2);

        let want_first = PrivateKey::read_openssh_file(&a).unwrap();
        assert_eq!(
            keys[0].public_key().to_openssh().unwrap(),
            want_first.public_key().to_openssh().unwrap()
        );
    }

    #[test]
    fn test_missing_identity_file_is_fatal() {
        assert!(load_identity_files(&["/definitely/not/here".to_string()]).is_err());
    }

    #[test]
    fn test_ephemeral_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = ephemeral_client_key(dir.path()).unwrap();
        let second = ephemeral_client_key(dir.path()).unwrap();
        assert_eq!(
            first.public_key().to_openssh().unwrap(),
            second.public_key().to_openssh().unwrap()
        );
        assert!(dir.path().join("client_ed25519").exists());
        assert!(dir.path().join("client_ed25519.pub").exists());
    }

    #[tokio::test]
    async fn test_remote_auth_without_agent_uses_ephemeral_key() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = remote_auth(None::<tokio::io::DuplexStream>, None, dir.path())
            .await
            .unwrap();
        assert!(resolved.agent.is_none());
        assert_eq!(resolved.methods.len(), 1);
        assert!(matches!(&resolved.methods[0], AuthMethod::Keys(keys) if keys.len() == 1));
    }
}
