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

//! Served-mode brokering: the parent is an inbound SSH session and the child
//! connection reuses its channel, PTY and (optionally) forwarded agent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::server::Handle;
use russh::ChannelId;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{connect, BrokerParams, SessionCommand, SessionOutput, SshClient};
use crate::blocking::SessionInput;
use crate::config::{first_non_empty, Endpoint};
use crate::pty::{Window, RESET_SEQUENCE};
use crate::ssh::auth::{remote_auth, AgentBridge, AgentTransport};
use crate::ssh::KnownHosts;

/// The inbound session a brokered connection reuses.
///
/// Built by the server handler once the parent session is interactive; the
/// winch receiver is shared so consecutive handoffs on one parent each see
/// resize events.
pub struct ServedParent {
    pub handle: Handle,
    pub channel_id: ChannelId,
    pub user: String,
    pub remote_addr: Option<SocketAddr>,
    /// Environment accepted from the parent's `env` requests.
    pub env: Vec<String>,
    pub term: String,
    pub window: Window,
    pub winch: Arc<Mutex<mpsc::Receiver<Window>>>,
    /// Fires when the parent session tears down.
    pub done: CancellationToken,
    pub trust_dir: PathBuf,
}

impl ServedParent {
    /// Writer for the parent's stdout.
    pub fn stdout(&self) -> ChannelWriter {
        ChannelWriter {
            handle: self.handle.clone(),
            channel_id: self.channel_id,
            ext: None,
        }
    }

    /// Writer for the parent's stderr.
    pub fn stderr(&self) -> ChannelWriter {
        ChannelWriter {
            handle: self.handle.clone(),
            channel_id: self.channel_id,
            ext: Some(1),
        }
    }
}

/// Writes into the parent session channel, optionally as extended data.
pub struct ChannelWriter {
    handle: Handle,
    channel_id: ChannelId,
    ext: Option<u32>,
}

#[async_trait]
impl SessionOutput for ChannelWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let payload = russh::CryptoVec::from_slice(data);
        let result = match self.ext {
            None => self.handle.data(self.channel_id, payload).await,
            Some(ext) => {
                self.handle
                    .extended_data(self.channel_id, ext, payload)
                    .await
            }
        };
        result.map_err(|_| anyhow::anyhow!("parent channel closed"))
    }
}

/// Reaches the parent's agent by opening another agent channel on the parent
/// connection.
struct ServedAgentBridge {
    handle: Handle,
}

#[async_trait]
impl AgentBridge for ServedAgentBridge {
    async fn open(&self) -> Result<Pin<Box<dyn AgentTransport>>> {
        let channel = self
            .handle
            .channel_open_agent()
            .await
            .context("failed to open agent channel to the parent")?;
        Ok(Box::pin(channel.into_stream()))
    }
}

/// Builds served handoff sessions for one parent.
pub struct RemoteClient {
    parent: Arc<ServedParent>,
}

impl RemoteClient {
    pub fn new(parent: Arc<ServedParent>) -> Self {
        Self { parent }
    }
}

impl SshClient for RemoteClient {
    fn for_endpoint(&mut self, endpoint: &Endpoint) -> Box<dyn SessionCommand> {
        Box::new(RemoteSession {
            endpoint: endpoint.clone(),
            parent: Arc::clone(&self.parent),
            stdin: None,
            stdout: None,
            stderr: None,
        })
    }
}

/// A pending served connection to one endpoint.
pub struct RemoteSession {
    endpoint: Endpoint,
    parent: Arc<ServedParent>,
    stdin: Option<Box<dyn SessionInput>>,
    stdout: Option<Box<dyn SessionOutput>>,
    stderr: Option<Box<dyn SessionOutput>>,
}

#[async_trait]
impl SessionCommand for RemoteSession {
    fn set_stdin(&mut self, stdin: Box<dyn SessionInput>) {
        self.stdin = Some(stdin);
    }

    fn set_stdout(&mut self, stdout: Box<dyn SessionOutput>) {
        self.stdout = Some(stdout);
    }

    fn set_stderr(&mut self, stderr: Box<dyn SessionOutput>) {
        self.stderr = Some(stderr);
    }

    async fn run(&mut self) -> Result<()> {
        let endpoint = self.endpoint.clone();
        let parent = Arc::clone(&self.parent);

        let mut stdout = self
            .stdout
            .take()
            .unwrap_or_else(|| Box::new(parent.stdout()));
        let mut stderr = self
            .stderr
            .take()
            .unwrap_or_else(|| Box::new(parent.stderr()));
        let stdin = self.stdin.take().context("served session needs a stdin")?;

        stdout.write(RESET_SEQUENCE.as_bytes()).await?;

        // Prefer the agent the parent forwarded; an ephemeral key otherwise.
        let agent_stream = match parent.handle.channel_open_agent().await {
            Ok(channel) => Some(channel.into_stream()),
            Err(err) => {
                tracing::debug!(error = %err, "parent agent not available");
                stderr
                    .write(b"wishlist: ssh agent not available\n\r")
                    .await
                    .ok();
                None
            }
        };
        let bridge: Option<Arc<dyn AgentBridge>> = agent_stream.is_some().then(|| {
            Arc::new(ServedAgentBridge {
                handle: parent.handle.clone(),
            }) as Arc<dyn AgentBridge>
        });

        let resolved = remote_auth(agent_stream, bridge, &parent.trust_dir)
            .await
            .context("failed to set up an authentication method")?;

        tracing::info!(
            user = %parent.user,
            endpoint = %endpoint.name,
            remote = ?parent.remote_addr,
            "connecting"
        );

        let params = BrokerParams {
            user: first_non_empty([endpoint.user.as_str(), parent.user.as_str()]),
            endpoint,
            parent_env: parent.env.clone(),
            term: parent.term.clone(),
            window: parent.window,
            resolved,
            known_hosts: KnownHosts::in_dir(&parent.trust_dir),
            interactive: false,
            abort: parent.done.child_token(),
        };

        let brokered = connect(params).await?;

        // Relay resize events from the shared parent receiver for the
        // duration of this handoff.
        let (winch_tx, winch_rx) = mpsc::channel(16);
        {
            let parent = Arc::clone(&parent);
            let done = parent.done.child_token();
            tokio::spawn(async move {
                let mut source = parent.winch.lock().await;
                loop {
                    tokio::select! {
                        _ = done.cancelled() => return,
                        _ = winch_tx.closed() => return,
                        window = source.recv() => match window {
                            Some(window) => {
                                if winch_tx.send(window).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        },
                    }
                }
            });
        }

        let result = brokered
            .run(stdin, stdout.as_mut(), stderr.as_mut(), winch_rx)
            .await;

        stdout.write(RESET_SEQUENCE.as_bytes()).await.ok();
        result
    }
}
