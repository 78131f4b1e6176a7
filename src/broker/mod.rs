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

//! The session broker: hands a parent session off to a child SSH connection.
//!
//! A brokered session reuses the parent's terminal and input stream. The
//! broker dials the endpoint (optionally through a ProxyJump), opens a
//! session channel, applies the endpoint environment, optionally forwards the
//! parent's agent, requests a PTY sized like the parent's, wires the streams
//! and waits for the child to finish. Deferred close actions drain on every
//! exit path.

pub mod local;
pub mod remote;

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::ChannelMsg;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blocking::SessionInput;
use crate::closers::Closers;
use crate::config::Endpoint;
use crate::pty::Window;
use crate::ssh::auth::{AgentBridge, ResolvedAuth};
use crate::ssh::{dial, Connection, DialConfig, KnownHosts};

pub use local::{LocalClient, LocalSession};
pub use remote::{RemoteClient, RemoteSession, ServedParent};

/// A byte sink the broker writes child output into.
#[async_trait]
pub trait SessionOutput: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;
}

/// Wraps any async writer into a [`SessionOutput`], flushing per write so
/// interactive output stays snappy.
pub struct WriterOutput<W>(pub W);

#[async_trait]
impl<W> SessionOutput for WriterOutput<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.0.write_all(data).await?;
        self.0.flush().await?;
        Ok(())
    }
}

/// The process-like handoff object: a pending connection to one endpoint with
/// settable standard streams, run to completion with [`run`].
///
/// [`run`]: SessionCommand::run
#[async_trait]
pub trait SessionCommand: Send {
    fn set_stdin(&mut self, stdin: Box<dyn SessionInput>);
    fn set_stdout(&mut self, stdout: Box<dyn SessionOutput>);
    fn set_stderr(&mut self, stderr: Box<dyn SessionOutput>);

    /// Connects and blocks until the child session ends. `Ok(())` on clean
    /// close; errors carry the phase they happened in.
    async fn run(&mut self) -> Result<()>;
}

/// Builds handoff objects for endpoints.
pub trait SshClient {
    fn for_endpoint(&mut self, endpoint: &Endpoint) -> Box<dyn SessionCommand>;
}

/// Everything the connect sequence needs besides the streams.
pub struct BrokerParams {
    pub endpoint: Endpoint,
    /// Resolved username: endpoint user, parent user, local user.
    pub user: String,
    /// Parent environment as `KEY=VALUE` pairs.
    pub parent_env: Vec<String>,
    /// Parent terminal name for the PTY request.
    pub term: String,
    /// Parent window size at handoff time.
    pub window: Window,
    pub resolved: ResolvedAuth,
    pub known_hosts: KnownHosts,
    /// Whether auth prompts may reach a human.
    pub interactive: bool,
    /// Cancels a stalled dial (SIGINT locally, parent teardown served).
    pub abort: CancellationToken,
}

/// A dialed, authenticated connection, ready to run.
pub struct Brokered {
    params: BrokerParams,
    connection: Connection,
}

/// Dials and authenticates in a spawned task so `params.abort` can interrupt
/// even a stalled TCP connect.
pub async fn connect(params: BrokerParams) -> Result<Brokered> {
    let agent_bridge: Option<Arc<dyn AgentBridge>> = if params.endpoint.forward_agent {
        params.resolved.agent_bridge()
    } else {
        None
    };

    let dial_config = DialConfig {
        endpoint: params.endpoint.clone(),
        user: params.user.clone(),
        methods: params.resolved.methods.clone(),
        known_hosts: params.known_hosts.clone(),
        interactive: params.interactive,
        agent_bridge,
    };

    let mut dial_task = tokio::spawn(dial(dial_config));
    let connection = tokio::select! {
        _ = params.abort.cancelled() => {
            dial_task.abort();
            anyhow::bail!("connection aborted");
        }
        joined = &mut dial_task => joined
            .context("connection failed")?
            .context("connection failed")?,
    };

    Ok(Brokered { params, connection })
}

impl Brokered {
    /// Opens the session, wires the streams and waits for the child to end.
    /// The deferred close stack drains whatever happens.
    pub async fn run(
        self,
        stdin: Box<dyn SessionInput>,
        stdout: &mut dyn SessionOutput,
        stderr: &mut dyn SessionOutput,
        winch: mpsc::Receiver<Window>,
    ) -> Result<()> {
        let Brokered {
            params,
            connection: Connection {
                handle,
                mut closers,
            },
        } = self;

        let result =
            run_session(&params, &handle, stdin, stdout, stderr, winch).await;

        if let Err(err) = closers.close().await {
            tracing::warn!(error = %err, "errors while closing session resources");
        }
        result
    }
}

async fn run_session(
    params: &BrokerParams,
    handle: &russh::client::Handle<crate::ssh::ClientHandler>,
    mut stdin: Box<dyn SessionInput>,
    stdout: &mut dyn SessionOutput,
    stderr: &mut dyn SessionOutput,
    mut winch: mpsc::Receiver<Window>,
) -> Result<()> {
    let endpoint = &params.endpoint;

    let mut channel = handle
        .channel_open_session()
        .await
        .context("failed to open session")?;

    // Servers commonly refuse unknown names; that is per-key, not fatal.
    for (key, value) in endpoint.environment(params.parent_env.iter().map(String::as_str)) {
        if let Err(err) = channel.set_env(true, key.as_str(), value.as_str()).await {
            tracing::debug!(key = %key, error = %err, "server rejected env");
        }
    }

    if endpoint.forward_agent {
        if params.resolved.agent.is_none() {
            anyhow::bail!("requested ForwardAgent, but no agent is available");
        }
        tracing::info!("forwarding SSH agent");
        channel
            .agent_forward(true)
            .await
            .context("failed to forward agent")?;
    }

    let wants_tty = endpoint.remote_command.is_empty() || endpoint.request_tty;
    if wants_tty {
        tracing::info!("requesting tty");
        channel
            .request_pty(
                true,
                &params.term,
                params.window.width,
                params.window.height,
                0,
                0,
                &[],
            )
            .await
            .context("failed to request pty")?;
    }

    if endpoint.remote_command.is_empty() {
        channel
            .request_shell(true)
            .await
            .context("failed to start shell")?;
    } else {
        channel
            .exec(true, endpoint.remote_command.as_str())
            .await
            .with_context(|| format!("failed to run {:?}", endpoint.remote_command))?;
    }

    let mut exit_status: Option<u32> = None;
    let mut stdin_buf = [0u8; 4096];
    let mut stdin_alive = true;
    let mut winch_alive = wants_tty;

    enum Step {
        Msg(Option<ChannelMsg>),
        Stdin(std::io::Result<usize>),
        Winch(Option<Window>),
        Abort,
    }

    loop {
        let step = tokio::select! {
            msg = channel.wait() => Step::Msg(msg),
            read = stdin.read(&mut stdin_buf), if stdin_alive => Step::Stdin(read),
            window = winch.recv(), if winch_alive => Step::Winch(window),
            _ = params.abort.cancelled() => Step::Abort,
        };

        match step {
            Step::Msg(None) => break,
            Step::Msg(Some(msg)) => match msg {
                ChannelMsg::Data { data } => {
                    stdout.write(&data).await.context("session failed")?;
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        stderr.write(&data).await.context("session failed")?;
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                ChannelMsg::Close => break,
                _ => {}
            },
            Step::Stdin(Ok(n)) => {
                channel
                    .data(&stdin_buf[..n])
                    .await
                    .context("session failed")?;
            }
            Step::Stdin(Err(err)) => {
                tracing::debug!(error = %err, "parent stdin closed");
                stdin_alive = false;
            }
            // A zero-sized window only happens when the parent session is
            // already dead; stop forwarding and let the loop wind down.
            Step::Winch(Some(window)) if window.is_zero() => winch_alive = false,
            Step::Winch(Some(window)) => {
                if let Err(err) = channel
                    .window_change(window.width, window.height, 0, 0)
                    .await
                {
                    tracing::debug!(error = %err, "failed to notify window change");
                    winch_alive = false;
                }
            }
            Step::Winch(None) => winch_alive = false,
            Step::Abort => break,
        }
    }

    // A server that never reports an exit status still counts as a clean
    // close.
    match exit_status {
        None | Some(0) => Ok(()),
        Some(code) => anyhow::bail!("session failed: exit status {code}"),
    }
}
