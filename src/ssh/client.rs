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

//! Outbound SSH dialing: direct connections, ProxyJump chaining and the
//! authentication loop.

use anyhow::{Context, Result};
use russh::client::{Handle, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use std::sync::Arc;
use std::time::Duration;

use super::auth::{AgentBridge, AuthMethod};
use super::known_hosts::KnownHosts;
use crate::closers::Closers;
use crate::config::{first_non_empty, Endpoint};
use crate::jump;

/// Client-side protocol handler: delegates host key checks to the
/// known-hosts policy for the address actually being dialed, and bridges
/// agent channels the far server opens back to the parent's agent.
pub struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: KnownHosts,
    agent_bridge: Option<Arc<dyn AgentBridge>>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        known_hosts: KnownHosts,
        agent_bridge: Option<Arc<dyn AgentBridge>>,
    ) -> Self {
        Self {
            host,
            port,
            known_hosts,
            agent_bridge,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool> {
        self.known_hosts
            .verify(&self.host, self.port, server_public_key)?;
        Ok(true)
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: russh::Channel<russh::client::Msg>,
        _session: &mut russh::client::Session,
    ) -> Result<()> {
        let Some(bridge) = self.agent_bridge.clone() else {
            anyhow::bail!("agent channel opened but forwarding is not enabled");
        };
        tokio::spawn(async move {
            let mut upstream = match bridge.open().await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to reach the parent agent");
                    return;
                }
            };
            let mut downstream = channel.into_stream();
            if let Err(err) =
                tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await
            {
                tracing::debug!(error = %err, "agent bridge closed");
            }
        });
        Ok(())
    }
}

/// Everything needed to dial and authenticate an endpoint. Owned, so the
/// whole dial can run in a spawned task and be abandoned on abort.
pub struct DialConfig {
    pub endpoint: Endpoint,
    /// Already-resolved username for the connection.
    pub user: String,
    pub methods: Vec<AuthMethod>,
    pub known_hosts: KnownHosts,
    /// Whether keyboard-interactive prompts may reach a human.
    pub interactive: bool,
    /// Set when the brokered session should answer agent channels.
    pub agent_bridge: Option<Arc<dyn AgentBridge>>,
}

/// An authenticated connection plus the close actions it accumulated.
pub struct Connection {
    pub handle: Handle<ClientHandler>,
    pub closers: Closers,
}

/// Dials the endpoint, chaining through its ProxyJump when one is set, and
/// authenticates with the resolved methods.
pub async fn dial(cfg: DialConfig) -> Result<Connection> {
    let mut closers = Closers::new();
    let endpoint = &cfg.endpoint;

    let host = endpoint.host();
    let port: u16 = endpoint
        .port()
        .parse()
        .with_context(|| format!("invalid port in address {:?}", endpoint.address))?;
    let timeout = endpoint.timeout();
    let preferred = endpoint.authentications();

    let russh_config = Arc::new(russh::client::Config::default());

    let mut handle = if endpoint.proxy_jump.is_empty() {
        let handler = ClientHandler::new(
            host.clone(),
            port,
            cfg.known_hosts.clone(),
            cfg.agent_bridge.clone(),
        );
        maybe_timeout(
            timeout,
            russh::client::connect(russh_config, (host.as_str(), port), handler),
        )
        .await
        .with_context(|| format!("failed to dial {host}:{port}"))?
    } else {
        let jump = jump::parse_jump(&endpoint.proxy_jump)
            .with_context(|| format!("invalid ProxyJump: {:?}", endpoint.proxy_jump))?;
        let jump_user = first_non_empty([jump.user.as_str(), cfg.user.as_str()]);

        tracing::info!(addr = %jump.address(), "connecting client to ProxyJump");
        let jump_handler = ClientHandler::new(
            jump.host.clone(),
            jump.port,
            cfg.known_hosts.clone(),
            None,
        );
        let mut jump_handle = maybe_timeout(
            timeout,
            russh::client::connect(
                Arc::clone(&russh_config),
                (jump.host.as_str(), jump.port),
                jump_handler,
            ),
        )
        .await
        .with_context(|| format!("connection to ProxyJump ({}) failed", jump.address()))?;

        authenticate(
            &mut jump_handle,
            &jump_user,
            &cfg.methods,
            cfg.interactive,
            &preferred,
        )
        .await
        .with_context(|| format!("authentication to ProxyJump ({}) failed", jump.address()))?;

        {
            let jump_handle = jump_handle.clone();
            closers.defer("jump-client", move || async move {
                jump_handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
                    .map_err(Into::into)
            });
        }

        tracing::info!(addr = %endpoint.dial_address(), "connecting to target using jump client");
        let channel = jump_handle
            .channel_open_direct_tcpip(host.clone(), u32::from(port), "127.0.0.1", 22)
            .await
            .with_context(|| {
                format!(
                    "connection from ProxyJump ({}) to host ({}) failed",
                    jump.address(),
                    endpoint.dial_address()
                )
            })?;

        let handler = ClientHandler::new(
            host.clone(),
            port,
            cfg.known_hosts.clone(),
            cfg.agent_bridge.clone(),
        );
        maybe_timeout(
            timeout,
            russh::client::connect_stream(russh_config, channel.into_stream(), handler),
        )
        .await
        .with_context(|| {
            format!(
                "client connection from ProxyJump ({}) to host ({}) failed",
                jump.address(),
                endpoint.dial_address()
            )
        })?
    };

    authenticate(
        &mut handle,
        &cfg.user,
        &cfg.methods,
        cfg.interactive,
        &preferred,
    )
    .await?;

    {
        let handle = handle.clone();
        closers.defer("client", move || async move {
            handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(Into::into)
        });
    }

    Ok(Connection { handle, closers })
}

async fn maybe_timeout<T, E>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .context("connection timed out")?
            .map_err(Into::into),
        None => fut.await.map_err(Into::into),
    }
}

/// Tries the resolved methods in the endpoint's preferred order until one
/// succeeds.
pub async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    methods: &[AuthMethod],
    interactive: bool,
    preferred: &[String],
) -> Result<()> {
    for auth_kind in preferred {
        match auth_kind.as_str() {
            "publickey" => {
                if try_publickey(handle, user, methods).await? {
                    return Ok(());
                }
            }
            "keyboard-interactive" => {
                if interactive && try_keyboard_interactive(handle, user).await? {
                    return Ok(());
                }
            }
            other => {
                tracing::debug!(method = %other, "skipping unsupported auth method");
            }
        }
    }
    anyhow::bail!("all authentication methods failed for user {user:?}")
}

async fn try_publickey(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    methods: &[AuthMethod],
) -> Result<bool> {
    for method in methods {
        match method {
            AuthMethod::Keys(keys) => {
                for key in keys {
                    let hash = handle.best_supported_rsa_hash().await?.flatten();
                    let result = handle
                        .authenticate_publickey(
                            user,
                            PrivateKeyWithHashAlg::new(Arc::clone(key), hash),
                        )
                        .await?;
                    if result.success() {
                        return Ok(true);
                    }
                }
            }
            AuthMethod::Agent(agent) => {
                let mut client = agent.client.lock().await;
                for identity in &agent.identities {
                    let hash = handle.best_supported_rsa_hash().await?.flatten();
                    match handle
                        .authenticate_publickey_with(user, identity.clone(), hash, &mut *client)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        Ok(_) => {}
                        Err(err) => {
                            tracing::debug!(error = %err, "agent identity rejected");
                        }
                    }
                }
            }
        }
    }
    Ok(false)
}

/// Walks the keyboard-interactive exchange, prompting on the controlling
/// terminal. Only reachable in local mode.
async fn try_keyboard_interactive(
    handle: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await?;

    loop {
        let prompts = match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => prompts,
        };

        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let answer = if prompt.echo {
                let mut line = String::new();
                eprint!("{}", prompt.prompt);
                std::io::stdin()
                    .read_line(&mut line)
                    .context("failed to read response")?;
                line.trim_end_matches(['\r', '\n']).to_string()
            } else {
                rpassword::prompt_password(prompt.prompt.clone())
                    .context("failed to read response")?
            };
            answers.push(answer);
        }

        response = handle
            .authenticate_keyboard_interactive_respond(answers)
            .await?;
    }
}
