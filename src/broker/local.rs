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

//! Local-mode brokering: the parent is the operator's own terminal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{connect, BrokerParams, SessionCommand, SessionOutput, SshClient, WriterOutput};
use crate::blocking::{BlockingReader, SessionInput};
use crate::config::{current_username, first_non_empty, Endpoint};
use crate::pty::{self, RawModeGuard};
use crate::ssh::{local_auth, KnownHosts};

/// Builds local handoff sessions.
#[derive(Debug, Default)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        Self
    }
}

impl SshClient for LocalClient {
    fn for_endpoint(&mut self, endpoint: &Endpoint) -> Box<dyn SessionCommand> {
        Box::new(LocalSession {
            endpoint: endpoint.clone(),
            stdin: None,
            stdout: None,
            stderr: None,
        })
    }
}

/// A pending local connection to one endpoint.
pub struct LocalSession {
    endpoint: Endpoint,
    stdin: Option<Box<dyn SessionInput>>,
    stdout: Option<Box<dyn SessionOutput>>,
    stderr: Option<Box<dyn SessionOutput>>,
}

impl LocalSession {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }
}

#[async_trait]
impl SessionCommand for LocalSession {
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

        let mut stdout = self
            .stdout
            .take()
            .unwrap_or_else(|| Box::new(WriterOutput(tokio::io::stdout())));
        let mut stderr = self
            .stderr
            .take()
            .unwrap_or_else(|| Box::new(WriterOutput(tokio::io::stderr())));
        let stdin = self
            .stdin
            .take()
            .unwrap_or_else(|| Box::new(BlockingReader::new(tokio::io::stdin())));

        stdout.write(pty::RESET_SEQUENCE.as_bytes()).await?;

        let wants_tty = endpoint.request_tty || endpoint.remote_command.is_empty();
        if wants_tty && !atty::is(atty::Stream::Stdout) {
            anyhow::bail!("requested a TTY, but current session is not a TTY, aborting");
        }

        // Everything spawned below stops when this run returns.
        let done = CancellationToken::new();
        let _done_guard = done.clone().drop_guard();

        // SIGINT aborts the dial even while TCP is stalled.
        let abort = CancellationToken::new();
        {
            let abort = abort.clone();
            let done = done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = done.cancelled() => {}
                    signal = tokio::signal::ctrl_c() => {
                        if signal.is_ok() {
                            abort.cancel();
                        }
                    }
                }
            });
        }

        let resolved = local_auth(&endpoint)
            .await
            .context("failed to set up an authentication method")?;

        let params = BrokerParams {
            user: first_non_empty([endpoint.user.as_str(), &current_username()]),
            endpoint,
            parent_env: std::env::vars().map(|(k, v)| format!("{k}={v}")).collect(),
            term: std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
            window: pty::get_terminal_size(),
            resolved,
            known_hosts: KnownHosts::user_default()?,
            interactive: true,
            abort,
        };

        // Dial first: auth may prompt and needs the terminal in cooked mode.
        let brokered = connect(params).await?;

        let (winch_tx, winch_rx) = mpsc::channel(16);
        let mut raw_guard = None;
        if wants_tty {
            raw_guard = Some(RawModeGuard::new()?);

            let done = done.clone();
            tokio::spawn(async move {
                let mut signals = match pty::winch_stream() {
                    Ok(signals) => signals,
                    Err(err) => {
                        tracing::warn!(error = %err, "window change notifications disabled");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = done.cancelled() => return,
                        _ = signals.recv() => {
                            if winch_tx.send(pty::get_terminal_size()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }

        let result = brokered
            .run(stdin, stdout.as_mut(), stderr.as_mut(), winch_rx)
            .await;

        if let Some(mut guard) = raw_guard {
            guard.restore();
        }
        stdout.write(pty::RESET_SEQUENCE.as_bytes()).await.ok();

        result
    }
}
