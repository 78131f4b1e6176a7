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

//! Per-connection SSH protocol handling for served endpoints.

use anyhow::Result;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet, Pty};
use russh::keys::PublicKey;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::middleware::run_chain;
use super::session::ServedSession;
use super::Shared;
use crate::multiplex::{Fanout, TapReader};
use crate::pty::Window;

/// Checks a presented key against the configured users.
///
/// Authorized iff some user carries the session's username and one of that
/// user's keys matches. An empty user list means open access and is handled
/// before this gate.
pub fn authorized(users: &[crate::config::User], username: &str, key: &PublicKey) -> bool {
    users.iter().any(|user| {
        user.name == username
            && user
                .public_keys
                .iter()
                .filter_map(|raw| match PublicKey::from_openssh(raw) {
                    Ok(parsed) => Some(parsed),
                    Err(err) => {
                        tracing::warn!(user = %user.name, error = %err, "invalid public key in config");
                        None
                    }
                })
                .any(|parsed| parsed.key_data() == key.key_data())
    })
}

/// Handles one inbound connection on a served endpoint.
pub struct WishHandler {
    shared: Arc<Shared>,
    peer_addr: Option<SocketAddr>,
    username: Option<String>,
    // held so the session channel stays open for the handler's lifetime
    _channel: Option<Channel<Msg>>,
    channel_id: Option<ChannelId>,
    env: Vec<String>,
    term: String,
    window: Window,
    winch_tx: mpsc::Sender<Window>,
    winch_rx: Option<mpsc::Receiver<Window>>,
    fanout: Fanout,
    list_input: TapReader,
    handoff_input: TapReader,
    done: CancellationToken,
    started: bool,
}

impl WishHandler {
    pub fn new(shared: Arc<Shared>, peer_addr: Option<SocketAddr>) -> Self {
        // A slow session drops resize events rather than blocking the
        // protocol loop.
        let (winch_tx, winch_rx) = mpsc::channel(16);
        let (fanout, list_input, handoff_input) = Fanout::new();
        let done = shared.shutdown.child_token();
        Self {
            shared,
            peer_addr,
            username: None,
            _channel: None,
            channel_id: None,
            env: Vec::new(),
            term: "xterm-256color".to_string(),
            window: Window {
                width: 80,
                height: 24,
            },
            winch_tx,
            winch_rx: Some(winch_rx),
            fanout,
            list_input,
            handoff_input,
            done,
            started: false,
        }
    }

    fn open_access(&self) -> bool {
        self.shared.users.is_empty()
    }

    fn spawn_session(&mut self, session: &mut Session, command: Vec<String>) {
        if self.started {
            return;
        }
        let Some(channel_id) = self.channel_id else {
            return;
        };
        let Some(winch_rx) = self.winch_rx.take() else {
            return;
        };
        self.started = true;

        let served = ServedSession::new(
            session.handle(),
            channel_id,
            self.username.clone().unwrap_or_default(),
            self.peer_addr,
            command,
            self.env.clone(),
            self.term.clone(),
            self.window,
            winch_rx,
            self.list_input.clone(),
            self.handoff_input.clone(),
            self.done.clone(),
            self.shared.trust_dir.clone(),
            Arc::clone(&self.shared.endpoints),
            self.shared.updates.clone(),
        );

        let chain = self.shared.endpoint.middlewares.0.clone();
        tokio::spawn(async move {
            let mut served = served;
            if let Err(err) = run_chain(&chain, &mut served).await {
                tracing::error!(error = %err, "session chain failed");
                let _ = served
                    .write_err(format!("wishlist: {err:#}\n\r").as_bytes())
                    .await;
            }
            served.exit(0).await;
        });
    }
}

impl russh::server::Handler for WishHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth> {
        self.username = Some(user.to_string());
        if self.open_access() {
            tracing::info!(user = %user, peer = ?self.peer_addr, "open access session");
            return Ok(Auth::Accept);
        }
        let mut methods = MethodSet::empty();
        methods.push(MethodKind::PublicKey);
        Ok(Auth::Reject {
            proceed_with_methods: Some(methods),
            partial_success: false,
        })
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        self.username = Some(user.to_string());
        if self.open_access() || authorized(&self.shared.users, user, public_key) {
            tracing::info!(
                user = %user,
                peer = ?self.peer_addr,
                "public key authentication successful"
            );
            return Ok(Auth::Accept);
        }
        tracing::info!(user = %user, peer = ?self.peer_addr, "public key rejected");
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        if self.channel_id.is_some() {
            return Ok(false);
        }
        self.channel_id = Some(channel.id());
        self._channel = Some(channel);
        Ok(true)
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        name: &str,
        value: &str,
        _session: &mut Session,
    ) -> Result<()> {
        if !name.is_empty() {
            self.env.push(format!("{name}={value}"));
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        tracing::debug!(term = %term, cols = %col_width, rows = %row_height, "PTY request");
        self.term = term.to_string();
        self.window = Window {
            width: col_width,
            height: row_height,
        };
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<()> {
        let window = Window {
            width: col_width,
            height: row_height,
        };
        self.window = window;
        // drop instead of blocking the protocol loop
        let _ = self.winch_tx.try_send(window);
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<()> {
        self.fanout.write(data);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<()> {
        let _ = session.channel_success(channel);
        self.spawn_session(session, Vec::new());
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        let command = match std::str::from_utf8(data) {
            Ok(command) => command
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(error = %err, "invalid UTF-8 in exec command");
                let _ = session.channel_failure(channel);
                return Ok(());
            }
        };
        let _ = session.channel_success(channel);
        self.spawn_session(session, command);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<()> {
        self.done.cancel();
        Ok(())
    }
}

impl Drop for WishHandler {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::User;
    use russh::keys::{Algorithm, PrivateKey};

    fn keypair() -> (PublicKey, String) {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let public = key.public_key().clone();
        let openssh = public.to_openssh().unwrap();
        (public, openssh)
    }

    #[test]
    fn test_authorized_matches_user_and_key() {
        let (public, openssh) = keypair();
        let users = vec![User {
            name: "carlos".to_string(),
            public_keys: vec![openssh],
        }];

        assert!(authorized(&users, "carlos", &public));
        assert!(!authorized(&users, "someone-else", &public));

        let (other, _) = keypair();
        assert!(!authorized(&users, "carlos", &other));
    }

    #[test]
    fn test_authorized_ignores_unparseable_keys() {
        let (public, openssh) = keypair();
        let users = vec![User {
            name: "carlos".to_string(),
            public_keys: vec!["not a key".to_string(), openssh],
        }];
        assert!(authorized(&users, "carlos", &public));
    }

    #[test]
    fn test_authorized_empty_users_denies() {
        let (public, _) = keypair();
        assert!(!authorized(&[], "carlos", &public));
    }
}
