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

//! The served session context handed to the middleware chain.

use anyhow::Result;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::broker::{RemoteClient, ServedParent, SshClient};
use crate::config::Endpoint;
use crate::multiplex::TapReader;
use crate::pty::Window;

/// One inbound session on a served endpoint, as the middleware chain sees it.
///
/// The two taps come from the input multiplexer: `list_input` feeds the
/// directory UI, `handoff_input` becomes the child session's stdin after a
/// selection (reset at the handoff boundary so list keystrokes never replay
/// into the child).
pub struct ServedSession {
    pub handle: Handle,
    pub channel_id: ChannelId,
    pub user: String,
    pub remote_addr: Option<SocketAddr>,
    /// The exec command, whitespace-split. Empty for shell sessions.
    pub command: Vec<String>,
    /// Environment accepted from `env` requests, as `KEY=VALUE`.
    pub env: Vec<String>,
    pub term: String,
    pub window: Window,
    pub winch: Arc<Mutex<mpsc::Receiver<Window>>>,
    pub list_input: TapReader,
    pub handoff_input: TapReader,
    /// Fires when the parent connection or the supervisor goes away.
    pub done: CancellationToken,
    pub trust_dir: PathBuf,
    /// The live endpoint set, replaced wholesale by the update relay.
    pub endpoints: Arc<RwLock<Vec<Endpoint>>>,
    /// Fan-out for endpoint refreshes; listeners subscribe per session.
    pub updates: broadcast::Sender<Vec<Endpoint>>,
    exited: bool,
}

impl ServedSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: Handle,
        channel_id: ChannelId,
        user: String,
        remote_addr: Option<SocketAddr>,
        command: Vec<String>,
        env: Vec<String>,
        term: String,
        window: Window,
        winch: mpsc::Receiver<Window>,
        list_input: TapReader,
        handoff_input: TapReader,
        done: CancellationToken,
        trust_dir: PathBuf,
        endpoints: Arc<RwLock<Vec<Endpoint>>>,
        updates: broadcast::Sender<Vec<Endpoint>>,
    ) -> Self {
        Self {
            handle,
            channel_id,
            user,
            remote_addr,
            command,
            env,
            term,
            window,
            winch: Arc::new(Mutex::new(winch)),
            list_input,
            handoff_input,
            done,
            trust_dir,
            endpoints,
            updates,
            exited: false,
        }
    }

    /// Writes to the parent's stdout.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.handle
            .data(self.channel_id, CryptoVec::from_slice(data))
            .await
            .map_err(|_| anyhow::anyhow!("parent channel closed"))
    }

    /// Writes to the parent's stderr.
    pub async fn write_err(&self, data: &[u8]) -> Result<()> {
        self.handle
            .extended_data(self.channel_id, 1, CryptoVec::from_slice(data))
            .await
            .map_err(|_| anyhow::anyhow!("parent channel closed"))
    }

    /// Sends the exit status and closes the channel. Idempotent.
    pub async fn exit(&mut self, code: u32) {
        if self.exited {
            return;
        }
        self.exited = true;
        let _ = self.handle.exit_status_request(self.channel_id, code).await;
        let _ = self.handle.eof(self.channel_id).await;
        let _ = self.handle.close(self.channel_id).await;
    }

    /// The parent view the broker reuses during a handoff.
    fn served_parent(&self) -> ServedParent {
        ServedParent {
            handle: self.handle.clone(),
            channel_id: self.channel_id,
            user: self.user.clone(),
            remote_addr: self.remote_addr,
            env: self.env.clone(),
            term: self.term.clone(),
            window: self.window,
            winch: Arc::clone(&self.winch),
            done: self.done.clone(),
            trust_dir: self.trust_dir.clone(),
        }
    }

    /// Brokers this session into `endpoint`, reusing the parent terminal.
    ///
    /// The handoff stdin is reset first: the child must see only keystrokes
    /// typed after the selection.
    pub async fn run_handoff(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.handoff_input.reset();

        let parent = Arc::new(self.served_parent());
        let mut client = RemoteClient::new(parent);
        let mut command = client.for_endpoint(endpoint);
        command.set_stdin(Box::new(self.handoff_input.clone()));
        command.run().await
    }
}
