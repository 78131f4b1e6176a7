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

//! The served listing: renders the directory into the parent SSH channel and
//! drives it from the parent's raw byte stream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::{Terminal, TerminalOptions, Viewport};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use super::middleware::{Flow, Middleware};
use super::session::ServedSession;
use crate::listing::keys::KeyDecoder;
use crate::listing::{view, Action, ListModel, Msg};
use crate::pty::Window;

const ENTER_ALT_SCREEN: &[u8] = b"\x1b[?1049h\x1b[2J\x1b[H";
const LEAVE_ALT_SCREEN: &[u8] = b"\x1b[?1049l";

/// Collects rendered frames so they can be flushed into the channel.
#[derive(Clone, Default)]
struct RenderBuf(Arc<Mutex<Vec<u8>>>);

impl RenderBuf {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().expect("render buf poisoned"))
    }
}

impl std::io::Write for RenderBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("render buf poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn make_terminal(
    buf: &RenderBuf,
    window: Window,
) -> Result<Terminal<CrosstermBackend<RenderBuf>>> {
    let area = Rect::new(
        0,
        0,
        window.width.min(u32::from(u16::MAX)) as u16,
        window.height.min(u32::from(u16::MAX)) as u16,
    );
    Terminal::with_options(
        CrosstermBackend::new(buf.clone()),
        TerminalOptions {
            viewport: Viewport::Fixed(area),
        },
    )
    .context("failed to set up terminal")
}

pub struct ListingMiddleware;

#[async_trait]
impl Middleware for ListingMiddleware {
    fn name(&self) -> &'static str {
        "listing"
    }

    async fn before(&self, session: &mut ServedSession) -> Result<Flow> {
        let endpoints = session.endpoints.read().await.clone();
        let mut model = ListModel::remote(endpoints);
        model.update(Msg::Resize {
            width: session.window.width as u16,
            height: session.window.height as u16,
        });

        let mut updates = session.updates.subscribe();
        let mut decoder = KeyDecoder::new();
        let buf = RenderBuf::default();
        let mut terminal = make_terminal(&buf, session.window)?;

        session.write(ENTER_ALT_SCREEN).await?;

        loop {
            terminal.draw(|frame| view::draw(frame, &model))?;
            let frame = buf.take();
            if !frame.is_empty() {
                session.write(&frame).await?;
            }

            let mut input = [0u8; 256];
            let msgs: Vec<Msg> = tokio::select! {
                _ = session.done.cancelled() => break,
                n = session.list_input.read(&mut input) => decoder
                    .feed(&input[..n])
                    .into_iter()
                    .map(Msg::Key)
                    .collect(),
                window = recv_winch(&session.winch) => match window {
                    Some(window) => {
                        session.window = window;
                        terminal = make_terminal(&buf, window)?;
                        vec![Msg::Resize {
                            width: window.width as u16,
                            height: window.height as u16,
                        }]
                    }
                    None => break,
                },
                refreshed = updates.recv() => match refreshed {
                    Ok(endpoints) => vec![Msg::SetEndpoints(endpoints)],
                    // A lagging listener just misses intermediate updates.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => continue,
                },
            };

            for msg in msgs {
                match model.update(msg) {
                    Action::None => {}
                    Action::CopyHost(_) => {}
                    Action::Quit => {
                        session.write(LEAVE_ALT_SCREEN).await.ok();
                        session.exit(0).await;
                        return Ok(Flow::Stop);
                    }
                    Action::Connect(endpoint) => {
                        session.write(LEAVE_ALT_SCREEN).await.ok();

                        let outcome = session.run_handoff(&endpoint).await;
                        model.update(Msg::Err(
                            outcome.err().map(|err| format!("{err:#}")),
                        ));

                        session.write(ENTER_ALT_SCREEN).await?;
                        terminal = make_terminal(&buf, session.window)?;
                        break;
                    }
                }
            }
        }

        session.write(LEAVE_ALT_SCREEN).await.ok();
        session.exit(0).await;
        Ok(Flow::Stop)
    }
}

async fn recv_winch(
    winch: &Arc<tokio::sync::Mutex<mpsc::Receiver<Window>>>,
) -> Option<Window> {
    winch.lock().await.recv().await
}
