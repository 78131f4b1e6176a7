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

//! The local frontend: drives the listing on the operator's terminal and
//! performs the suspend/handoff/resume dance around brokered sessions.

use anyhow::{Context, Result};
use base64::Engine;
use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::Write;

use super::{view, Action, ListModel, Msg};
use crate::broker::{LocalClient, SshClient};
use crate::config::Endpoint;

enum UiOutcome {
    Quit,
    Connect(Endpoint),
}

/// Runs the local listing until the user quits. Each selection suspends the
/// UI, runs the handoff, and feeds the outcome back into the list.
pub async fn run(endpoints: Vec<Endpoint>) -> Result<()> {
    let mut model = ListModel::local(endpoints);
    let mut client = LocalClient::new();

    loop {
        match run_ui(&mut model).await? {
            UiOutcome::Quit => return Ok(()),
            UiOutcome::Connect(endpoint) => {
                let mut command = client.for_endpoint(&endpoint);
                let outcome = command.run().await;
                model.update(Msg::Err(outcome.err().map(|err| format!("{err:#}"))));
            }
        }
    }
}

/// One stretch of owning the terminal: draw and react until the user quits
/// or picks an endpoint.
async fn run_ui(model: &mut ListModel) -> Result<UiOutcome> {
    crossterm::terminal::enable_raw_mode().context("failed to put terminal in raw mode")?;
    crossterm::execute!(std::io::stdout(), EnterAlternateScreen)
        .context("failed to enter alternate screen")?;

    let result = ui_loop(model).await;

    // Always hand the terminal back in a sane state.
    let _ = crossterm::execute!(std::io::stdout(), LeaveAlternateScreen);
    let _ = crossterm::terminal::disable_raw_mode();

    result
}

async fn ui_loop(model: &mut ListModel) -> Result<UiOutcome> {
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend).context("failed to set up terminal")?;
    terminal.clear().ok();

    let mut events = EventStream::new();

    loop {
        terminal.draw(|frame| view::draw(frame, model))?;

        let Some(event) = events.next().await else {
            return Ok(UiOutcome::Quit);
        };

        let msg = match event.context("failed to read terminal event")? {
            Event::Key(key) if key.kind != KeyEventKind::Release => Msg::Key(key),
            Event::Resize(width, height) => Msg::Resize { width, height },
            _ => continue,
        };

        match model.update(msg) {
            Action::None => {}
            Action::Quit => return Ok(UiOutcome::Quit),
            Action::Connect(endpoint) => return Ok(UiOutcome::Connect(*endpoint)),
            Action::CopyHost(host) => copy_to_clipboard(&host)?,
        }
    }
}

/// Puts `text` on the clipboard through OSC 52, which works on any terminal
/// that supports it, including over SSH.
fn copy_to_clipboard(text: &str) -> Result<()> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    let mut stdout = std::io::stdout();
    write!(stdout, "\x1b]52;c;{encoded}\x07")?;
    stdout.flush()?;
    tracing::debug!(text = %text, "copied to clipboard");
    Ok(())
}
