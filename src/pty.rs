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

//! Terminal plumbing shared by the listing UI and the session broker: PTY
//! reset sequences, raw-mode guard, size queries and resize signals.

use anyhow::{Context, Result};
use terminal_size::{terminal_size, Height, Width};

/// A terminal window size, in character cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub width: u32,
    pub height: u32,
}

impl Window {
    /// A `{0,0}` event means the parent session is already gone.
    pub fn is_zero(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// The escape sequence bringing a terminal back to a sane state before and
/// after a handoff: leave the alternate screen, reset SGR attributes, clear
/// the display.
pub const RESET_SEQUENCE: &str = "\x1b[?1049l\x1b[0m\x1b[2J";

/// Writes the reset sequence, ignoring write failures (the terminal may
/// already be gone).
pub fn reset_pty(w: &mut impl std::io::Write) {
    let _ = w.write_all(RESET_SEQUENCE.as_bytes());
    let _ = w.flush();
}

/// Current terminal size, with the classic 80x24 fallback.
pub fn get_terminal_size() -> Window {
    if let Some((Width(w), Height(h))) = terminal_size() {
        Window {
            width: u32::from(w),
            height: u32::from(h),
        }
    } else {
        Window {
            width: 80,
            height: 24,
        }
    }
}

/// Puts the local terminal into raw mode, restoring it on drop.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("failed to put terminal in raw mode")?;
        tracing::debug!("put terminal in raw mode");
        Ok(Self { active: true })
    }

    /// Restores the terminal early, before the guard drops.
    pub fn restore(&mut self) {
        if self.active {
            if let Err(err) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!(error = %err, "couldn't restore terminal state");
            }
            self.active = false;
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// A stream of SIGWINCH notifications for the local terminal.
#[cfg(unix)]
pub fn winch_stream() -> Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        .context("failed to register SIGWINCH handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_sequence_components() {
        assert!(RESET_SEQUENCE.contains("\x1b[?1049l"));
        assert!(RESET_SEQUENCE.contains("\x1b[0m"));
        assert!(RESET_SEQUENCE.contains("\x1b[2J"));
    }

    #[test]
    fn test_reset_pty_writes_sequence() {
        let mut out = Vec::new();
        reset_pty(&mut out);
        assert_eq!(out, RESET_SEQUENCE.as_bytes());
    }

    #[test]
    fn test_window_is_zero() {
        assert!(Window::default().is_zero());
        assert!(!Window {
            width: 80,
            height: 24
        }
        .is_zero());
    }

    #[test]
    fn test_terminal_size_has_fallback() {
        let size = get_terminal_size();
        assert!(size.width > 0);
        assert!(size.height > 0);
    }
}
