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

//! Decoding raw terminal bytes into key events.
//!
//! Served mode reads the parent session's byte stream directly, so keystrokes
//! arrive as raw terminal input rather than crossterm events. This decoder
//! covers the keys the listing reacts to: printable characters, control
//! bytes, and the common CSI sequences. An ESC that ends a chunk is treated
//! as a bare Escape; terminals send multi-byte sequences in one write.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Stateful byte-to-key decoder; keeps partial UTF-8 across feeds.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a chunk into key events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KeyEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        let mut i = 0;
        let buf = std::mem::take(&mut self.pending);
        while i < buf.len() {
            match buf[i] {
                0x1b => {
                    let (event, used) = decode_escape(&buf[i..]);
                    events.push(event);
                    i += used;
                }
                b'\r' | b'\n' => {
                    events.push(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
                    i += 1;
                }
                b'\t' => {
                    events.push(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
                    i += 1;
                }
                0x7f | 0x08 => {
                    events.push(KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
                    i += 1;
                }
                // control characters map to ctrl-letter
                c @ 0x01..=0x1a => {
                    let letter = (b'a' + c - 1) as char;
                    events.push(KeyEvent::new(
                        KeyCode::Char(letter),
                        KeyModifiers::CONTROL,
                    ));
                    i += 1;
                }
                _ => match next_utf8_char(&buf[i..]) {
                    Some((ch, used)) => {
                        events.push(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE));
                        i += used;
                    }
                    None => {
                        // partial multi-byte character; wait for the rest
                        self.pending = buf[i..].to_vec();
                        return events;
                    }
                },
            }
        }

        events
    }
}

/// Decodes one escape-initiated sequence, returning the event and how many
/// bytes it consumed.
fn decode_escape(buf: &[u8]) -> (KeyEvent, usize) {
    let plain = |code| KeyEvent::new(code, KeyModifiers::NONE);

    if buf.len() < 2 {
        return (plain(KeyCode::Esc), 1);
    }

    if buf[1] != b'[' {
        // alt-modified key or a stray escape; report Esc and resume after it
        return (plain(KeyCode::Esc), 1);
    }

    if buf.len() < 3 {
        return (plain(KeyCode::Esc), buf.len());
    }

    match buf[2] {
        b'A' => (plain(KeyCode::Up), 3),
        b'B' => (plain(KeyCode::Down), 3),
        b'C' => (plain(KeyCode::Right), 3),
        b'D' => (plain(KeyCode::Left), 3),
        b'H' => (plain(KeyCode::Home), 3),
        b'F' => (plain(KeyCode::End), 3),
        b'Z' => (plain(KeyCode::BackTab), 3),
        b'3' if buf.get(3) == Some(&b'~') => (plain(KeyCode::Delete), 4),
        b'5' if buf.get(3) == Some(&b'~') => (plain(KeyCode::PageUp), 4),
        b'6' if buf.get(3) == Some(&b'~') => (plain(KeyCode::PageDown), 4),
        _ => {
            // unknown CSI: swallow through its final byte (0x40..=0x7e)
            let mut used = 2;
            for (offset, byte) in buf.iter().enumerate().skip(2) {
                used = offset + 1;
                if (0x40..=0x7e).contains(byte) {
                    break;
                }
            }
            (plain(KeyCode::Null), used)
        }
    }
}

fn next_utf8_char(buf: &[u8]) -> Option<(char, usize)> {
    let len = match buf[0] {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Some((char::REPLACEMENT_CHARACTER, 1)),
    };
    if buf.len() < len {
        return None;
    }
    match std::str::from_utf8(&buf[..len]) {
        Ok(s) => s.chars().next().map(|c| (c, len)),
        Err(_) => Some((char::REPLACEMENT_CHARACTER, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(events: &[KeyEvent]) -> Vec<KeyCode> {
        events.iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_printable_chars() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(b"ab1");
        assert_eq!(
            codes(&events),
            [
                KeyCode::Char('a'),
                KeyCode::Char('b'),
                KeyCode::Char('1')
            ]
        );
    }

    #[test]
    fn test_enter_and_ctrl_c() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(&[0x0d, 0x03]);
        assert_eq!(events[0].code, KeyCode::Enter);
        assert_eq!(events[1].code, KeyCode::Char('c'));
        assert!(events[1].modifiers.contains(KeyModifiers::CONTROL));
    }

    #[test]
    fn test_arrow_keys() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(b"\x1b[A\x1b[B");
        assert_eq!(codes(&events), [KeyCode::Up, KeyCode::Down]);
    }

    #[test]
    fn test_bare_escape_at_chunk_end() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(&[0x1b]);
        assert_eq!(codes(&events), [KeyCode::Esc]);
    }

    #[test]
    fn test_utf8_split_across_feeds() {
        let mut decoder = KeyDecoder::new();
        let bytes = "é".as_bytes();
        assert!(decoder.feed(&bytes[..1]).is_empty());
        let events = decoder.feed(&bytes[1..]);
        assert_eq!(codes(&events), [KeyCode::Char('é')]);
    }

    #[test]
    fn test_unknown_csi_swallowed() {
        let mut decoder = KeyDecoder::new();
        // cursor position report, should not leak bytes as chars
        let events = decoder.feed(b"\x1b[12;34Rx");
        assert_eq!(*codes(&events).last().unwrap(), KeyCode::Char('x'));
        assert!(!codes(&events).contains(&KeyCode::Char('1')));
    }

    #[test]
    fn test_backspace_variants() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(&[0x7f, 0x08]);
        assert_eq!(codes(&events), [KeyCode::Backspace, KeyCode::Backspace]);
    }
}
