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

//! Cross-module scenarios around the brokering pipeline: environment
//! computation, list-driven selection and the input fan-out at the handoff
//! boundary.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use wishlist::config::Endpoint;
use wishlist::listing::{Action, ListModel, Msg};
use wishlist::multiplex::multiplex;

fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint {
            name: "foo".to_string(),
            address: "foo.example:22".to_string(),
            ..Default::default()
        },
        Endpoint {
            name: "bar".to_string(),
            address: "bar:2222".to_string(),
            ..Default::default()
        },
    ]
}

fn key(code: KeyCode) -> Msg {
    Msg::Key(KeyEvent::new(code, KeyModifiers::NONE))
}

#[test]
fn local_listing_arrow_down_enter_selects_bar() {
    let mut model = ListModel::local(endpoints());

    assert_eq!(model.update(key(KeyCode::Down)), Action::None);
    match model.update(key(KeyCode::Enter)) {
        Action::Connect(endpoint) => {
            assert_eq!(endpoint.name, "bar");
            assert_eq!(endpoint.address, "bar:2222");
        }
        other => panic!("expected a connect decision, got {other:?}"),
    }
}

#[test]
fn environment_follows_send_env_and_set_env_precedence() {
    let endpoint = Endpoint {
        send_env: vec!["FOO_*".to_string()],
        set_env: vec!["FOO=foo".to_string(), "BAR=bar".to_string()],
        ..Default::default()
    };

    let env = endpoint.environment([
        "LC_ALL=en_US.UTF-8",
        "LANG=en_US",
        "FOO_BAR=foobar",
        "NOPE=x",
    ]);

    let mut pairs: Vec<(String, String)> = env.into_iter().collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("BAR".to_string(), "bar".to_string()),
            ("FOO".to_string(), "foo".to_string()),
            ("FOO_BAR".to_string(), "foobar".to_string()),
            ("LANG".to_string(), "en_US".to_string()),
            ("LC_ALL".to_string(), "en_US.UTF-8".to_string()),
        ]
    );
}

#[tokio::test]
async fn handoff_stdin_sees_only_bytes_after_reset() {
    let (mut source, reader) = tokio::io::duplex(256);
    let stop = CancellationToken::new();
    let (list_input, handoff_input) = multiplex(reader, stop.clone());

    // keystrokes consumed by the list phase
    source.write_all(b"jj\r").await.unwrap();
    let mut buf = [0u8; 8];
    let mut seen = 0;
    while seen < 3 {
        seen += list_input.read(&mut buf).await;
    }

    // the handoff boundary: the child must not replay list keystrokes
    handoff_input.reset();
    source.write_all(b"ls\n").await.unwrap();

    let mut child_stdin = Vec::new();
    while child_stdin.len() < 3 {
        let n = handoff_input.read(&mut buf).await;
        child_stdin.extend_from_slice(&buf[..n]);
    }
    assert_eq!(child_stdin, b"ls\n");

    stop.cancel();
}

#[test]
fn listing_error_pane_roundtrip() {
    let mut model = ListModel::local(endpoints());

    match model.update(key(KeyCode::Enter)) {
        Action::Connect(_) => {}
        other => panic!("expected connect, got {other:?}"),
    }

    // the broker failed; the pane shows until a keystroke
    model.update(Msg::Err(Some(
        "connection failed: dial tcp: connection refused".to_string(),
    )));
    assert!(model.error().is_some());
    model.update(key(KeyCode::Char(' ')));
    assert!(model.error().is_none());

    // a clean close returns straight to the list
    model.update(Msg::Err(None));
    assert!(model.error().is_none());
}
