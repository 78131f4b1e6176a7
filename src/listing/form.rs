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

//! The ad-hoc endpoint form (local mode): create or edit an endpoint, then
//! connect to it.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::config::{current_username, first_non_empty, join_host_port, Endpoint};

/// What the form wants its host to do after a key.
#[derive(Debug, PartialEq)]
pub enum FormOutcome {
    /// Keep editing.
    Editing,
    /// User aborted; drop the form.
    Cancelled,
    /// User submitted; connect to this endpoint.
    Submit(Box<Endpoint>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Toggle,
    /// One entry per comma.
    List,
}

#[derive(Debug, Clone)]
struct Field {
    label: &'static str,
    kind: FieldKind,
    value: String,
    on: bool,
    advanced: bool,
}

impl Field {
    fn text(label: &'static str, value: String, advanced: bool) -> Self {
        Self {
            label,
            kind: FieldKind::Text,
            value,
            on: false,
            advanced,
        }
    }

    fn list(label: &'static str, values: &[String], advanced: bool) -> Self {
        Self {
            label,
            kind: FieldKind::List,
            value: values.join(","),
            on: false,
            advanced,
        }
    }

    fn toggle(label: &'static str, on: bool) -> Self {
        Self {
            label,
            kind: FieldKind::Toggle,
            value: String::new(),
            on,
            advanced: true,
        }
    }

    fn list_values(&self) -> Vec<String> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

const HOST: usize = 0;
const USER: usize = 1;
const PORT: usize = 2;
const REMOTE_COMMAND: usize = 3;
const TIMEOUT: usize = 4;
const PROXY_JUMP: usize = 5;
const SEND_ENV: usize = 6;
const SET_ENV: usize = 7;
const AUTHS: usize = 8;
const IDENTITY_FILES: usize = 9;
const FORWARD_AGENT: usize = 10;
const REQUEST_TTY: usize = 11;

/// The form model: a fixed field list with one focused field. `tab`/arrows
/// move, `space` flips toggles, `enter` submits, `esc` cancels. Advanced
/// fields unfold with `ctrl-a`.
#[derive(Debug, Clone)]
pub struct FormModel {
    fields: Vec<Field>,
    focus: usize,
    advanced: bool,
    error: Option<String>,
}

impl FormModel {
    /// Prefills from an endpoint; an empty endpoint makes a blank form.
    pub fn new(endpoint: &Endpoint) -> Self {
        let host = match endpoint.host().as_str() {
            "" => "localhost".to_string(),
            host => host.to_string(),
        };
        let timeout = if endpoint.connect_timeout == 0 {
            30
        } else {
            endpoint.connect_timeout
        };

        let fields = vec![
            Field::text("Hostname", host, false),
            Field::text(
                "User",
                first_non_empty([endpoint.user.as_str(), &current_username()]),
                false,
            ),
            Field::text("Port", endpoint.port(), true),
            Field::text("RemoteCommand", endpoint.remote_command.clone(), true),
            Field::text("Timeout (seconds)", timeout.to_string(), true),
            Field::text("ProxyJump", endpoint.proxy_jump.clone(), true),
            Field::list("SendEnv", &endpoint.send_env, true),
            Field::list("SetEnv", &endpoint.set_env, true),
            Field::list(
                "PreferredAuthentications",
                &endpoint.preferred_authentications,
                true,
            ),
            Field::list("IdentityFiles", &endpoint.identity_files, true),
            Field::toggle("ForwardAgent", endpoint.forward_agent),
            Field::toggle("RequestTTY", endpoint.request_tty),
        ];

        Self {
            fields,
            focus: 0,
            advanced: false,
            error: None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Visible rows for rendering: label, value, toggle state, focused.
    pub fn rows(&self) -> Vec<(&'static str, String, bool)> {
        self.visible_indexes()
            .into_iter()
            .map(|i| {
                let field = &self.fields[i];
                let value = match field.kind {
                    FieldKind::Toggle => {
                        if field.on {
                            "yes".to_string()
                        } else {
                            "no".to_string()
                        }
                    }
                    _ => field.value.clone(),
                };
                (field.label, value, i == self.focus)
            })
            .collect()
    }

    pub fn advanced(&self) -> bool {
        self.advanced
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> FormOutcome {
        self.error = None;
        match key.code {
            KeyCode::Esc => return FormOutcome::Cancelled,
            KeyCode::Enter => {
                return match self.to_endpoint() {
                    Ok(endpoint) => FormOutcome::Submit(Box::new(endpoint)),
                    Err(message) => {
                        self.error = Some(message);
                        FormOutcome::Editing
                    }
                };
            }
            KeyCode::Tab | KeyCode::Down => self.focus_next(),
            KeyCode::BackTab | KeyCode::Up => self.focus_prev(),
            KeyCode::Char('a') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.advanced = !self.advanced;
                if !self.advanced && self.fields[self.focus].advanced {
                    self.focus = 0;
                }
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return FormOutcome::Cancelled;
            }
            KeyCode::Backspace => {
                let field = &mut self.fields[self.focus];
                if field.kind != FieldKind::Toggle {
                    field.value.pop();
                }
            }
            KeyCode::Char(' ') => {
                let field = &mut self.fields[self.focus];
                match field.kind {
                    FieldKind::Toggle => field.on = !field.on,
                    _ => field.value.push(' '),
                }
            }
            KeyCode::Char(c) => {
                let field = &mut self.fields[self.focus];
                if field.kind != FieldKind::Toggle {
                    field.value.push(c);
                }
            }
            _ => {}
        }
        FormOutcome::Editing
    }

    fn visible_indexes(&self) -> Vec<usize> {
        (0..self.fields.len())
            .filter(|&i| self.advanced || !self.fields[i].advanced)
            .collect()
    }

    fn focus_next(&mut self) {
        let visible = self.visible_indexes();
        let position = visible.iter().position(|&i| i == self.focus).unwrap_or(0);
        self.focus = visible[(position + 1) % visible.len()];
    }

    fn focus_prev(&mut self) {
        let visible = self.visible_indexes();
        let position = visible.iter().position(|&i| i == self.focus).unwrap_or(0);
        self.focus = visible[(position + visible.len() - 1) % visible.len()];
    }

    fn to_endpoint(&self) -> Result<Endpoint, String> {
        let host = self.fields[HOST].value.trim();
        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        let port = self.fields[PORT].value.trim();
        let port = if port.is_empty() { "22" } else { port };
        port.parse::<u16>()
            .map_err(|_| format!("invalid port: {port:?}"))?;

        let timeout = self.fields[TIMEOUT].value.trim();
        let connect_timeout = if timeout.is_empty() {
            0
        } else {
            timeout
                .parse::<u64>()
                .map_err(|_| format!("invalid timeout: {timeout:?}"))?
        };

        Ok(Endpoint {
            name: host.to_string(),
            address: join_host_port(host, port),
            user: self.fields[USER].value.trim().to_string(),
            remote_command: self.fields[REMOTE_COMMAND].value.trim().to_string(),
            proxy_jump: self.fields[PROXY_JUMP].value.trim().to_string(),
            send_env: self.fields[SEND_ENV].list_values(),
            set_env: self.fields[SET_ENV].list_values(),
            preferred_authentications: self.fields[AUTHS].list_values(),
            identity_files: self.fields[IDENTITY_FILES].list_values(),
            forward_agent: self.fields[FORWARD_AGENT].on,
            request_tty: self.fields[REQUEST_TTY].on,
            connect_timeout,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_str(form: &mut FormModel, s: &str) {
        for c in s.chars() {
            form.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_blank_form_defaults() {
        let form = FormModel::new(&Endpoint::default());
        let rows = form.rows();
        // only the basic fields until advanced unfolds
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "Hostname");
        assert_eq!(rows[0].1, "localhost");
    }

    #[test]
    fn test_edit_and_submit() {
        let mut form = FormModel::new(&Endpoint::default());
        // clear the "localhost" default
        for _ in 0.."localhost".len() {
            form.handle_key(key(KeyCode::Backspace));
        }
        type_str(&mut form, "db.example");

        match form.handle_key(key(KeyCode::Enter)) {
            FormOutcome::Submit(endpoint) => {
                assert_eq!(endpoint.name, "db.example");
                assert_eq!(endpoint.address, "db.example:22");
                assert_eq!(endpoint.connect_timeout, 30);
            }
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn test_prefill_from_endpoint() {
        let endpoint = Endpoint {
            name: "foo".to_string(),
            address: "foo.example:2222".to_string(),
            user: "ops".to_string(),
            forward_agent: true,
            ..Default::default()
        };
        let mut form = FormModel::new(&endpoint);
        form.handle_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL));

        let rows = form.rows();
        let port = rows.iter().find(|r| r.0 == "Port").unwrap();
        assert_eq!(port.1, "2222");
        let agent = rows.iter().find(|r| r.0 == "ForwardAgent").unwrap();
        assert_eq!(agent.1, "yes");
    }

    #[test]
    fn test_invalid_port_blocks_submit() {
        let mut form = FormModel::new(&Endpoint::default());
        form.handle_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL));
        // focus Port and corrupt it
        while form.rows().iter().find(|r| r.2).unwrap().0 != "Port" {
            form.handle_key(key(KeyCode::Tab));
        }
        type_str(&mut form, "x");

        assert_eq!(form.handle_key(key(KeyCode::Enter)), FormOutcome::Editing);
        assert!(form.error().unwrap().contains("invalid port"));
    }

    #[test]
    fn test_escape_cancels() {
        let mut form = FormModel::new(&Endpoint::default());
        assert_eq!(form.handle_key(key(KeyCode::Esc)), FormOutcome::Cancelled);
    }

    #[test]
    fn test_toggle_flips_with_space() {
        let mut form = FormModel::new(&Endpoint::default());
        form.handle_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL));
        while form.rows().iter().find(|r| r.2).unwrap().0 != "RequestTTY" {
            form.handle_key(key(KeyCode::Tab));
        }
        form.handle_key(key(KeyCode::Char(' ')));

        match form.handle_key(key(KeyCode::Enter)) {
            FormOutcome::Submit(endpoint) => assert!(endpoint.request_tty),
            other => panic!("expected submit, got {other:?}"),
        }
    }
}
