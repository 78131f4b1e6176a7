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

//! The directory listing: a single-threaded state machine over input events.
//!
//! The model never touches the terminal itself; frontends feed it messages
//! (keys, resizes, endpoint refreshes, broker outcomes) and act on what it
//! returns. During a handoff the frontend owns the terminal and the model is
//! simply not consulted until the broker comes back.

pub mod form;
pub mod item;
pub mod keys;
pub mod local;
pub mod view;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::config::Endpoint;
use form::{FormModel, FormOutcome};
use item::{build_items, Features, Item};

/// Input events driving the listing.
#[derive(Debug)]
pub enum Msg {
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    /// Live refresh from the endpoint update relay.
    SetEndpoints(Vec<Endpoint>),
    /// Outcome of a finished handoff; `None` is a clean close.
    Err(Option<String>),
}

/// What the frontend should do after an update.
#[derive(Debug, PartialEq)]
pub enum Action {
    None,
    /// Yield the terminal and broker into this endpoint.
    Connect(Box<Endpoint>),
    /// Put this host name on the clipboard (local only).
    CopyHost(String),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Inactive,
    Editing,
    Applied,
}

/// The main wishlist model.
pub struct ListModel {
    endpoints: Vec<Endpoint>,
    items: Vec<Item>,
    features: Features,
    filter: String,
    filter_state: FilterState,
    selected: usize,
    err: Option<String>,
    local: bool,
    form: Option<FormModel>,
    pub width: u16,
    pub height: u16,
}

impl ListModel {
    /// A listing for a served parent session.
    pub fn remote(endpoints: Vec<Endpoint>) -> Self {
        Self::new(endpoints, false)
    }

    /// A listing on the operator's own terminal; allows editing and creating
    /// endpoints on the fly.
    pub fn local(endpoints: Vec<Endpoint>) -> Self {
        Self::new(endpoints, true)
    }

    fn new(endpoints: Vec<Endpoint>, local: bool) -> Self {
        let mut model = Self {
            endpoints: Vec::new(),
            items: Vec::new(),
            features: Features::default(),
            filter: String::new(),
            filter_state: FilterState::Inactive,
            selected: 0,
            err: None,
            local,
            form: None,
            width: 80,
            height: 24,
        };
        model.set_items(endpoints);
        model
    }

    /// Replaces the endpoint set, recomputing the shared row layout. The
    /// filter survives a refresh.
    pub fn set_items(&mut self, endpoints: Vec<Endpoint>) {
        self.features = Features::of(&endpoints);
        self.items = build_items(&endpoints, self.features);
        self.endpoints = endpoints;
        tracing::debug!(height = self.features.item_height(), "setting item height");
        self.clamp_selection();
    }

    /// Item indexes currently visible under the filter.
    pub fn visible(&self) -> Vec<usize> {
        if self.filter.is_empty() {
            return (0..self.items.len()).collect();
        }
        let needle = self.filter.to_lowercase();
        (0..self.items.len())
            .filter(|&i| self.items[i].title().to_lowercase().contains(&needle))
            .collect()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn selected_position(&self) -> usize {
        self.selected
    }

    pub fn error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    pub fn form(&self) -> Option<&FormModel> {
        self.form.as_ref()
    }

    pub fn filter_line(&self) -> Option<String> {
        match self.filter_state {
            FilterState::Inactive => None,
            FilterState::Editing => Some(format!("/{}", self.filter)),
            FilterState::Applied => Some(format!("filter: {}", self.filter)),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    fn selected_item(&self) -> Option<&Item> {
        let visible = self.visible();
        visible.get(self.selected).map(|&i| &self.items[i])
    }

    fn clamp_selection(&mut self) {
        let count = self.visible().len();
        if count == 0 {
            self.selected = 0;
        } else if self.selected >= count {
            self.selected = count - 1;
        }
    }

    /// Feeds one event through the state machine.
    pub fn update(&mut self, msg: Msg) -> Action {
        match msg {
            Msg::Resize { width, height } => {
                self.width = width;
                self.height = height;
                Action::None
            }
            Msg::SetEndpoints(endpoints) => {
                // A refresh mid-filter rebuilds the items without touching
                // the filter input.
                self.set_items(endpoints);
                Action::None
            }
            Msg::Err(Some(err)) => {
                tracing::warn!(error = %err, "got an error");
                self.err = Some(err);
                Action::None
            }
            Msg::Err(None) => Action::None,
            Msg::Key(key) => self.handle_key(key),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        // The error pane swallows one keystroke, whatever it is.
        if self.err.is_some() {
            self.err = None;
            return Action::None;
        }

        if let Some(form) = self.form.as_mut() {
            return match form.handle_key(key) {
                FormOutcome::Editing => Action::None,
                FormOutcome::Cancelled => {
                    self.form = None;
                    Action::None
                }
                FormOutcome::Submit(endpoint) => {
                    self.form = None;
                    Action::Connect(endpoint)
                }
            };
        }

        if self.filter_state == FilterState::Editing {
            return self.handle_filter_key(key);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.quit(),
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.filter_state == FilterState::Applied && key.code == KeyCode::Esc {
                    self.filter.clear();
                    self.filter_state = FilterState::Inactive;
                    self.clamp_selection();
                    return Action::None;
                }
                self.quit()
            }
            KeyCode::Char('/') => {
                self.filter.clear();
                self.filter_state = FilterState::Editing;
                self.selected = 0;
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let count = self.visible().len();
                if count > 0 && self.selected + 1 < count {
                    self.selected += 1;
                }
                Action::None
            }
            KeyCode::Enter | KeyCode::Char('o') => match self.selected_item() {
                // connecting with nothing selected is a no-op
                None => Action::None,
                Some(item) => Action::Connect(Box::new(item.endpoint.clone())),
            },
            KeyCode::Char('y') if self.local => match self.selected_item() {
                None => Action::None,
                Some(item) => Action::CopyHost(item.endpoint.host()),
            },
            KeyCode::Char('n') if self.local => {
                self.form = Some(FormModel::new(&Endpoint::default()));
                Action::None
            }
            KeyCode::Char('e') if self.local => {
                let selected = self.selected_item().map(|item| item.endpoint.clone());
                if let Some(endpoint) = selected {
                    self.form = Some(FormModel::new(&endpoint));
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Enter => {
                self.filter_state = if self.filter.is_empty() {
                    FilterState::Inactive
                } else {
                    FilterState::Applied
                };
            }
            KeyCode::Esc => {
                self.filter.clear();
                self.filter_state = FilterState::Inactive;
            }
            KeyCode::Backspace => {
                self.filter.pop();
            }
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                let count = self.visible().len();
                if count > 0 && self.selected + 1 < count {
                    self.selected += 1;
                }
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.filter.push(c);
                self.selected = 0;
            }
            _ => {}
        }
        self.clamp_selection();
        Action::None
    }

    fn quit(&mut self) -> Action {
        // Quitting is disabled while a filter is being edited or applied.
        if self.filter_state != FilterState::Inactive {
            return Action::None;
        }
        Action::Quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn ctrl(c: char) -> Msg {
        Msg::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    #[test]
    fn test_arrow_down_enter_connects_to_second() {
        let mut model = ListModel::local(endpoints());
        assert_eq!(model.update(key(KeyCode::Down)), Action::None);
        match model.update(key(KeyCode::Enter)) {
            Action::Connect(endpoint) => assert_eq!(endpoint.name, "bar"),
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_on_empty_list_is_noop() {
        let mut model = ListModel::local(vec![]);
        assert_eq!(model.update(key(KeyCode::Enter)), Action::None);
    }

    #[test]
    fn test_quit_keys() {
        for code in [KeyCode::Char('q'), KeyCode::Esc] {
            let mut model = ListModel::local(endpoints());
            assert_eq!(model.update(key(code)), Action::Quit);
        }
        let mut model = ListModel::local(endpoints());
        assert_eq!(model.update(ctrl('c')), Action::Quit);
    }

    #[test]
    fn test_quit_ignored_while_filtering() {
        let mut model = ListModel::local(endpoints());
        model.update(key(KeyCode::Char('/')));
        model.update(key(KeyCode::Char('f')));
        assert_eq!(model.update(ctrl('c')), Action::None);

        // applied filter still blocks quitting on q
        model.update(key(KeyCode::Enter));
        assert_eq!(model.update(key(KeyCode::Char('q'))), Action::None);

        // esc clears the applied filter instead of quitting
        assert_eq!(model.update(key(KeyCode::Esc)), Action::None);
        assert!(model.filter_line().is_none());
        assert_eq!(model.update(key(KeyCode::Esc)), Action::Quit);
    }

    #[test]
    fn test_filter_narrows_and_enter_connects_match() {
        let mut model = ListModel::local(endpoints());
        model.update(key(KeyCode::Char('/')));
        model.update(key(KeyCode::Char('b')));
        assert_eq!(model.visible().len(), 1);

        model.update(key(KeyCode::Enter)); // apply
        match model.update(key(KeyCode::Enter)) {
            Action::Connect(endpoint) => assert_eq!(endpoint.name, "bar"),
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[test]
    fn test_refresh_during_filter_keeps_filter() {
        let mut model = ListModel::local(endpoints());
        model.update(key(KeyCode::Char('/')));
        model.update(key(KeyCode::Char('b')));

        let mut more = endpoints();
        more.push(Endpoint {
            name: "baz".to_string(),
            address: "baz:22".to_string(),
            ..Default::default()
        });
        model.update(Msg::SetEndpoints(more));

        assert_eq!(model.filter_line().unwrap(), "/b");
        assert_eq!(model.visible().len(), 2); // bar and baz
    }

    #[test]
    fn test_error_pane_swallows_one_key() {
        let mut model = ListModel::local(endpoints());
        model.update(Msg::Err(Some("connection failed: nope".to_string())));
        assert!(model.error().is_some());

        assert_eq!(model.update(key(KeyCode::Char('x'))), Action::None);
        assert!(model.error().is_none());

        // next key acts on the list again
        assert_eq!(model.update(key(KeyCode::Char('q'))), Action::Quit);
    }

    #[test]
    fn test_clean_return_re_enters_list() {
        let mut model = ListModel::local(endpoints());
        model.update(Msg::Err(None));
        assert!(model.error().is_none());
        match model.update(key(KeyCode::Enter)) {
            Action::Connect(endpoint) => assert_eq!(endpoint.name, "foo"),
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[test]
    fn test_copy_host_local_only() {
        let mut model = ListModel::local(endpoints());
        assert_eq!(
            model.update(key(KeyCode::Char('y'))),
            Action::CopyHost("foo.example".to_string())
        );

        let mut remote = ListModel::remote(endpoints());
        assert_eq!(remote.update(key(KeyCode::Char('y'))), Action::None);
    }

    #[test]
    fn test_form_keys_local_only() {
        let mut remote = ListModel::remote(endpoints());
        remote.update(key(KeyCode::Char('n')));
        assert!(remote.form().is_none());

        let mut local = ListModel::local(endpoints());
        local.update(key(KeyCode::Char('n')));
        assert!(local.form().is_some());
    }

    #[test]
    fn test_edit_form_prefilled_and_submits_connect() {
        let mut model = ListModel::local(endpoints());
        model.update(key(KeyCode::Char('e')));
        assert!(model.form().is_some());

        match model.update(key(KeyCode::Enter)) {
            Action::Connect(endpoint) => {
                assert_eq!(endpoint.address, "foo.example:22");
            }
            other => panic!("expected connect, got {other:?}"),
        }
        assert!(model.form().is_none());
    }

    #[test]
    fn test_selection_clamped_on_shrink() {
        let mut model = ListModel::local(endpoints());
        model.update(key(KeyCode::Down));
        model.update(Msg::SetEndpoints(vec![Endpoint {
            name: "only".to_string(),
            address: "only:22".to_string(),
            ..Default::default()
        }]));
        match model.update(key(KeyCode::Enter)) {
            Action::Connect(endpoint) => assert_eq!(endpoint.name, "only"),
            other => panic!("expected connect, got {other:?}"),
        }
    }
}
