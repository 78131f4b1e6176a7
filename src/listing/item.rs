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

//! Listing rows: how one endpoint renders in the directory.

use crate::config::Endpoint;

/// Which optional rows the current endpoint set shows. Computed once per
/// item rebuild so every item has the same height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub has_desc: bool,
    pub has_link: bool,
}

impl Features {
    pub fn of(endpoints: &[Endpoint]) -> Self {
        let mut features = Self::default();
        for endpoint in endpoints {
            if !endpoint.is_valid() {
                continue;
            }
            if !endpoint.desc.is_empty() {
                features.has_desc = true;
            }
            if !endpoint.link.url.is_empty() {
                features.has_link = true;
            }
            if features.has_desc && features.has_link {
                break;
            }
        }
        features
    }

    /// Lines per item: title plus every descriptor row in play. The
    /// `ssh://` row always shows.
    pub fn item_height(&self) -> usize {
        1 + usize::from(self.has_desc) + usize::from(self.has_link) + 1
    }
}

/// One descriptor line of an item. Placeholders render dimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub text: String,
    pub placeholder: bool,
}

impl Row {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            placeholder: false,
        }
    }

    fn placeholder(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            placeholder: true,
        }
    }
}

/// A renderable listing item.
#[derive(Debug, Clone)]
pub struct Item {
    pub endpoint: Endpoint,
    pub rows: Vec<Row>,
}

impl Item {
    pub fn title(&self) -> &str {
        &self.endpoint.name
    }
}

/// Builds items for every valid endpoint, with uniform rows per `features`.
pub fn build_items(endpoints: &[Endpoint], features: Features) -> Vec<Item> {
    endpoints
        .iter()
        .filter(|e| e.is_valid())
        .map(|endpoint| Item {
            rows: build_rows(endpoint, features),
            endpoint: endpoint.clone(),
        })
        .collect()
}

fn build_rows(endpoint: &Endpoint, features: Features) -> Vec<Row> {
    let mut rows = Vec::with_capacity(features.item_height() - 1);

    if features.has_desc {
        match endpoint.desc.lines().next().unwrap_or_default() {
            "" => rows.push(Row::placeholder("no description")),
            first => rows.push(Row::text(first)),
        }
    }

    if features.has_link {
        let link = endpoint.link.to_string();
        if link.is_empty() {
            rows.push(Row::placeholder("no link"));
        } else {
            rows.push(Row::text(link));
        }
    }

    rows.push(Row::text(endpoint.ssh_url()));
    rows
}
