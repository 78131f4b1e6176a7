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

//! Command routing for `ssh server -t <name>`: skip the list and broker
//! straight into an endpoint picked by name.

use anyhow::Result;
use async_trait::async_trait;

use super::middleware::{Flow, Middleware};
use super::session::ServedSession;

pub struct CommandMiddleware;

#[async_trait]
impl Middleware for CommandMiddleware {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn before(&self, session: &mut ServedSession) -> Result<Flow> {
        let command = session.command.clone();

        // No command and the literal `list` both fall through to the
        // listing; so does anything that is not a single word.
        if command.is_empty() || command.len() != 1 || command[0] == "list" {
            return Ok(Flow::Continue);
        }

        let name = &command[0];
        let endpoints = session.endpoints.read().await.clone();

        if let Some(endpoint) = endpoints
            .iter()
            .find(|e| e.is_valid() && e.name == *name)
            .cloned()
        {
            let code = match session.run_handoff(&endpoint).await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %err, "handoff failed");
                    let _ = session
                        .write_err(format!("wishlist: {err:#}\n\r").as_bytes())
                        .await;
                    1
                }
            };
            session.exit(code).await;
            return Ok(Flow::Stop);
        }

        let _ = session
            .write_err(not_found_message(name, &endpoints).as_bytes())
            .await;
        session.exit(1).await;
        Ok(Flow::Stop)
    }
}

/// The stderr line for an unknown command: names every valid one.
fn not_found_message(name: &str, endpoints: &[crate::config::Endpoint]) -> String {
    let valid = std::iter::once("list".to_string())
        .chain(endpoints.iter().map(|e| e.name.clone()))
        .map(|n| format!("{n:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("wishlist: command {name:?} not found, valid commands are {valid}.\n\r")
}
