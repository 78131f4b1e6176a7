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

//! Hint overlays: refine discovered endpoints with YAML-configured rules.

use glob::Pattern;

use super::types::{join_host_port, split_host_port, Endpoint, EndpointHint, Link};

/// Applies each hint to every endpoint whose name matches its glob.
///
/// Scalar fields overwrite the endpoint value when the hint sets them; list
/// fields append. Invalid hint globs are logged and skipped, never fatal.
pub fn apply_hints(mut endpoints: Vec<Endpoint>, hints: &[EndpointHint]) -> Vec<Endpoint> {
    for hint in hints {
        let pattern = match Pattern::new(&hint.match_pattern) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(
                    pattern = %hint.match_pattern,
                    error = %err,
                    "invalid hint match, skipping"
                );
                continue;
            }
        };

        for endpoint in endpoints.iter_mut() {
            if !pattern.matches(&endpoint.name) {
                continue;
            }
            overlay(endpoint, hint);
        }
    }
    endpoints
}

fn overlay(endpoint: &mut Endpoint, hint: &EndpointHint) {
    if !hint.port.is_empty() {
        let (host, _) = split_host_port(&endpoint.address);
        endpoint.address = join_host_port(&host, &hint.port);
    }
    if !hint.user.is_empty() {
        endpoint.user = hint.user.clone();
    }
    if let Some(forward_agent) = hint.forward_agent {
        endpoint.forward_agent = forward_agent;
    }
    if let Some(request_tty) = hint.request_tty {
        endpoint.request_tty = request_tty;
    }
    if !hint.remote_command.is_empty() {
        endpoint.remote_command = hint.remote_command.clone();
    }
    if !hint.desc.is_empty() {
        endpoint.desc = hint.desc.clone();
    }
    if hint.link != Link::default() {
        endpoint.link = hint.link.clone();
    }
    if !hint.proxy_jump.is_empty() {
        endpoint.proxy_jump = hint.proxy_jump.clone();
    }
    endpoint.send_env.extend(hint.send_env.iter().cloned());
    endpoint.set_env.extend(hint.set_env.iter().cloned());
    endpoint
        .preferred_authentications
        .extend(hint.preferred_authentications.iter().cloned());
    endpoint
        .identity_files
        .extend(hint.identity_files.iter().cloned());
    if hint.connect_timeout != 0 {
        endpoint.connect_timeout = hint.connect_timeout;
    }
}
