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

//! Building the per-endpoint SSH server configuration.

use anyhow::Result;
use russh::keys::PrivateKey;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Endpoint;

/// The protocol-level pieces of one served endpoint.
pub struct EndpointServer {
    pub russh_config: Arc<russh::server::Config>,
    pub endpoint: Endpoint,
}

/// Builds the SSH server for a served endpoint. Swappable so embedders can
/// bring their own host keys or protocol settings.
pub trait ServerFactory: Send + Sync {
    fn create(&self, endpoint: &Endpoint) -> Result<EndpointServer>;
}

/// The stock factory: one shared Ed25519 host key, sane auth timing.
pub struct DefaultFactory {
    host_key: PrivateKey,
}

impl DefaultFactory {
    pub fn new(host_key: PrivateKey) -> Self {
        Self { host_key }
    }
}

impl ServerFactory for DefaultFactory {
    fn create(&self, endpoint: &Endpoint) -> Result<EndpointServer> {
        let russh_config = russh::server::Config {
            keys: vec![self.host_key.clone()],
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            ..Default::default()
        };
        Ok(EndpointServer {
            russh_config: Arc::new(russh_config),
            endpoint: endpoint.clone(),
        })
    }
}
