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

//! Configuration: the endpoint data model, hint overlays, OpenSSH-style
//! intake and the YAML loader.

pub mod hints;
pub mod loader;
pub mod ssh_config;
pub mod types;
pub mod utils;

pub use hints::apply_hints;
pub use types::{
    first_non_empty, join_host_port, split_host_port, Config, Endpoint, EndpointHint, Link,
    MiddlewareChain, User,
};
pub use utils::{current_username, expand_tilde};
