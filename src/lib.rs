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

//! Wishlist is an SSH directory: a terminal catalog of SSH endpoints from
//! which a user picks one and is transparently connected to it. It runs
//! locally against the operator's terminal, or as an SSH server that shows
//! the list to each connected user and brokers them into their selection.

pub mod blocking;
pub mod broker;
pub mod cli;
pub mod closers;
pub mod config;
pub mod jump;
pub mod keygen;
pub mod listing;
pub mod multiplex;
pub mod pty;
pub mod server;
pub mod ssh;

pub use cli::Cli;
pub use config::{Config, Endpoint};
