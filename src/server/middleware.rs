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

//! Session interceptors for served endpoints.
//!
//! Interceptors compose like wrapping middleware: the chain runs `before`
//! from the last entry to the first, stopping at the first one that handles
//! the session, then unwinds `after` in the opposite direction. The listing
//! endpoint carries two: the listing itself and the command router in front
//! of it.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::session::ServedSession;

/// Whether to keep walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The session was handled; skip the rest of the chain.
    Stop,
}

/// A pre-session interceptor on a served endpoint.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the remaining chain. Returning [`Flow::Stop`] means the
    /// session was fully handled here.
    async fn before(&self, session: &mut ServedSession) -> Result<Flow>;

    /// Unwinds after the chain ran, in reverse `before` order.
    async fn after(&self, _session: &mut ServedSession) -> Result<()> {
        Ok(())
    }
}

/// Runs a chain over one session. Entries wrap: the last one registered sees
/// the session first.
pub async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    session: &mut ServedSession,
) -> Result<()> {
    let mut ran = Vec::new();
    for middleware in chain.iter().rev() {
        ran.push(middleware);
        match middleware.before(session).await? {
            Flow::Continue => continue,
            Flow::Stop => break,
        }
    }
    for middleware in ran.into_iter().rev() {
        middleware.after(session).await?;
    }
    Ok(())
}

/// An interceptor that does nothing; marks an endpoint as served without
/// giving it behavior. Useful in tests and for relay-only endpoints.
pub fn noop() -> Arc<dyn Middleware> {
    struct Noop;

    #[async_trait]
    impl Middleware for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn before(&self, _session: &mut ServedSession) -> Result<Flow> {
            Ok(Flow::Continue)
        }
    }

    Arc::new(Noop)
}
