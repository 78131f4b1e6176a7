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

//! Deferred close actions for the session broker.
//!
//! A brokered connection accumulates things that must be torn down whatever
//! happens: the session channel, the client, a jump client, the agent
//! channel, a cancelled reader. They register here and are drained exactly
//! once, in registration order, on every exit path.

use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;

type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A collection of deferred close actions.
#[derive(Default)]
pub struct Closers {
    items: Vec<(String, CloseFn)>,
}

impl Closers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a close action. The future is built lazily when the stack
    /// drains.
    pub fn defer<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.items
            .push((name.into(), Box::new(move || Box::pin(f()))));
    }

    /// Absorbs another set of closers, preserving their order.
    pub fn extend(&mut self, other: Closers) {
        self.items.extend(other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Runs every registered action exactly once, in registration order, even
    /// when earlier ones fail. EOF-shaped errors are dropped; everything else
    /// is logged and aggregated into the returned error.
    pub async fn close(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (name, close) in self.items.drain(..) {
            if let Err(err) = close().await {
                if is_eof(&err) {
                    continue;
                }
                tracing::warn!(closer = %name, error = %err, "close failed");
                failures.push(format!("{name}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{}", failures.join("; "))
        }
    }
}

fn is_eof(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::UnexpectedEof)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_all_closers_run_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let flags: Vec<Arc<AtomicBool>> =
            (0..4).map(|_| Arc::new(AtomicBool::new(false))).collect();

        let mut closers = Closers::new();
        for (i, flag) in flags.iter().enumerate() {
            let flag = Arc::clone(flag);
            let order = Arc::clone(&order);
            closers.defer(format!("close-{i}"), move || async move {
                flag.store(true, Ordering::SeqCst);
                order.lock().unwrap().push(i);
                if i % 2 == 1 {
                    anyhow::bail!("fake error {i}");
                }
                Ok(())
            });
        }

        let result = closers.close().await;
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("fake error 1"));
        assert!(message.contains("fake error 3"));

        for flag in &flags {
            assert!(flag.load(Ordering::SeqCst));
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_runs_each_action_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut closers = Closers::new();
        let c = Arc::clone(&count);
        closers.defer("counted", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        closers.close().await.unwrap();
        closers.close().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eof_ignored() {
        let mut closers = Closers::new();
        closers.defer("eof", || async {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into())
        });
        assert!(closers.close().await.is_ok());
    }
}
