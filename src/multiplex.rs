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

//! Input multiplexing: split one blocking byte stream into two independently
//! consumable, resettable readers.
//!
//! The parent session's stdin feeds both the directory list and, after a
//! selection, the brokered child session. Each consumer owns a [`TapReader`];
//! bytes appear in both in source order, and either side may be [`reset`] to
//! discard what was buffered but never read. Reads never observe EOF: a tap
//! with an empty queue waits for new data, because both consumers treat their
//! reader like a terminal stdin.
//!
//! [`reset`]: TapReader::reset

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const STAGING_BUF_SIZE: usize = 256;

/// One side of the fan-out: a byte queue fed by the pump, drained by a single
/// consumer.
#[derive(Clone)]
pub struct TapReader {
    shared: Arc<TapShared>,
}

struct TapShared {
    queue: Mutex<VecDeque<u8>>,
    notify: Notify,
}

impl TapReader {
    fn new() -> Self {
        Self {
            shared: Arc::new(TapShared {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Reads buffered bytes, waiting for new data when the queue is empty.
    /// Never returns zero for a non-empty `buf`.
    pub async fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock().expect("tap lock poisoned");
                if !queue.is_empty() {
                    let n = buf.len().min(queue.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = queue.pop_front().expect("len checked");
                    }
                    return n;
                }
            }
            notified.await;
        }
    }

    /// Discards everything buffered but not yet read.
    pub fn reset(&self) {
        self.shared
            .queue
            .lock()
            .expect("tap lock poisoned")
            .clear();
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.shared.queue.lock().expect("tap lock poisoned").len()
    }

    fn push(&self, bytes: &[u8]) {
        {
            let mut queue = self.shared.queue.lock().expect("tap lock poisoned");
            queue.extend(bytes);
        }
        self.shared.notify.notify_one();
    }
}

/// The write side of the fan-out. The served-mode handler pushes channel data
/// here directly; local readers go through [`multiplex`] instead.
#[derive(Clone)]
pub struct Fanout {
    taps: [TapReader; 2],
}

impl Fanout {
    /// Creates the fan-out and its two taps.
    pub fn new() -> (Self, TapReader, TapReader) {
        let r1 = TapReader::new();
        let r2 = TapReader::new();
        let fanout = Self {
            taps: [r1.clone(), r2.clone()],
        };
        (fanout, r1, r2)
    }

    /// Appends a chunk to both taps. Each queue is guarded by its own lock;
    /// they are never held together.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        for tap in &self.taps {
            tap.push(bytes);
        }
    }
}

/// Spawns a pump reading `source` into both returned taps until `stop` fires.
///
/// Read errors other than end-of-stream are logged and the pump keeps going.
/// On end-of-stream the pump backs off briefly and retries, so a source that
/// comes back (or a stop signal) is picked up without a hot loop.
pub fn multiplex<R>(mut source: R, stop: CancellationToken) -> (TapReader, TapReader)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (fanout, r1, r2) = Fanout::new();

    tokio::spawn(async move {
        let mut staging = [0u8; STAGING_BUF_SIZE];
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                read = source.read(&mut staging) => match read {
                    Ok(0) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Ok(n) => fanout.write(&staging[..n]),
                    Err(err) => {
                        tracing::debug!(error = %err, "ignored multiplex read error");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    });

    (r1, r2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    async fn read_exact_len(tap: &TapReader, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut buf = [0u8; 64];
        while out.len() < len {
            let n = tap.read(&mut buf).await;
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_both_taps_see_all_bytes_in_order() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let stop = CancellationToken::new();
        let (r1, r2) = multiplex(rx, stop.clone());

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        tx.write_all(&payload).await.unwrap();

        let got1 = read_exact_len(&r1, payload.len()).await;
        let got2 = read_exact_len(&r2, payload.len()).await;
        assert_eq!(got1, payload);
        assert_eq!(got2, payload);

        stop.cancel();
    }

    #[tokio::test]
    async fn test_taps_consume_independently() {
        let (fanout, r1, r2) = Fanout::new();
        fanout.write(b"hello");

        let mut buf = [0u8; 2];
        assert_eq!(r1.read(&mut buf).await, 2);
        assert_eq!(&buf, b"he");

        // r2 is unaffected by r1's position
        let got = read_exact_len(&r2, 5).await;
        assert_eq!(got, b"hello");
        assert_eq!(r1.buffered(), 3);
    }

    #[tokio::test]
    async fn test_reset_discards_unread() {
        let (fanout, r1, _r2) = Fanout::new();
        fanout.write(b"stale");
        r1.reset();

        let mut buf = [0u8; 8];
        let pending = timeout(Duration::from_millis(50), r1.read(&mut buf)).await;
        assert!(pending.is_err(), "read after reset should wait for new data");

        fanout.write(b"new");
        let n = r1.read(&mut buf).await;
        assert_eq!(&buf[..n], b"new");
    }

    #[tokio::test]
    async fn test_source_eof_does_not_propagate() {
        let (tx, rx) = tokio::io::duplex(64);
        let stop = CancellationToken::new();
        let (r1, _r2) = multiplex(rx, stop.clone());
        drop(tx);

        let mut buf = [0u8; 8];
        let pending = timeout(Duration::from_millis(100), r1.read(&mut buf)).await;
        assert!(pending.is_err(), "tap must block rather than report EOF");

        stop.cancel();
    }

    #[tokio::test]
    async fn test_buffered_bytes_drain_after_stop() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let stop = CancellationToken::new();
        let (r1, _r2) = multiplex(rx, stop.clone());

        tx.write_all(b"tail").await.unwrap();
        let got = read_exact_len(&r1, 4).await;
        assert_eq!(got, b"tail");

        stop.cancel();
        let mut buf = [0u8; 4];
        let pending = timeout(Duration::from_millis(50), r1.read(&mut buf)).await;
        assert!(pending.is_err());
    }
}
