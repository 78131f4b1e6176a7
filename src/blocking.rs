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

//! Stdin-like reads over sources that can run dry.
//!
//! A brokered session treats its input like a terminal stdin, which never
//! EOFs. [`SessionInput`] is the reading contract the broker consumes, and
//! [`BlockingReader`] adapts any async reader to it by masking end-of-stream:
//! it backs off briefly and retries, propagating only real errors.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::multiplex::TapReader;

/// A byte source the broker can feed into a child session's stdin.
#[async_trait]
pub trait SessionInput: Send {
    /// Reads at least one byte, waiting as long as it takes. Only real I/O
    /// errors surface; end-of-stream does not.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Adapts an async reader into a stdin-like source that never EOFs.
pub struct BlockingReader<R> {
    inner: R,
}

impl<R> BlockingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R> SessionInput for BlockingReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf).await {
                // The underlying buffer ran dry; more may still be written.
                Ok(0) => tokio::time::sleep(Duration::from_millis(10)).await,
                Ok(n) => return Ok(n),
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl SessionInput for TapReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(TapReader::read(self, buf).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_masks_eof() {
        let mut reader = BlockingReader::new(std::io::Cursor::new(b"hi".to_vec()));
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");

        // the cursor is exhausted; the read must wait instead of returning 0
        let pending = timeout(Duration::from_millis(50), reader.read(&mut buf)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_resumes_after_new_data() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let mut reader = BlockingReader::new(rx);

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"a").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);

        tokio::io::AsyncWriteExt::write_all(&mut tx, b"bc").await.unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"bc");
    }
}
