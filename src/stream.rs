// Copyright 2025 Dustin McAfee
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

//! A buffered, timeout-bounded byte stream over any `AsyncRead + AsyncWrite`
//! transport.
//!
//! Every read is bounded by an absolute deadline: partial progress never
//! extends the deadline, and [`ByteStream::read_exact`] pushes back whatever
//! it read on timeout so a caller's retry starts from a clean buffer. The
//! transport is a type parameter so a future TLS wrapper can be substituted
//! without touching the protocol state machine built on top of this module.

use crate::error::{Result, VncError};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Buffered reader/writer with deadline-bounded reads and a sticky closed flag.
pub struct ByteStream<S> {
    inner: S,
    buf: BytesMut,
    closed: bool,
}

impl<S> ByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a transport. The stream starts open with an empty read buffer.
    pub fn new(inner: S) -> Self {
        ByteStream {
            inner,
            buf: BytesMut::with_capacity(4096),
            closed: false,
        }
    }

    /// True once any transport failure has been observed; reads return
    /// [`VncError::TransportClosed`] from then on without touching the
    /// transport again.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the stream closed. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Reads bytes up to (and consuming) the first occurrence of `terminator`,
    /// returning the prefix before it. The terminator byte itself is consumed
    /// but not included in the result. Any bytes read past the terminator
    /// remain buffered for the next call.
    pub async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == terminator) {
                let line = self.buf.split_to(pos);
                self.buf.advance(1); // drop the terminator itself
                return Ok(line.to_vec());
            }
            self.fill_once(deadline).await?;
        }
    }

    /// Reads exactly `n` bytes. On timeout, any bytes already buffered for
    /// this call are left at the head of the internal buffer (they were never
    /// removed from it), so a subsequent call sees the same prefix again.
    pub async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        while self.buf.len() < n {
            self.fill_once(deadline).await?;
        }
        Ok(self.buf.split_to(n).to_vec())
    }

    async fn fill_once(&mut self, deadline: Instant) -> Result<()> {
        if self.closed {
            return Err(VncError::TransportClosed);
        }
        let mut chunk = [0u8; 4096];
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(VncError::TransportTimeout);
        }
        let read = tokio::time::timeout(remaining, self.inner.read(&mut chunk)).await;
        match read {
            Err(_) => Err(VncError::TransportTimeout),
            Ok(Err(e)) => {
                self.closed = true;
                Err(VncError::Io(e))
            }
            Ok(Ok(0)) => {
                self.closed = true;
                Err(VncError::TransportClosed)
            }
            Ok(Ok(n)) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
        }
    }

    /// Writes all of `bytes` to the transport. On any failure the stream is
    /// marked closed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(VncError::TransportClosed);
        }
        if let Err(e) = self.inner.write_all(bytes).await {
            self.closed = true;
            return Err(VncError::Io(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_until_returns_prefix_and_buffers_tail() {
        let (mut client, server) = duplex(64);
        let mut stream = ByteStream::new(server);
        client.write_all(b"RFB 003.008\nextra").await.unwrap();
        let line = stream
            .read_until(b'\n', Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(line, b"RFB 003.008");
        let rest = stream.read_exact(5, Duration::from_millis(200)).await.unwrap();
        assert_eq!(rest, b"extra");
    }

    #[tokio::test]
    async fn read_exact_times_out_and_preserves_partial_bytes() {
        let (mut client, server) = duplex(64);
        let mut stream = ByteStream::new(server);
        client.write_all(b"ab").await.unwrap();
        let result = stream.read_exact(5, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(VncError::TransportTimeout)));

        client.write_all(b"cde").await.unwrap();
        let full = stream.read_exact(5, Duration::from_millis(200)).await.unwrap();
        assert_eq!(full, b"abcde");
    }

    #[tokio::test]
    async fn closed_peer_surfaces_transport_closed() {
        let (client, server) = duplex(64);
        let mut stream = ByteStream::new(server);
        drop(client);
        let result = stream.read_exact(1, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(VncError::TransportClosed)));
        assert!(stream.is_closed());
    }
}
