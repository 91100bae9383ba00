/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::forward::SessionHandle;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Read from the client and queue every chunk to the session.
///
/// Returns the number of bytes queued, once the client reaches EOF or the session has been
/// reclaimed.
pub async fn feed_session<R>(
    mut reader: R,
    handle: &SessionHandle,
    buffer_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(buffer_size);
        let nr = reader.read_buf(&mut buf).await?;
        if nr == 0 {
            return Ok(total);
        }
        if handle.push(buf.freeze()).is_err() {
            return Ok(total);
        }
        total += nr as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::DirectSession;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn feed_to_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut session, handle) = DirectSession::with_id(1, None);

        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        let total = feed_session(server, &handle, 4).await.unwrap();
        assert_eq!(total, 5);

        let inbound = session.inbound_mut();
        let mut data = Vec::new();
        while let Ok(buf) = inbound.try_recv() {
            data.extend_from_slice(&buf);
        }
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn stop_on_reclaim() {
        let (mut client, server) = tokio::io::duplex(64);
        let (session, handle) = DirectSession::with_id(1, None);
        drop(session);

        client.write_all(b"data").await.unwrap();
        let total = feed_session(server, &handle, 1024).await.unwrap();
        assert_eq!(total, 0);
    }
}
