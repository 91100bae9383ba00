/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use super::DirectSession;

/// Release all buffers still queued for the session and drop it.
///
/// The queue is closed first, so producers get their buffers back from then on and the drain
/// always comes to an end. Returns the number of buffers released here.
pub async fn reclaim(mut session: DirectSession, wait: Duration) -> usize {
    let inbound = session.inbound_mut();
    inbound.close();

    let mut released = 0;
    while let Ok(Some(buf)) = tokio::time::timeout(wait, inbound.recv()).await {
        drop(buf);
        released += 1;
    }
    released
}

/// Same as [`reclaim`] but without ever waiting.
pub fn release_now(mut session: DirectSession) -> usize {
    let inbound = session.inbound_mut();
    inbound.close();

    let mut released = 0;
    while let Ok(buf) = inbound.try_recv() {
        drop(buf);
        released += 1;
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn reclaim_queued() {
        let (session, handle) = DirectSession::with_id(1, None);
        for _ in 0..5 {
            handle.push(Bytes::from_static(b"data")).unwrap();
        }

        let released = reclaim(session, Duration::from_millis(1)).await;
        assert_eq!(released, 5);
        assert!(handle.is_reclaimed());
        assert!(handle.push(Bytes::from_static(b"late")).is_err());
    }

    #[tokio::test]
    async fn reclaim_empty() {
        let (session, _handle) = DirectSession::with_id(1, None);
        assert_eq!(reclaim(session, Duration::from_millis(1)).await, 0);
    }

    #[test]
    fn release_queued() {
        let (session, handle) = DirectSession::with_id(2, None);
        let buf = Bytes::from(vec![0u8; 64]);
        handle.push(buf.clone()).unwrap();
        handle.push(buf.clone()).unwrap();

        assert_eq!(release_now(session), 2);
        assert!(handle.is_reclaimed());
        // only the local copy is left
        assert!(buf.is_unique());
    }
}
