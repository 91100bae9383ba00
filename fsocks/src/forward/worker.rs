/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::stats::{ForwardWorkerStats, ReclaimCause, WorkerState};
use super::{DestinationChannel, DirectSession, SessionContext, TerminateReason, cleanup};
use crate::config::DirectForwardConfig;

#[derive(Debug, Error)]
#[error("forward worker interrupted")]
pub struct WorkerInterrupted;

enum SessionVerdict {
    Forward(Arc<dyn DestinationChannel>),
    Pending,
    Reclaim(ReclaimCause),
}

fn check_session(ctx: &SessionContext) -> SessionVerdict {
    if ctx.client().is_some_and(|c| !c.is_active()) {
        return SessionVerdict::Reclaim(ReclaimCause::ClientInactive);
    }
    let Some(dest) = ctx.destination() else {
        return SessionVerdict::Pending;
    };
    if !dest.is_active() {
        return SessionVerdict::Reclaim(ReclaimCause::RemoteInactive);
    }
    if let Some(reason) = ctx.mark().reason() {
        return SessionVerdict::Reclaim(ReclaimCause::Terminated(reason));
    }
    SessionVerdict::Forward(Arc::clone(dest))
}

#[inline]
fn quit_requested(quit: &watch::Receiver<()>) -> bool {
    // a dropped sender is a quit signal too
    !matches!(quit.has_changed(), Ok(false))
}

/// Take the next item, waiting at most `wait` for it to arrive.
async fn poll_bounded<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    wait: Duration,
    quit: &mut watch::Receiver<()>,
) -> Result<Option<T>, WorkerInterrupted> {
    if quit_requested(quit) {
        return Err(WorkerInterrupted);
    }
    match rx.try_recv() {
        Ok(v) => return Ok(Some(v)),
        Err(mpsc::error::TryRecvError::Disconnected) => return Ok(None),
        Err(mpsc::error::TryRecvError::Empty) => {}
    }

    tokio::select! {
        biased;

        _ = quit.changed() => Err(WorkerInterrupted),
        r = tokio::time::timeout(wait, rx.recv()) => Ok(r.ok().flatten()),
    }
}

/// A single forwarding loop, owning all sessions assigned to it.
pub struct ForwardWorker {
    id: usize,
    active: Vec<DirectSession>,
    admission: mpsc::UnboundedReceiver<DirectSession>,
    quit: watch::Receiver<()>,
    session_poll_wait: Duration,
    admission_poll_wait: Duration,
    flush_batch: NonZeroUsize,
    stats: Arc<ForwardWorkerStats>,
}

impl ForwardWorker {
    pub(crate) fn new(
        config: &DirectForwardConfig,
        admission: mpsc::UnboundedReceiver<DirectSession>,
        quit: watch::Receiver<()>,
        stats: Arc<ForwardWorkerStats>,
    ) -> Self {
        ForwardWorker {
            id: stats.worker_id(),
            active: Vec::new(),
            admission,
            quit,
            session_poll_wait: config.session_poll_wait,
            admission_poll_wait: config.admission_poll_wait,
            flush_batch: config.flush_batch,
            stats,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.stats.state()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub async fn run(&mut self) {
        debug!("forward worker #{} started", self.id);
        while !quit_requested(&self.quit) {
            if self.run_once().await.is_err() {
                break;
            }
        }
        self.shutdown().await;
        debug!("forward worker #{} terminated", self.id);
    }

    /// Run one active pass followed by one admission pass.
    pub async fn run_once(&mut self) -> Result<(), WorkerInterrupted> {
        self.forward_active().await?;
        self.admit_new().await
    }

    async fn forward_active(&mut self) -> Result<(), WorkerInterrupted> {
        let mut i = 0;
        while i < self.active.len() {
            match check_session(self.active[i].context()) {
                SessionVerdict::Pending => i += 1,
                SessionVerdict::Reclaim(cause) => {
                    let session = self.active.remove(i);
                    self.reclaim(session, cause).await;
                    self.stats.dec_alive();
                }
                SessionVerdict::Forward(dest) => {
                    let session = &mut self.active[i];
                    forward_queued(
                        session,
                        dest.as_ref(),
                        &mut self.quit,
                        self.session_poll_wait,
                        self.flush_batch,
                        &self.stats,
                    )
                    .await?;
                    if session.input_finished() {
                        // the client has nothing more to send
                        dest.shutdown();
                        let reason = TerminateReason::ClientClosed;
                        session.context().terminate(reason);
                        let session = self.active.remove(i);
                        self.reclaim(session, ReclaimCause::Terminated(reason)).await;
                        self.stats.dec_alive();
                    } else {
                        i += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn admit_new(&mut self) -> Result<(), WorkerInterrupted> {
        while let Some(session) =
            poll_bounded(&mut self.admission, self.admission_poll_wait, &mut self.quit).await?
        {
            trace!("forward worker #{} admitted session {}", self.id, session.id());
            self.stats.add_admitted();
            self.active.push(session);
        }
        Ok(())
    }

    async fn reclaim(&self, session: DirectSession, cause: ReclaimCause) {
        let id = session.id();
        let released = cleanup::reclaim(session, self.session_poll_wait).await;
        match cause {
            ReclaimCause::Terminated(reason) => debug!(
                "forward worker #{} reclaimed session {id} for {reason}, {released} buffers released",
                self.id
            ),
            _ => debug!(
                "forward worker #{} reclaimed session {id} ({cause:?}), {released} buffers released",
                self.id
            ),
        }
        self.stats.add_reclaimed(cause);
        self.stats.add_released(released);
    }

    /// Reclaim every session, either active or still waiting for admission.
    pub async fn shutdown(&mut self) {
        self.stats.set_state(WorkerState::Draining);

        for session in std::mem::take(&mut self.active) {
            self.reclaim(session, ReclaimCause::Shutdown).await;
            self.stats.dec_alive();
        }

        self.admission.close();
        while let Ok(session) = self.admission.try_recv() {
            self.reclaim(session, ReclaimCause::Shutdown).await;
        }

        self.stats.set_state(WorkerState::Terminated);
    }
}

async fn forward_queued(
    session: &mut DirectSession,
    dest: &dyn DestinationChannel,
    quit: &mut watch::Receiver<()>,
    wait: Duration,
    flush_batch: NonZeroUsize,
    stats: &ForwardWorkerStats,
) -> Result<(), WorkerInterrupted> {
    let mut pending = 0usize;
    while let Some(buf) = poll_bounded(session.inbound_mut(), wait, quit).await? {
        stats.add_forwarded(buf.len());
        pending += 1;
        if pending >= flush_batch.get() {
            dest.write_and_flush(buf);
            stats.add_flush();
            pending = 0;
        } else {
            dest.write(buf);
        }
    }
    if pending > 0 {
        dest.flush();
        stats.add_flush();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::testing::{MockDestination, MockLiveness, Op};
    use crate::forward::SessionHandle;
    use bytes::Bytes;

    struct TestWorker {
        worker: ForwardWorker,
        admission: mpsc::UnboundedSender<DirectSession>,
        quit: watch::Sender<()>,
        stats: Arc<ForwardWorkerStats>,
    }

    fn test_worker() -> TestWorker {
        let config = DirectForwardConfig::default();
        let (admission, admission_r) = mpsc::unbounded_channel();
        let (quit, quit_r) = watch::channel(());
        let stats = Arc::new(ForwardWorkerStats::new(0));
        let worker = ForwardWorker::new(&config, admission_r, quit_r, stats.clone());
        TestWorker {
            worker,
            admission,
            quit,
            stats,
        }
    }

    fn connected_session(
        id: u64,
    ) -> (
        DirectSession,
        SessionHandle,
        Arc<MockLiveness>,
        Arc<MockDestination>,
    ) {
        let client = Arc::new(MockLiveness::default());
        let (session, handle) = DirectSession::with_id(id, Some(client.clone()));
        let dest = Arc::new(MockDestination::default());
        handle.context().set_destination(dest.clone()).unwrap();
        (session, handle, client, dest)
    }

    fn push_n(handle: &SessionHandle, n: usize) {
        for i in 0..n {
            handle.push(Bytes::from(format!("buf{i}"))).unwrap();
        }
    }

    impl TestWorker {
        async fn admit(&mut self, session: DirectSession) {
            self.admission.send(session).unwrap();
            self.worker.run_once().await.unwrap();
        }
    }

    #[tokio::test]
    async fn flush_every_batch() {
        let mut t = test_worker();
        let (session, handle, _client, dest) = connected_session(1);
        t.admit(session).await;
        assert_eq!(t.worker.active_count(), 1);

        push_n(&handle, 8);
        t.worker.run_once().await.unwrap();

        let ops = dest.ops();
        assert_eq!(ops.len(), 8);
        for (i, op) in ops.iter().enumerate() {
            let expected = Bytes::from(format!("buf{i}"));
            if i % 4 == 3 {
                assert_eq!(op, &Op::WriteAndFlush(expected));
            } else {
                assert_eq!(op, &Op::Write(expected));
            }
        }
        assert_eq!(dest.flush_count(), 2);
        assert_eq!(t.stats.snapshot().flush, 2);
    }

    #[tokio::test]
    async fn trailing_flush() {
        let mut t = test_worker();
        let (session, handle, _client, dest) = connected_session(1);
        t.admit(session).await;

        push_n(&handle, 5);
        t.worker.run_once().await.unwrap();

        let ops = dest.ops();
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[3], Op::WriteAndFlush(Bytes::from("buf3")));
        assert_eq!(ops[4], Op::Write(Bytes::from("buf4")));
        assert_eq!(ops[5], Op::Flush);
        assert_eq!(dest.flush_count(), 2);

        // nothing queued, nothing to flush
        t.worker.run_once().await.unwrap();
        assert_eq!(dest.ops().len(), 6);
    }

    #[tokio::test]
    async fn pending_destination() {
        let mut t = test_worker();
        let client = Arc::new(MockLiveness::default());
        let (session, handle) = DirectSession::with_id(1, Some(client));
        t.admit(session).await;

        push_n(&handle, 3);
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 1);
        assert_eq!(t.stats.snapshot().buf_forwarded, 0);

        let dest = Arc::new(MockDestination::default());
        handle.context().set_destination(dest.clone()).unwrap();
        t.worker.run_once().await.unwrap();
        assert_eq!(dest.written().len(), 3);
        assert_eq!(dest.ops().last(), Some(&Op::Flush));
    }

    #[tokio::test]
    async fn dead_client() {
        let mut t = test_worker();
        let (session, handle, client, dest) = connected_session(1);
        t.admit(session).await;

        push_n(&handle, 3);
        client.set_active(false);
        t.worker.run_once().await.unwrap();

        assert_eq!(t.worker.active_count(), 0);
        assert!(dest.ops().is_empty());
        assert!(handle.is_reclaimed());
        let snap = t.stats.snapshot();
        assert_eq!(snap.reclaimed.client_inactive, 1);
        assert_eq!(snap.buf_released, 3);
        assert_eq!(snap.alive, 0);
    }

    #[tokio::test]
    async fn dead_client_without_destination() {
        let mut t = test_worker();
        let client = Arc::new(MockLiveness::default());
        let (session, handle) = DirectSession::with_id(1, Some(client.clone()));
        t.admit(session).await;

        client.set_active(false);
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 0);
        assert!(handle.is_reclaimed());
    }

    #[tokio::test]
    async fn dead_destination() {
        let mut t = test_worker();
        let (session, handle, _client, dest) = connected_session(1);
        t.admit(session).await;

        push_n(&handle, 2);
        dest.set_active(false);
        t.worker.run_once().await.unwrap();

        assert_eq!(t.worker.active_count(), 0);
        assert!(dest.ops().is_empty());
        assert_eq!(t.stats.snapshot().reclaimed.remote_inactive, 1);
    }

    #[tokio::test]
    async fn termination_mark() {
        let mut t = test_worker();
        let (session, handle, _client, dest) = connected_session(1);
        t.admit(session).await;

        push_n(&handle, 4);
        t.worker.run_once().await.unwrap();
        assert_eq!(dest.written().len(), 4);

        push_n(&handle, 2);
        handle.context().terminate(TerminateReason::ExplicitClose);
        t.worker.run_once().await.unwrap();

        assert_eq!(t.worker.active_count(), 0);
        assert_eq!(dest.written().len(), 4);
        let snap = t.stats.snapshot();
        assert_eq!(snap.reclaimed.terminated, 1);
        assert_eq!(snap.buf_forwarded + snap.buf_released, 6);
    }

    #[tokio::test]
    async fn client_input_finished() {
        let mut t = test_worker();
        let (session, handle, _client, dest) = connected_session(1);
        let ctx = Arc::clone(handle.context());
        t.admit(session).await;

        push_n(&handle, 3);
        drop(handle);
        t.worker.run_once().await.unwrap();

        assert_eq!(t.worker.active_count(), 0);
        let ops = dest.ops();
        assert_eq!(dest.written().len(), 3);
        assert_eq!(ops[ops.len() - 2], Op::Flush);
        assert_eq!(ops.last(), Some(&Op::Shutdown));
        assert!(ctx.mark().contains(TerminateReason::ClientClosed));

        let snap = t.stats.snapshot();
        assert_eq!(snap.reclaimed.terminated, 1);
        assert_eq!(snap.buf_forwarded, 3);
        assert_eq!(snap.buf_released, 0);
        assert_eq!(snap.alive, 0);
    }

    #[tokio::test]
    async fn input_finished_before_destination() {
        let mut t = test_worker();
        let client = Arc::new(MockLiveness::default());
        let (session, handle) = DirectSession::with_id(1, Some(client));
        let ctx = Arc::clone(handle.context());
        t.admit(session).await;

        push_n(&handle, 2);
        drop(handle);
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 1);

        let dest = Arc::new(MockDestination::default());
        ctx.set_destination(dest.clone()).unwrap();
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 0);
        assert_eq!(dest.written().len(), 2);
        assert_eq!(dest.ops().last(), Some(&Op::Shutdown));
    }

    #[tokio::test]
    async fn no_session_skipped() {
        let mut t = test_worker();
        let (s1, h1, c1, d1) = connected_session(1);
        let (s2, h2, _c2, d2) = connected_session(2);
        let (s3, h3, _c3, d3) = connected_session(3);
        t.admission.send(s1).unwrap();
        t.admission.send(s2).unwrap();
        t.admission.send(s3).unwrap();
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 3);

        push_n(&h1, 1);
        push_n(&h2, 2);
        push_n(&h3, 3);
        c1.set_active(false);
        t.worker.run_once().await.unwrap();

        assert_eq!(t.worker.active_count(), 2);
        assert!(d1.ops().is_empty());
        assert_eq!(d2.written().len(), 2);
        assert_eq!(d3.written().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_all() {
        let mut t = test_worker();
        let mut handles = Vec::new();
        for id in 0..2 {
            let (session, handle, _client, _dest) = connected_session(id);
            t.admission.send(session).unwrap();
            handles.push(handle);
        }
        t.worker.run_once().await.unwrap();
        assert_eq!(t.worker.active_count(), 2);

        for id in 2..5 {
            let (session, handle, _client, _dest) = connected_session(id);
            push_n(&handle, 2);
            t.admission.send(session).unwrap();
            handles.push(handle);
        }

        t.quit.send(()).unwrap();
        t.worker.run().await;

        assert_eq!(t.worker.state(), WorkerState::Terminated);
        assert_eq!(t.worker.active_count(), 0);
        let snap = t.stats.snapshot();
        assert_eq!(snap.reclaimed.shutdown, 5);
        assert_eq!(snap.buf_released, 6);
        assert_eq!(snap.alive, 0);
        assert!(handles.iter().all(|h| h.is_reclaimed()));
        assert!(t.admission.is_closed());
    }

    #[tokio::test]
    async fn interrupted() {
        let mut t = test_worker();
        let (session, handle, _client, _dest) = connected_session(1);
        t.admit(session).await;

        push_n(&handle, 2);
        t.quit.send(()).unwrap();
        assert!(t.worker.run_once().await.is_err());
        assert_eq!(t.worker.active_count(), 1);

        t.worker.shutdown().await;
        let snap = t.stats.snapshot();
        assert_eq!(snap.reclaimed.shutdown, 1);
        assert_eq!(snap.buf_released, 2);
    }

    #[tokio::test]
    async fn quit_sender_dropped() {
        let t = test_worker();
        let mut worker = t.worker;
        drop(t.quit);
        worker.run().await;
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn no_buffer_leak() {
        let mut t = test_worker();
        let (session, handle, _client, _dest) = connected_session(1);
        t.admit(session).await;

        let mut pushed = 0;
        for round in 0..4 {
            push_n(&handle, round + 3);
            pushed += round + 3;
            t.worker.run_once().await.unwrap();
        }
        push_n(&handle, 7);
        pushed += 7;
        handle.context().terminate(TerminateReason::RemoteClosed);
        t.worker.run_once().await.unwrap();

        let snap = t.stats.snapshot();
        assert_eq!((snap.buf_forwarded + snap.buf_released) as usize, pushed);
        assert_eq!(snap.buf_released, 7);
    }
}
