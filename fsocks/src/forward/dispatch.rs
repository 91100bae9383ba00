/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use fsocks_runtime::WorkersGuard;

use super::stats::{ForwardWorkerSnapshot, ForwardWorkerStats, WorkerState};
use super::{DirectSession, ForwardWorker, cleanup};
use crate::config::DirectForwardConfig;

/// Map an identity hash to a worker index in `0..count`.
pub fn shard_index(hash: i64, count: NonZeroUsize) -> usize {
    let count = i64::try_from(count.get()).unwrap_or(i64::MAX);
    (hash % count).unsigned_abs() as usize
}

struct WorkerSlot {
    admission: mpsc::UnboundedSender<DirectSession>,
    stats: Arc<ForwardWorkerStats>,
}

/// Publishing side of the forwarding engine.
///
/// Cloning is cheap, all clones publish to the same set of workers.
#[derive(Clone)]
pub struct DirectForwarder {
    slots: Arc<[WorkerSlot]>,
    worker_number: NonZeroUsize,
}

/// Controls the lifetime of the forward workers.
///
/// Dropping it without calling [`ForwardWorkersGuard::shutdown`] still asks the workers to
/// quit, but the runtime threads may go away before they have reclaimed all sessions.
pub struct ForwardWorkersGuard {
    quit_sender: watch::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    runtime: WorkersGuard,
}

impl ForwardWorkersGuard {
    pub fn thread_count(&self) -> usize {
        self.runtime.thread_count()
    }

    /// Stop all workers, wait for them to reclaim every session they own, then join their
    /// runtime threads.
    pub async fn shutdown(self) {
        let ForwardWorkersGuard {
            quit_sender,
            tasks,
            runtime,
        } = self;

        let _ = quit_sender.send(());
        for (id, task) in tasks.into_iter().enumerate() {
            if let Err(e) = task.await {
                warn!("forward worker #{id} exited abnormally: {e}");
            }
        }
        if let Err(e) = tokio::task::spawn_blocking(move || runtime.join()).await {
            warn!("failed to join forward worker threads: {e}");
        }
        info!("all direct forward workers stopped");
    }
}

impl DirectForwarder {
    pub fn start(
        config: &DirectForwardConfig,
    ) -> anyhow::Result<(DirectForwarder, ForwardWorkersGuard)> {
        let worker_number = config.worker_number;

        let mut handles = Vec::new();
        let runtime = config
            .runtime
            .start(worker_number, |_, handle| handles.push(handle))
            .context("failed to start forward worker runtime")?;

        let (quit_sender, _) = watch::channel(());
        let mut slots = Vec::with_capacity(worker_number.get());
        let mut tasks = Vec::with_capacity(worker_number.get());
        for (id, handle) in (0..worker_number.get()).zip(handles.iter().cycle()) {
            let (admission, admission_r) = mpsc::unbounded_channel();
            let stats = Arc::new(ForwardWorkerStats::new(id));
            let mut worker =
                ForwardWorker::new(config, admission_r, quit_sender.subscribe(), stats.clone());
            tasks.push(handle.spawn(async move { worker.run().await }));
            slots.push(WorkerSlot { admission, stats });
        }
        info!(
            "started {worker_number} direct forward workers on {} threads",
            runtime.thread_count()
        );

        let forwarder = DirectForwarder {
            slots: Arc::from(slots),
            worker_number,
        };
        let guard = ForwardWorkersGuard {
            quit_sender,
            tasks,
            runtime,
        };
        Ok((forwarder, guard))
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_number.get()
    }

    #[inline]
    pub fn shard_of(&self, session: &DirectSession) -> usize {
        shard_index(session.identity_hash(), self.worker_number)
    }

    /// Hand the session to the worker it belongs to. This never fails.
    ///
    /// If that worker has already gone, the session is released right here.
    pub fn publish(&self, session: DirectSession) {
        let shard = self.shard_of(&session);
        let slot = &self.slots[shard];
        slot.stats.add_published();
        if let Err(mpsc::error::SendError(session)) = slot.admission.send(session) {
            let id = session.id();
            let released = cleanup::release_now(session);
            slot.stats.add_released(released);
            warn!(
                "forward worker #{shard} has exited, session {id} released with {released} buffers dropped"
            );
        }
    }

    pub fn worker_state(&self, id: usize) -> Option<WorkerState> {
        self.slots.get(id).map(|slot| slot.stats.state())
    }

    pub fn stats(&self) -> Vec<ForwardWorkerSnapshot> {
        self.slots.iter().map(|slot| slot.stats.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::testing::MockLiveness;
    use std::time::Duration;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn shard_range() {
        let w = nz(4);
        assert_eq!(shard_index(1, w), 1);
        assert_eq!(shard_index(5, w), 1);
        assert_eq!(shard_index(9, w), 1);
        assert_eq!(shard_index(8, w), 0);
        assert_eq!(shard_index(-1, w), 1);
        assert_eq!(shard_index(-7, w), 3);
        assert_eq!(shard_index(i64::MIN, w), 0);
        assert_eq!(shard_index(i64::MAX, w), 3);

        for w in 1..=16 {
            for hash in [i64::MIN, i64::MIN + 1, -12345, -1, 0, 1, 54321, i64::MAX] {
                let shard = shard_index(hash, nz(w));
                assert!(shard < w);
                assert_eq!(shard, shard_index(hash, nz(w)));
            }
        }
    }

    #[test]
    fn shard_single_worker() {
        for hash in [i64::MIN, -3, 0, 3, i64::MAX] {
            assert_eq!(shard_index(hash, nz(1)), 0);
        }
    }

    async fn wait_until<F: Fn() -> bool>(f: F) -> bool {
        for _ in 0..500 {
            if f() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        false
    }

    fn test_config() -> DirectForwardConfig {
        let mut config = DirectForwardConfig::default();
        config.runtime.set_thread_name("test-fwd");
        config
    }

    #[tokio::test]
    async fn publish_to_shard() {
        let (forwarder, guard) = DirectForwarder::start(&test_config()).unwrap();
        assert_eq!(forwarder.worker_count(), 4);
        assert_eq!(guard.thread_count(), 4);

        let mut handles = Vec::new();
        for id in [1, 5, 9] {
            let client = Arc::new(MockLiveness::default());
            let (session, handle) = DirectSession::with_id(id, Some(client));
            assert_eq!(forwarder.shard_of(&session), 1);
            forwarder.publish(session);
            handles.push(handle);
        }

        assert!(wait_until(|| forwarder.stats()[1].alive == 3).await);
        let stats = forwarder.stats();
        assert_eq!(stats[1].published, 3);
        for i in [0, 2, 3] {
            assert_eq!(stats[i].published, 0);
            assert_eq!(stats[i].alive, 0);
        }

        guard.shutdown().await;
        for i in 0..4 {
            assert_eq!(forwarder.worker_state(i), Some(WorkerState::Terminated));
        }
        let stats = forwarder.stats();
        assert_eq!(stats[1].reclaimed.shutdown, 3);
        assert_eq!(stats[1].alive, 0);
        assert!(handles.iter().all(|h| h.is_reclaimed()));
    }

    #[tokio::test]
    async fn publish_after_shutdown() {
        let (forwarder, guard) = DirectForwarder::start(&test_config()).unwrap();
        guard.shutdown().await;

        let (session, handle) = DirectSession::with_id(2, None);
        handle.push(bytes::Bytes::from_static(b"lost")).unwrap();
        forwarder.publish(session);

        assert!(handle.is_reclaimed());
        let stats = forwarder.stats();
        assert_eq!(stats[2].published, 1);
        assert_eq!(stats[2].buf_released, 1);
    }
}
