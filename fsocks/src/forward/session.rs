/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

static SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Liveness of a connection handle, owned by the io layer.
///
/// Implementations must not block, a slightly stale answer is fine.
pub trait ConnectionLiveness: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Write side of the destination connection.
///
/// All methods only enqueue to the io layer and return at once. A buffer passed in is owned by
/// the channel from then on, even if the connection has already gone.
pub trait DestinationChannel: ConnectionLiveness {
    fn write(&self, buf: Bytes);
    fn write_and_flush(&self, buf: Bytes);
    fn flush(&self);
    /// Flush what is pending and close the write side, no more data will follow.
    fn shutdown(&self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminateReason {
    ExplicitClose,
    ClientClosed,
    RemoteClosed,
    RemoteUnreachable,
}

impl TerminateReason {
    const ALL: [TerminateReason; 4] = [
        TerminateReason::ExplicitClose,
        TerminateReason::ClientClosed,
        TerminateReason::RemoteClosed,
        TerminateReason::RemoteUnreachable,
    ];

    fn bit(self) -> u8 {
        match self {
            TerminateReason::ExplicitClose => 1 << 0,
            TerminateReason::ClientClosed => 1 << 1,
            TerminateReason::RemoteClosed => 1 << 2,
            TerminateReason::RemoteUnreachable => 1 << 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::ExplicitClose => "ExplicitClose",
            TerminateReason::ClientClosed => "ClientClosed",
            TerminateReason::RemoteClosed => "RemoteClosed",
            TerminateReason::RemoteUnreachable => "RemoteUnreachable",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of reasons for which a session has been asked to terminate.
///
/// Any collaborator may add a reason at any time. The owning worker reclaims the session as
/// soon as it sees a non-empty set, whatever the connections report.
#[derive(Default)]
pub struct TerminationMark {
    bits: AtomicU8,
}

impl TerminationMark {
    /// Returns false if the reason was already in the set.
    pub fn insert(&self, reason: TerminateReason) -> bool {
        let bit = reason.bit();
        self.bits.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    pub fn contains(&self, reason: TerminateReason) -> bool {
        self.bits.load(Ordering::Acquire) & reason.bit() != 0
    }

    pub fn is_marked(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    /// The most significant reason in the set, if any.
    pub fn reason(&self) -> Option<TerminateReason> {
        let bits = self.bits.load(Ordering::Acquire);
        TerminateReason::ALL.into_iter().find(|r| bits & r.bit() != 0)
    }
}

#[derive(Error, Debug)]
#[error("destination of session {0} has already been set")]
pub struct SetDestinationError(u64);

/// The part of a session shared by every collaborator.
pub struct SessionContext {
    id: u64,
    client: Option<Arc<dyn ConnectionLiveness>>,
    destination: OnceLock<Arc<dyn DestinationChannel>>,
    mark: TerminationMark,
}

impl SessionContext {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hash used for sharding, stable for the whole session lifetime. It may be negative.
    #[inline]
    pub fn identity_hash(&self) -> i64 {
        self.id as i64
    }

    pub fn client(&self) -> Option<&Arc<dyn ConnectionLiveness>> {
        self.client.as_ref()
    }

    /// Returns `None` until the destination handshake has completed.
    pub fn destination(&self) -> Option<&Arc<dyn DestinationChannel>> {
        self.destination.get()
    }

    /// Set the destination channel. This can succeed only once, it is never replaced.
    pub fn set_destination(
        &self,
        destination: Arc<dyn DestinationChannel>,
    ) -> Result<(), SetDestinationError> {
        self.destination
            .set(destination)
            .map_err(|_| SetDestinationError(self.id))
    }

    #[inline]
    pub fn mark(&self) -> &TerminationMark {
        &self.mark
    }

    pub fn terminate(&self, reason: TerminateReason) {
        self.mark.insert(reason);
    }
}

/// A direct session as handed to the forwarder.
///
/// The value carries the consuming end of the inbound queue, so whoever owns it is the only
/// reader of the queue and the only writer to the destination.
pub struct DirectSession {
    ctx: Arc<SessionContext>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl DirectSession {
    /// Create a session with the next process wide unique id.
    pub fn new(client: Option<Arc<dyn ConnectionLiveness>>) -> (DirectSession, SessionHandle) {
        let id = SESSION_ID.fetch_add(1, Ordering::Relaxed);
        DirectSession::with_id(id, client)
    }

    pub fn with_id(
        id: u64,
        client: Option<Arc<dyn ConnectionLiveness>>,
    ) -> (DirectSession, SessionHandle) {
        let ctx = Arc::new(SessionContext {
            id,
            client,
            destination: OnceLock::new(),
            mark: TerminationMark::default(),
        });
        let (sender, inbound) = mpsc::unbounded_channel();
        let session = DirectSession {
            ctx: Arc::clone(&ctx),
            inbound,
        };
        (session, SessionHandle { ctx, sender })
    }

    #[inline]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.ctx.id
    }

    #[inline]
    pub fn identity_hash(&self) -> i64 {
        self.ctx.identity_hash()
    }

    pub(crate) fn inbound_mut(&mut self) -> &mut mpsc::UnboundedReceiver<Bytes> {
        &mut self.inbound
    }

    /// All producers are gone and every queued buffer has been taken.
    pub fn input_finished(&self) -> bool {
        self.inbound.is_closed() && self.inbound.is_empty()
    }
}

/// Producer side of a session, used by the client reader.
#[derive(Clone)]
pub struct SessionHandle {
    ctx: Arc<SessionContext>,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl SessionHandle {
    #[inline]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Queue a buffer for forwarding.
    ///
    /// The buffer is given back if the session has already been reclaimed.
    pub fn push(&self, buf: Bytes) -> Result<(), Bytes> {
        self.sender.send(buf).map_err(|e| e.0)
    }

    pub fn is_reclaimed(&self) -> bool {
        self.sender.is_closed()
    }
}
