/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DirectTcpServerConfig;
use crate::forward::{DirectForwarder, DirectSession, SessionHandle, TerminateReason};
use crate::io::{ConnectionFlag, StreamDestination, feed_session};

/// Accepts clients on one port and forwards each of them directly to the configured upstream.
pub struct DirectTcpServer {
    config: Arc<DirectTcpServerConfig>,
    listener: TcpListener,
    forwarder: DirectForwarder,
}

impl DirectTcpServer {
    pub async fn bind(
        config: Arc<DirectTcpServerConfig>,
        forwarder: DirectForwarder,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(DirectTcpServer {
            config,
            listener,
            forwarder,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut quit: watch::Receiver<()>) {
        info!(
            "server {} started, forwarding to {}",
            self.config.name, self.config.upstream
        );
        loop {
            tokio::select! {
                biased;

                _ = quit.changed() => break,
                r = self.listener.accept() => match r {
                    Ok((stream, peer)) => {
                        let task = DirectTcpTask {
                            config: self.config.clone(),
                            forwarder: self.forwarder.clone(),
                            peer,
                        };
                        tokio::spawn(task.run(stream));
                    }
                    Err(e) => warn!("server {} failed to accept: {e}", self.config.name),
                }
            }
        }
        info!("server {} stopped", self.config.name);
    }
}

struct DirectTcpTask {
    config: Arc<DirectTcpServerConfig>,
    forwarder: DirectForwarder,
    peer: SocketAddr,
}

impl DirectTcpTask {
    async fn connect(&self) -> io::Result<TcpStream> {
        let upstream = &self.config.upstream;
        match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((upstream.host(), upstream.port())),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }

    fn spawn_reader<R>(
        &self,
        reader: R,
        handle: SessionHandle,
        client: Arc<ConnectionFlag>,
    ) -> JoinHandle<()>
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        let buffer_size = self.config.tcp_read_buffer_size;
        let peer = self.peer;
        tokio::spawn(async move {
            match feed_session(reader, &handle, buffer_size).await {
                Ok(n) => debug!("client {peer} read side finished after {n} bytes"),
                Err(e) => {
                    debug!("client {peer} read error: {e}");
                    handle.context().terminate(TerminateReason::ClientClosed);
                    client.set_inactive();
                }
            }
        })
    }

    async fn run(self, stream: TcpStream) {
        let (clt_r, mut clt_w) = stream.into_split();
        let client = Arc::new(ConnectionFlag::default());
        let (session, handle) = DirectSession::new(Some(client.clone()));
        let ctx = Arc::clone(handle.context());
        let id = session.id();
        debug!("session {id} created for client {}", self.peer);

        self.forwarder.publish(session);
        // the session input ends once the reader drops its handle
        let reader = self.spawn_reader(clt_r, handle, client.clone());

        let ups_stream = match self.connect().await {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "session {id}: failed to connect to upstream {}: {e}",
                    self.config.upstream
                );
                ctx.terminate(TerminateReason::RemoteUnreachable);
                client.set_inactive();
                reader.abort();
                return;
            }
        };
        let (mut ups_r, ups_w) = ups_stream.into_split();
        let (dest, _writer) = StreamDestination::spawn(ups_w, self.config.tcp_write_buffer_size);
        if let Err(e) = ctx.set_destination(Arc::new(dest)) {
            warn!("session {id}: {e}");
            ctx.terminate(TerminateReason::ExplicitClose);
            reader.abort();
            return;
        }

        let reason = match tokio::io::copy(&mut ups_r, &mut clt_w).await {
            Ok(n) => {
                debug!("session {id}: upstream closed after {n} bytes");
                TerminateReason::RemoteClosed
            }
            Err(e) => {
                debug!("session {id}: return path failed: {e}");
                TerminateReason::ClientClosed
            }
        };
        ctx.terminate(reason);
        client.set_inactive();
        reader.abort();
        let _ = clt_w.shutdown().await;
    }
}
