/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::forward::{ConnectionLiveness, DestinationChannel};

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

enum WriteCommand {
    Data(Bytes),
    Flush,
    Shutdown,
}

/// Destination channel over any async writer.
///
/// Writes are queued to a dedicated task, which owns the buffered writer. The channel turns
/// inactive once shut down, or once that task has stopped on error.
pub struct StreamDestination {
    sender: mpsc::UnboundedSender<WriteCommand>,
    active: Arc<AtomicBool>,
}

impl StreamDestination {
    /// Spawn the writer task on the current runtime.
    pub fn spawn<W>(writer: W, buffer_size: usize) -> (Self, JoinHandle<io::Result<u64>>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let writer = BufWriter::with_capacity(buffer_size, writer);
        let task = tokio::spawn(run_writer(writer, receiver, active.clone()));
        (StreamDestination { sender, active }, task)
    }

    fn send(&self, cmd: WriteCommand) {
        if self.active.load(Ordering::Relaxed) {
            // the data is dropped along with the error if the writer has gone
            let _ = self.sender.send(cmd);
        }
    }
}

async fn run_writer<W>(
    mut writer: BufWriter<W>,
    mut receiver: mpsc::UnboundedReceiver<WriteCommand>,
    active: Arc<AtomicBool>,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let r = async {
        while let Some(cmd) = receiver.recv().await {
            match cmd {
                WriteCommand::Data(buf) => {
                    writer.write_all(&buf).await?;
                    total += buf.len() as u64;
                }
                WriteCommand::Flush => writer.flush().await?,
                WriteCommand::Shutdown => break,
            }
        }
        writer.shutdown().await
    }
    .await;
    active.store(false, Ordering::Relaxed);
    receiver.close();
    if let Err(e) = &r {
        debug!("destination writer stopped after {total} bytes: {e}");
    }
    r.map(|_| total)
}

impl ConnectionLiveness for StreamDestination {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed) && !self.sender.is_closed()
    }
}

impl DestinationChannel for StreamDestination {
    fn write(&self, buf: Bytes) {
        self.send(WriteCommand::Data(buf));
    }

    fn write_and_flush(&self, buf: Bytes) {
        self.send(WriteCommand::Data(buf));
        self.send(WriteCommand::Flush);
    }

    fn flush(&self) {
        self.send(WriteCommand::Flush);
    }

    fn shutdown(&self) {
        self.send(WriteCommand::Shutdown);
        self.active.store(false, Ordering::Relaxed);
    }
}
