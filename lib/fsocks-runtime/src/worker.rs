/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use log::{error, trace};
use tokio::runtime::Handle;
use tokio::sync::watch;

#[cfg(feature = "yaml")]
mod yaml;

const DEFAULT_THREAD_NAME: &str = "worker";

/// Keeps the worker threads alive.
///
/// Dropping the guard closes every worker runtime, which cancels all the tasks still
/// spawned on them.
pub struct WorkersGuard {
    close_sender: watch::Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkersGuard {
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Close all worker runtimes and wait for the threads to exit.
    ///
    /// This blocks the current thread, don't call it inside an async context.
    pub fn join(self) {
        let WorkersGuard {
            close_sender,
            threads,
        } = self;
        drop(close_sender);
        for (i, handle) in threads.into_iter().enumerate() {
            if handle.join().is_err() {
                error!("worker thread #{i} panicked");
            }
        }
    }
}

/// Config for a set of dedicated threads, each driving its own current thread tokio runtime.
///
/// A task spawned on one of these runtimes stays on the same OS thread for its whole lifetime.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerRuntimeConfig {
    thread_number: Option<NonZeroUsize>,
    thread_name: String,
    thread_stack_size: Option<usize>,
}

impl Default for WorkerRuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRuntimeConfig {
    pub fn new() -> Self {
        WorkerRuntimeConfig {
            thread_number: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_stack_size: None,
        }
    }

    pub fn set_thread_number(&mut self, num: NonZeroUsize) {
        self.thread_number = Some(num);
    }

    /// The explicitly configured thread number, if any.
    pub fn thread_number(&self) -> Option<NonZeroUsize> {
        self.thread_number
    }

    pub fn set_thread_name(&mut self, name: &str) {
        self.thread_name = name.to_string();
    }

    pub fn set_thread_stack_size(&mut self, size: usize) {
        self.thread_stack_size = Some(size);
    }

    /// Spawn the worker threads.
    ///
    /// `recv_handle` is called once per thread, in thread id order, with the handle of the
    /// runtime running on that thread. `default_number` is used if no thread number is set.
    pub fn start<F>(
        &self,
        default_number: NonZeroUsize,
        mut recv_handle: F,
    ) -> anyhow::Result<WorkersGuard>
    where
        F: FnMut(usize, Handle),
    {
        let thread_num = self.thread_number.unwrap_or(default_number).get();
        let (close_w, _close_r) = watch::channel(());
        let mut threads = Vec::with_capacity(thread_num);

        for i in 0..thread_num {
            let mut close_r = close_w.subscribe();
            let (sender, receiver) = mpsc::sync_channel(1);

            let mut thread_builder =
                std::thread::Builder::new().name(format!("{}#{i}", self.thread_name));
            if let Some(stack_size) = self.thread_stack_size {
                thread_builder = thread_builder.stack_size(stack_size);
            }

            let thread = thread_builder
                .spawn(move || {
                    trace!("started worker thread #{i}");

                    let mut builder = tokio::runtime::Builder::new_current_thread();
                    builder.enable_all();

                    match builder.build() {
                        Ok(rt) => {
                            rt.block_on(async move {
                                let handle = Handle::current();
                                if sender.send(handle).is_ok() {
                                    let _ = close_r.changed().await;
                                }
                            });
                        }
                        Err(e) => {
                            error!("failed to create tokio runtime on worker thread {i}: {e}");
                        }
                    }
                    trace!("stopped worker thread #{i}");
                })
                .map_err(|e| anyhow!("failed to spawn worker thread {i}: {e}"))?;
            threads.push(thread);

            match receiver.recv() {
                Ok(handle) => recv_handle(i, handle),
                Err(_) => {
                    return Err(anyhow!(
                        "no tokio runtime handler got from worker thread {i}"
                    ));
                }
            }
        }

        Ok(WorkersGuard {
            close_sender: close_w,
            threads,
        })
    }
}
