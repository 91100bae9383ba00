/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use fsocks_runtime::WorkerRuntimeConfig;

const DEFAULT_WORKER_NUMBER: NonZeroUsize = NonZeroUsize::new(4).unwrap();
const DEFAULT_FLUSH_BATCH: NonZeroUsize = NonZeroUsize::new(4).unwrap();
const DEFAULT_THREAD_NAME: &str = "fwd-worker";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectForwardConfig {
    pub worker_number: NonZeroUsize,
    /// Max time to wait for the next buffer of a session before moving on.
    pub session_poll_wait: Duration,
    /// Max time to wait for the next new session in each admission pass.
    pub admission_poll_wait: Duration,
    /// Every n-th buffer written is flushed at once.
    pub flush_batch: NonZeroUsize,
    pub runtime: WorkerRuntimeConfig,
}

impl Default for DirectForwardConfig {
    fn default() -> Self {
        let mut runtime = WorkerRuntimeConfig::default();
        runtime.set_thread_name(DEFAULT_THREAD_NAME);
        DirectForwardConfig {
            worker_number: DEFAULT_WORKER_NUMBER,
            session_poll_wait: Duration::from_millis(1),
            admission_poll_wait: Duration::from_millis(2),
            flush_batch: DEFAULT_FLUSH_BATCH,
            runtime,
        }
    }
}

impl DirectForwardConfig {
    pub(crate) fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        let mut config = DirectForwardConfig::default();
        match v {
            Yaml::Hash(map) => {
                fsocks_yaml::foreach_kv(map, |k, v| config.set(k, v))?;
                config.check()?;
                Ok(config)
            }
            Yaml::Null => Ok(config),
            _ => Err(anyhow!(
                "yaml value type for 'direct forward config' should be 'map'"
            )),
        }
    }

    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "worker_number" | "workers" => {
                self.worker_number = fsocks_yaml::value::as_nonzero_usize(v)?;
                Ok(())
            }
            "session_poll_wait" => {
                self.session_poll_wait = fsocks_yaml::humanize::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "admission_poll_wait" => {
                self.admission_poll_wait = fsocks_yaml::humanize::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "flush_batch" | "flush_batch_size" => {
                self.flush_batch = fsocks_yaml::value::as_nonzero_usize(v)?;
                Ok(())
            }
            _ => self.runtime.set_by_yaml_kv(k, v),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.session_poll_wait.is_zero() {
            return Err(anyhow!("session_poll_wait should not be zero"));
        }
        if self.admission_poll_wait.is_zero() {
            return Err(anyhow!("admission_poll_wait should not be zero"));
        }
        Ok(())
    }
}
