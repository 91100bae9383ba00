/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use anyhow::{Context, anyhow};
use tokio::runtime::{Builder, Runtime};
use yaml_rust::Yaml;

const DEFAULT_THREAD_NAME: &str = "main";

/// Config of the runtime running servers and io tasks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MainRuntimeConfig {
    /// `Some(0)` means a current thread runtime.
    thread_number: Option<usize>,
    thread_name: String,
    thread_stack_size: Option<usize>,
}

impl Default for MainRuntimeConfig {
    fn default() -> Self {
        MainRuntimeConfig {
            thread_number: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            thread_stack_size: None,
        }
    }
}

impl MainRuntimeConfig {
    pub fn thread_number(&self) -> Option<usize> {
        self.thread_number
    }

    pub fn start(&self) -> io::Result<Runtime> {
        let mut builder = match self.thread_number {
            Some(0) => Builder::new_current_thread(),
            Some(n) => {
                let mut builder = Builder::new_multi_thread();
                builder.worker_threads(n);
                builder
            }
            None => Builder::new_multi_thread(),
        };
        builder.enable_all().thread_name(&self.thread_name);
        if let Some(size) = self.thread_stack_size {
            builder.thread_stack_size(size);
        }
        builder.build()
    }

    pub(crate) fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        let mut config = MainRuntimeConfig::default();
        match v {
            Yaml::Hash(map) => {
                fsocks_yaml::foreach_kv(map, |k, v| config.set(k, v))?;
                Ok(config)
            }
            Yaml::Null => Ok(config),
            _ => Err(anyhow!("root value type should be hash")),
        }
    }

    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "thread_number" => {
                self.thread_number = Some(fsocks_yaml::value::as_usize(v)?);
                Ok(())
            }
            "thread_name" => {
                let name = fsocks_yaml::value::as_string(v)
                    .context(format!("invalid string value for key {k}"))?;
                if name.is_empty() {
                    return Err(anyhow!("empty thread name"));
                }
                self.thread_name = name;
                Ok(())
            }
            "thread_stack_size" => {
                let size = fsocks_yaml::humanize::as_usize(v)
                    .context(format!("invalid humanize usize value for key {k}"))?;
                self.thread_stack_size = Some(size);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}
