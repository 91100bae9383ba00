/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use super::WorkerRuntimeConfig;

impl WorkerRuntimeConfig {
    /// Set a single config key, returns an error for unknown keys.
    pub fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "thread_number" | "threads" => {
                let value = fsocks_yaml::value::as_nonzero_usize(v)?;
                self.set_thread_number(value);
                Ok(())
            }
            "thread_name" => {
                let name = fsocks_yaml::value::as_string(v)
                    .context(format!("invalid string value for key {k}"))?;
                if name.is_empty() {
                    return Err(anyhow!("empty thread name"));
                }
                self.set_thread_name(&name);
                Ok(())
            }
            "thread_stack_size" => {
                let value = fsocks_yaml::humanize::as_usize(v)
                    .context(format!("invalid humanize usize value for key {k}"))?;
                self.set_thread_stack_size(value);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    pub fn parse_yaml(v: &Yaml) -> anyhow::Result<Self> {
        if let Yaml::Hash(map) = v {
            let mut config = WorkerRuntimeConfig::default();
            fsocks_yaml::foreach_kv(map, |k, v| config.set_by_yaml_kv(k, v))?;
            Ok(config)
        } else {
            Err(anyhow!(
                "yaml value type for 'worker runtime config' should be 'map'"
            ))
        }
    }
}
