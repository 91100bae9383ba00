/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

/// Visit every entry of a config map.
///
/// Keys are passed in lower case with `-` replaced by `_`, so `Flush-Batch` and `flush_batch`
/// reach the callback as the same key.
pub fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table {
        let Yaml::String(raw) = k else {
            return Err(anyhow!("config map key {k:?} is not a string"));
        };
        let key = raw.to_lowercase().replace('-', "_");
        f(&key, v).context(format!("invalid value for config key {raw}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn collect_keys(s: &str) -> anyhow::Result<Vec<String>> {
        let docs = YamlLoader::load_from_str(s).unwrap();
        let mut keys = Vec::new();
        foreach_kv(docs[0].as_hash().unwrap(), |k, _| {
            keys.push(k.to_string());
            Ok(())
        })?;
        Ok(keys)
    }

    #[test]
    fn normalized_keys() {
        let keys = collect_keys("Worker-Number: 4\nFLUSH_BATCH: 8\nsession-poll_wait: 1ms").unwrap();
        assert_eq!(keys, ["worker_number", "flush_batch", "session_poll_wait"]);
    }

    #[test]
    fn non_string_key() {
        assert!(collect_keys("123: 1").is_err());
    }

    #[test]
    fn callback_error() {
        let docs = YamlLoader::load_from_str("a: 1").unwrap();
        let r = foreach_kv(docs[0].as_hash().unwrap(), |k, _| Err(anyhow!("bad {k}")));
        let e = r.unwrap_err();
        assert_eq!(e.to_string(), "invalid value for config key a");
    }
}
