/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

pub fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(s) => Ok(usize::from_str(s)?),
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'string' or 'integer'"
        )),
    }
}

pub fn as_nonzero_usize(v: &Yaml) -> anyhow::Result<NonZeroUsize> {
    match v {
        Yaml::String(s) => Ok(NonZeroUsize::from_str(s)?),
        Yaml::Integer(i) => {
            let u = usize::try_from(*i)?;
            Ok(NonZeroUsize::try_from(u)?)
        }
        _ => Err(anyhow!(
            "yaml value type for 'nonzero usize' should be 'string' or 'integer'"
        )),
    }
}

pub fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Real(s) => Ok(s.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' / 'integer' / 'real'"
        )),
    }
}

pub fn as_list<T, F>(v: &Yaml, convert: F) -> anyhow::Result<Vec<T>>
where
    F: Fn(&Yaml) -> anyhow::Result<T>,
{
    match v {
        Yaml::Array(seq) => {
            let mut vec = Vec::with_capacity(seq.len());
            for (i, v) in seq.iter().enumerate() {
                let node = convert(v).context(format!("invalid value for list element #{i}"))?;
                vec.push(node);
            }
            Ok(vec)
        }
        _ => {
            let node = convert(v).context("invalid single value for the list")?;
            Ok(vec![node])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_nonzero_usize() {
        assert_eq!(as_nonzero_usize(&Yaml::Integer(4)).unwrap().get(), 4);
        assert_eq!(
            as_nonzero_usize(&Yaml::String("8".to_string())).unwrap().get(),
            8
        );
        assert!(as_nonzero_usize(&Yaml::Integer(0)).is_err());
        assert!(as_nonzero_usize(&Yaml::Integer(-4)).is_err());
        assert!(as_usize(&Yaml::Integer(0)).is_ok());
    }

    #[test]
    fn t_list() {
        let v = Yaml::Array(vec![Yaml::Integer(1), Yaml::Integer(2)]);
        assert_eq!(as_list(&v, as_usize).unwrap(), vec![1, 2]);

        let v = Yaml::Integer(3);
        assert_eq!(as_list(&v, as_usize).unwrap(), vec![3]);

        let v = Yaml::Array(vec![Yaml::Integer(1), Yaml::Boolean(false)]);
        assert!(as_list(&v, as_usize).is_err());
    }
}
