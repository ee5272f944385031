//! # Config - Environment-Driven Settings
//!
//! All settings are read from environment variables with defaults:
//!
//! ```text
//! SMB_DATA_DIR             dataset root directory          (default: "data")
//! SMB_NUM_BUCKETS          buckets per written dataset     (default: 4, power of two)
//! SMB_NUM_SHARDS           shards per bucket               (default: 1)
//! SMB_HASH                 xxh3 | crc32                    (default: "xxh3")
//! SMB_KEY_TYPE             bytes | string | int64 | uint64 (default: "string")
//! SMB_KEY_ORDER            ascending | descending          (default: "ascending")
//! SMB_FORMAT               kv | json                       (default: "kv")
//! SMB_SORT_BUFFER_RECORDS  records buffered before spill   (default: 100000)
//! SMB_LOG                  tracing filter directive        (default: "warn")
//! ```
//!
//! Values are validated here, so a bad setting fails at startup with the name
//! of the offending variable rather than later inside a write run.

use fileops::FormatKind;
use metadata::{HashType, KeyOrder, KeyType};
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_DATA_DIR: &str = "SMB_DATA_DIR";
pub const ENV_NUM_BUCKETS: &str = "SMB_NUM_BUCKETS";
pub const ENV_NUM_SHARDS: &str = "SMB_NUM_SHARDS";
pub const ENV_HASH: &str = "SMB_HASH";
pub const ENV_KEY_TYPE: &str = "SMB_KEY_TYPE";
pub const ENV_KEY_ORDER: &str = "SMB_KEY_ORDER";
pub const ENV_FORMAT: &str = "SMB_FORMAT";
pub const ENV_SORT_BUFFER_RECORDS: &str = "SMB_SORT_BUFFER_RECORDS";
pub const ENV_LOG: &str = "SMB_LOG";

/// Default number of records a sort buffer holds before spilling a run.
pub const DEFAULT_SORT_BUFFER_RECORDS: usize = 100_000;

/// A setting that could not be parsed or failed validation.
#[derive(Debug, Error)]
#[error("invalid value `{value}` for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Validated process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub num_buckets: u32,
    pub num_shards: u32,
    pub hash_type: HashType,
    pub key_type: KeyType,
    pub key_order: KeyOrder,
    pub format: FormatKind,
    pub sort_buffer_records: usize,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            num_buckets: 4,
            num_shards: 1,
            hash_type: HashType::default(),
            key_type: KeyType::String,
            key_order: KeyOrder::default(),
            format: FormatKind::default(),
            sort_buffer_records: DEFAULT_SORT_BUFFER_RECORDS,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let num_buckets = parse_var(&lookup, ENV_NUM_BUCKETS, defaults.num_buckets)?;
        if !num_buckets.is_power_of_two() {
            return Err(invalid(ENV_NUM_BUCKETS, num_buckets, "must be a power of two >= 1"));
        }
        let num_shards = parse_var(&lookup, ENV_NUM_SHARDS, defaults.num_shards)?;
        if num_shards == 0 {
            return Err(invalid(ENV_NUM_SHARDS, num_shards, "must be >= 1"));
        }
        let sort_buffer_records =
            parse_var(&lookup, ENV_SORT_BUFFER_RECORDS, defaults.sort_buffer_records)?;
        if sort_buffer_records == 0 {
            return Err(invalid(ENV_SORT_BUFFER_RECORDS, sort_buffer_records, "must be >= 1"));
        }

        // Kv keys are raw bytes and cannot be read as integers.
        let key_type = parse_var(&lookup, ENV_KEY_TYPE, defaults.key_type)?;
        let format = parse_var(&lookup, ENV_FORMAT, defaults.format)?;
        if format == FormatKind::Kv && matches!(key_type, KeyType::Int64 | KeyType::UInt64) {
            return Err(invalid(
                ENV_KEY_TYPE,
                key_type,
                "the kv format only supports bytes or string keys",
            ));
        }

        Ok(Self {
            data_dir: lookup(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            num_buckets,
            num_shards,
            hash_type: parse_var(&lookup, ENV_HASH, defaults.hash_type)?,
            key_type,
            key_order: parse_var(&lookup, ENV_KEY_ORDER, defaults.key_order)?,
            format,
            sort_buffer_records,
            log_filter: lookup(ENV_LOG).unwrap_or(defaults.log_filter),
        })
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn reads_typed_values() {
        let cfg = Config::from_lookup(lookup_from(&[
            (ENV_DATA_DIR, "/tmp/smb"),
            (ENV_NUM_BUCKETS, "16"),
            (ENV_NUM_SHARDS, "3"),
            (ENV_HASH, "crc32"),
            (ENV_KEY_TYPE, "int64"),
            (ENV_KEY_ORDER, "desc"),
            (ENV_FORMAT, "json"),
            (ENV_SORT_BUFFER_RECORDS, "10"),
            (ENV_LOG, "debug"),
        ]))
        .unwrap();

        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/smb"));
        assert_eq!(cfg.num_buckets, 16);
        assert_eq!(cfg.num_shards, 3);
        assert_eq!(cfg.hash_type, HashType::Crc32);
        assert_eq!(cfg.key_type, KeyType::Int64);
        assert_eq!(cfg.key_order, KeyOrder::Descending);
        assert_eq!(cfg.format, FormatKind::Json);
        assert_eq!(cfg.sort_buffer_records, 10);
        assert_eq!(cfg.log_filter, "debug");
    }

    #[test]
    fn rejects_non_power_of_two_buckets() {
        let err = Config::from_lookup(lookup_from(&[(ENV_NUM_BUCKETS, "6")])).unwrap_err();
        assert_eq!(err.var, ENV_NUM_BUCKETS);
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let err = Config::from_lookup(lookup_from(&[(ENV_NUM_SHARDS, "many")])).unwrap_err();
        assert_eq!(err.var, ENV_NUM_SHARDS);
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn rejects_integer_keys_for_kv_format() {
        for key_type in ["int64", "uint64"] {
            let err = Config::from_lookup(lookup_from(&[(ENV_FORMAT, "kv"), (ENV_KEY_TYPE, key_type)]))
                .unwrap_err();
            assert_eq!(err.var, ENV_KEY_TYPE);
            assert_eq!(err.value, key_type);
        }
        let cfg = Config::from_lookup(lookup_from(&[(ENV_KEY_TYPE, "bytes")])).unwrap();
        assert_eq!(cfg.format, FormatKind::Kv);
    }

    #[test]
    fn rejects_unknown_hash() {
        let err = Config::from_lookup(lookup_from(&[(ENV_HASH, "md5")])).unwrap_err();
        assert_eq!(err.var, ENV_HASH);
    }
}
