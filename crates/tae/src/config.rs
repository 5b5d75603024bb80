use std::time::Duration;

use serde::{Deserialize, Serialize};
use tae_compaction::MergeBudget;
use tae_txn::TxnConfig;

use crate::error::{Result, TaeError};

/// The five recognized configuration options. Unknown keys in a TOML
/// document are rejected by `serde`'s default strictness rather than
/// silently ignored, so a typo in an operator's config file surfaces at
/// startup instead of quietly falling back to a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_block_max_rows")]
    pub block_max_rows: u32,
    #[serde(default = "default_object_max_blocks")]
    pub object_max_blocks: u16,
    #[serde(default = "default_wal_max_message_size")]
    pub wal_max_message_size: usize,
    #[serde(default = "default_merge_memory_spare_fraction")]
    pub merge_memory_spare_fraction: f64,
    /// A `humantime`-parseable duration string (e.g. `"24h"`), rather than a
    /// raw integer, so the config file reads the way an operator writes it.
    #[serde(default = "default_transfer_table_ttl")]
    pub transfer_table_ttl: String,
}

fn default_block_max_rows() -> u32 {
    8192
}

fn default_object_max_blocks() -> u16 {
    256
}

fn default_wal_max_message_size() -> usize {
    1 << 20
}

fn default_merge_memory_spare_fraction() -> f64 {
    0.15
}

fn default_transfer_table_ttl() -> String {
    "24h".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_max_rows: default_block_max_rows(),
            object_max_blocks: default_object_max_blocks(),
            wal_max_message_size: default_wal_max_message_size(),
            merge_memory_spare_fraction: default_merge_memory_spare_fraction(),
            transfer_table_ttl: default_transfer_table_ttl(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TaeError::Config(e.to_string()))
    }

    pub fn transfer_table_ttl(&self) -> Result<Duration> {
        humantime::parse_duration(&self.transfer_table_ttl).map_err(|e| TaeError::Config(e.to_string()))
    }

    pub fn txn_config(&self) -> TxnConfig {
        TxnConfig {
            block_max_rows: self.block_max_rows,
            object_max_blocks: self.object_max_blocks,
            wal_max_message_size: self.wal_max_message_size,
        }
    }

    /// Builds a merge budget for one compaction cycle from live resource
    /// readings the caller supplies; this crate has no opinion on how CPU
    /// and memory are sampled.
    pub fn merge_budget(&self, cpu_percent: f64, total_memory_bytes: u64) -> MergeBudget {
        MergeBudget {
            cpu_percent,
            total_memory_bytes,
            spare_fraction: self.merge_memory_spare_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.block_max_rows, 8192);
        assert_eq!(cfg.object_max_blocks, 256);
        assert_eq!(cfg.wal_max_message_size, 1 << 20);
        assert!((cfg.merge_memory_spare_fraction - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_partial_toml_with_defaults_filled_in() {
        let cfg = Config::from_toml_str("block_max_rows = 4096\n").unwrap();
        assert_eq!(cfg.block_max_rows, 4096);
        assert_eq!(cfg.object_max_blocks, 256);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Config::from_toml_str("bogus_option = 1\n").is_err());
    }

    #[test]
    fn transfer_table_ttl_parses_as_duration() {
        let cfg = Config::default();
        assert_eq!(cfg.transfer_table_ttl().unwrap(), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn invalid_duration_string_is_a_config_error() {
        let mut cfg = Config::default();
        cfg.transfer_table_ttl = "not a duration".to_string();
        assert!(cfg.transfer_table_ttl().is_err());
    }
}
