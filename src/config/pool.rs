//! Session-slot pool configuration (spec.md §4.6, §6 "pool:").

use serde_derive::{Deserialize, Serialize};

/// Sizing and timing knobs for [`crate::pool`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    #[serde(default = "Pool::default_min_connections")]
    pub min_connections: usize,

    #[serde(default = "Pool::default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "Pool::default_max_idle_connections")]
    pub max_idle_connections: usize,

    #[serde(default = "Pool::default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "Pool::default_acquisition_timeout_ms")]
    pub acquisition_timeout_ms: u64,

    #[serde(default = "Pool::default_validate_connections")]
    pub validate_connections: bool,

    #[serde(default = "Pool::default_validation_interval_ms")]
    pub validation_interval_ms: u64,

    #[serde(default = "Pool::default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Pool {
    pub fn default_min_connections() -> usize {
        5
    }
    pub fn default_max_connections() -> usize {
        50
    }
    pub fn default_max_idle_connections() -> usize {
        10
    }
    pub fn default_idle_timeout_ms() -> u64 {
        300_000
    }
    pub fn default_acquisition_timeout_ms() -> u64 {
        5_000
    }
    pub fn default_validate_connections() -> bool {
        true
    }
    pub fn default_validation_interval_ms() -> u64 {
        60_000
    }
    pub fn default_cleanup_interval_ms() -> u64 {
        30_000
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool {
            min_connections: Pool::default_min_connections(),
            max_connections: Pool::default_max_connections(),
            max_idle_connections: Pool::default_max_idle_connections(),
            idle_timeout_ms: Pool::default_idle_timeout_ms(),
            acquisition_timeout_ms: Pool::default_acquisition_timeout_ms(),
            validate_connections: Pool::default_validate_connections(),
            validation_interval_ms: Pool::default_validation_interval_ms(),
            cleanup_interval_ms: Pool::default_cleanup_interval_ms(),
        }
    }
}
