//! Table creation and buffering configuration.

use serde::Deserialize;

use crate::error::{TableError, TableResult};
use crate::metadata::table::CompressorConfig;

/// Knobs used when sizing chunks and read buffers for tables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Row count assumed for a new table when the caller gives none
    pub expected_rows: usize,
    /// Unit the buffer-size multipliers apply to, in bytes
    pub buffer_unit: usize,
    /// How many chunks make up one I/O buffer
    pub chunk_times: usize,
    /// Compressor for new tables when the caller gives none
    pub default_compressor: Option<CompressorConfig>,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            expected_rows: 10_000,
            buffer_unit: 10_000,
            chunk_times: 4,
            default_compressor: None,
        }
    }
}

impl TablesConfig {
    /// Load from a JSON document; missing keys take their defaults.
    pub fn from_json(json_bytes: &[u8]) -> TableResult<Self> {
        let cfg: TablesConfig = serde_json::from_slice(json_bytes)?;
        if cfg.buffer_unit == 0 || cfg.chunk_times == 0 {
            return Err(TableError::Other(
                "buffer_unit and chunk_times must be > 0".into(),
            ));
        }
        Ok(cfg)
    }
}

/// Per-table settings for [`Location::create_table`](crate::Location::create_table).
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    pub title: String,
    /// Overrides [`TablesConfig::expected_rows`]
    pub expected_rows: Option<usize>,
    /// Overrides [`TablesConfig::default_compressor`]
    pub compressor: Option<CompressorConfig>,
}
