pub mod dtype;
pub mod table;

use std::collections::HashMap;

use crate::error::{TableError, TableResult};
use serde::{Deserialize, Serialize};
use table::TableMetadata;

pub const ZGROUP: &str = ".zgroup";
pub const ZARRAY: &str = ".zarray";
pub const ZATTRS: &str = ".zattrs";
pub const ZMETADATA: &str = ".zmetadata";

pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// GroupMetadata  (.zgroup)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub zarr_format: u32,
}

impl Default for GroupMetadata {
    fn default() -> Self {
        Self { zarr_format: 2 }
    }
}

impl GroupMetadata {
    pub fn parse(json_bytes: &[u8]) -> TableResult<Self> {
        let md: GroupMetadata = serde_json::from_slice(json_bytes)
            .map_err(|e| TableError::Metadata(format!("Invalid .zgroup: {e}")))?;
        if md.zarr_format != 2 {
            return Err(TableError::Metadata(format!(
                "Unsupported group zarr_format {}",
                md.zarr_format
            )));
        }
        Ok(md)
    }
}

/// Parse a `.zattrs` document.
pub fn parse_attributes(json_bytes: &[u8]) -> TableResult<Attributes> {
    let raw: serde_json::Value = serde_json::from_slice(json_bytes)
        .map_err(|e| TableError::Metadata(format!("Invalid .zattrs: {e}")))?;
    match raw {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(TableError::Metadata(".zattrs must be a JSON object".into())),
    }
}

// ---------------------------------------------------------------------------
// Consolidated metadata  (.zmetadata)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConsolidatedMetadata {
    pub zarr_consolidated_format: u32,
    /// Table metadata keyed by path relative to the consolidating group.
    pub tables: HashMap<String, TableMetadata>,
}

impl ConsolidatedMetadata {
    /// Parse consolidated `.zmetadata` JSON, keeping only table entries.
    pub fn parse(json_bytes: &[u8]) -> TableResult<Self> {
        let raw: serde_json::Value = serde_json::from_slice(json_bytes)
            .map_err(|e| TableError::Metadata(format!("Invalid consolidated JSON: {e}")))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| TableError::Metadata("Expected JSON object".into()))?;

        let format = match obj.get("zarr_consolidated_format") {
            None => 1,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    TableError::Metadata(format!("Invalid zarr_consolidated_format: {v}"))
                })?,
        };
        if format != 1 {
            return Err(TableError::Metadata(
                "Metadata is not in zarr-consolidated-v1 format".into(),
            ));
        }

        let metadata_obj = obj
            .get("metadata")
            .and_then(|v| v.as_object())
            .ok_or_else(|| TableError::Metadata("Missing 'metadata' field".into()))?;

        let mut tables = HashMap::new();
        for (key, value) in metadata_obj {
            let Some(name) = key.strip_suffix(ZARRAY) else {
                continue;
            };
            let name = name.trim_end_matches('/').to_string();

            let json_bytes = serde_json::to_vec(value)
                .map_err(|e| TableError::Metadata(format!("Re-serialize: {e}")))?;
            let md = match TableMetadata::parse(&json_bytes) {
                Ok(md) => md,
                Err(e) => {
                    tracing::warn!("Skipping unreadable consolidated entry {key}: {e}");
                    continue;
                }
            };
            if !md.is_table() {
                tracing::debug!("Skipping non-table array {name}");
                continue;
            }
            tables.insert(name, md);
        }

        Ok(ConsolidatedMetadata {
            zarr_consolidated_format: format,
            tables,
        })
    }

    /// Add `entries` (keys relative to the consolidating group) to a raw
    /// `.zmetadata` document, keeping every other entry as it was.
    pub fn insert_entries(
        json_bytes: &[u8],
        entries: &[(String, serde_json::Value)],
    ) -> TableResult<Vec<u8>> {
        let mut raw: serde_json::Value = serde_json::from_slice(json_bytes)
            .map_err(|e| TableError::Metadata(format!("Invalid consolidated JSON: {e}")))?;
        let metadata_obj = raw
            .get_mut("metadata")
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| TableError::Metadata("Missing 'metadata' field".into()))?;
        for (key, value) in entries {
            metadata_obj.insert(key.clone(), value.clone());
        }
        Ok(serde_json::to_vec_pretty(&raw)?)
    }
}
