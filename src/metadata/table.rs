use crate::error::{TableError, TableResult};
use crate::metadata::dtype::Dtype;
use crate::types::ArrayOrder;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// CompressorConfig
// ---------------------------------------------------------------------------

/// The `compressor` object of a `.zarray` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorConfig {
    pub id: String,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl CompressorConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: serde_json::Map::new(),
        }
    }

    pub fn with_level(mut self, level: i64) -> Self {
        self.config.insert("level".into(), serde_json::Value::from(level));
        self
    }
}

// ---------------------------------------------------------------------------
// TableMetadata  (.zarray)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(default = "default_zarr_format")]
    pub zarr_format: u32,

    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: Dtype,

    #[serde(default)]
    pub fill_value: serde_json::Value,

    #[serde(default = "default_order")]
    pub order: ArrayOrder,

    #[serde(default)]
    pub compressor: Option<CompressorConfig>,

    #[serde(default)]
    pub filters: Option<serde_json::Value>,
}

fn default_order() -> ArrayOrder {
    ArrayOrder::C
}

fn default_zarr_format() -> u32 {
    2
}

impl Serialize for ArrayOrder {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArrayOrder::C => serializer.serialize_str("C"),
            ArrayOrder::F => serializer.serialize_str("F"),
        }
    }
}

impl<'de> Deserialize<'de> for ArrayOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "C" | "c" => Ok(ArrayOrder::C),
            "F" | "f" => Ok(ArrayOrder::F),
            _ => Err(serde::de::Error::custom(format!("Unknown order: {s}"))),
        }
    }
}

impl TableMetadata {
    /// Metadata for an empty one-dimensional table.
    pub fn new(dtype: Dtype, chunk_rows: usize, compressor: Option<CompressorConfig>) -> Self {
        Self {
            zarr_format: 2,
            shape: vec![0],
            chunks: vec![chunk_rows.max(1)],
            dtype,
            fill_value: serde_json::Value::Null,
            order: ArrayOrder::C,
            compressor,
            filters: None,
        }
    }

    /// Parse and validate a `.zarray` document.
    pub fn parse(json_bytes: &[u8]) -> TableResult<Self> {
        let md: TableMetadata = serde_json::from_slice(json_bytes)
            .map_err(|e| TableError::Metadata(format!("Metadata parse error: {e}")))?;
        md.validate()?;
        Ok(md)
    }

    pub fn to_json_bytes(&self) -> TableResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn validate(&self) -> TableResult<()> {
        if self.zarr_format != 2 {
            return Err(TableError::Metadata(format!(
                "Unsupported zarr_format {}",
                self.zarr_format
            )));
        }
        if self.shape.len() != self.chunks.len() {
            return Err(TableError::Metadata(format!(
                "shape has {} dimensions but chunks has {}",
                self.shape.len(),
                self.chunks.len()
            )));
        }
        if self.chunks.contains(&0) {
            return Err(TableError::Metadata("chunk sizes must be > 0".into()));
        }
        if self.filters.as_ref().is_some_and(|f| !f.is_null()) {
            return Err(TableError::Unsupported("array filters".into()));
        }
        Ok(())
    }

    /// Whether this array is a table: one-dimensional with a record dtype.
    pub fn is_table(&self) -> bool {
        self.shape.len() == 1 && self.dtype.is_structured()
    }

    pub fn nrows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunks.first().copied().unwrap_or(1)
    }

    /// Storage keys of every chunk holding rows of this table.
    pub fn chunk_keys(&self) -> Vec<String> {
        (0..self.nrows().div_ceil(self.chunk_rows()))
            .map(|i| i.to_string())
            .collect()
    }
}
