use crate::blosc::BloscCodec;
use crate::error::{TableError, TableResult};
use crate::metadata::table::CompressorConfig;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use std::io::Read;

const LZ4_SIZE_PREFIX_BYTES: usize = 4;

/// Chunk compressor resolved from a `.zarray` `compressor` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    None,
    Gzip { level: u32 },
    Zlib { level: u32 },
    Zstd { level: i32 },
    Lz4,
    Blosc(BloscCodec),
}

impl Compressor {
    pub fn from_config(comp: Option<&CompressorConfig>) -> TableResult<Self> {
        let Some(comp) = comp else {
            return Ok(Compressor::None);
        };
        match comp.id.to_lowercase().as_str() {
            "gzip" => Ok(Compressor::Gzip {
                level: (get_config_int(comp, "level").unwrap_or(5).clamp(0, 9)) as u32,
            }),
            "zlib" => Ok(Compressor::Zlib {
                level: (get_config_int(comp, "level").unwrap_or(1).clamp(0, 9)) as u32,
            }),
            "zstd" => Ok(Compressor::Zstd {
                level: get_config_int(comp, "level").unwrap_or(5).clamp(-7, 22) as i32,
            }),
            "lz4" => Ok(Compressor::Lz4),
            "blosc" => BloscCodec::from_config(&comp.config).map(Compressor::Blosc),
            other => Err(TableError::Unsupported(format!("compressor '{other}'"))),
        }
    }

    pub fn decode(&self, data: &[u8]) -> TableResult<Vec<u8>> {
        match self {
            Compressor::None => Ok(data.to_vec()),
            Compressor::Gzip { .. } => read_all(GzDecoder::new(data), "Gzip decompress"),
            Compressor::Zlib { .. } => read_all(ZlibDecoder::new(data), "Zlib decompress"),
            Compressor::Zstd { .. } => zstd::stream::decode_all(data)
                .map_err(|e| TableError::Codec(format!("Zstd decompress failed: {e}"))),
            Compressor::Lz4 => lz4_decode(data),
            Compressor::Blosc(codec) => codec.decode(data),
        }
    }

    pub fn encode(&self, data: &[u8]) -> TableResult<Vec<u8>> {
        match self {
            Compressor::None => Ok(data.to_vec()),
            Compressor::Gzip { level } => {
                read_all(GzEncoder::new(data, Compression::new(*level)), "Gzip compress")
            }
            Compressor::Zlib { level } => {
                read_all(ZlibEncoder::new(data, Compression::new(*level)), "Zlib compress")
            }
            Compressor::Zstd { level } => zstd::stream::encode_all(data, *level)
                .map_err(|e| TableError::Codec(format!("Zstd compress failed: {e}"))),
            Compressor::Lz4 => {
                let orig_size = u32::try_from(data.len()).map_err(|_| {
                    TableError::Codec(format!("LZ4 chunk too large: {} bytes", data.len()))
                })?;
                let compressed = lz4_flex::block::compress(data);
                let mut out = Vec::with_capacity(LZ4_SIZE_PREFIX_BYTES + compressed.len());
                out.extend_from_slice(&orig_size.to_le_bytes());
                out.extend_from_slice(&compressed);
                Ok(out)
            }
            Compressor::Blosc(codec) => codec.encode(data),
        }
    }

    /// Element size blosc shuffles by; other compressors ignore it.
    pub fn with_typesize(self, typesize: usize) -> Self {
        match self {
            Compressor::Blosc(codec) => Compressor::Blosc(BloscCodec { typesize, ..codec }),
            other => other,
        }
    }
}

fn read_all<R: Read>(mut reader: R, what: &str) -> TableResult<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| TableError::Codec(format!("{what} failed: {e}")))?;
    Ok(out)
}

/// Decode an LZ4 block with the numcodecs 4-byte little-endian size prefix.
fn lz4_decode(data: &[u8]) -> TableResult<Vec<u8>> {
    if data.len() < LZ4_SIZE_PREFIX_BYTES {
        return Err(TableError::Codec(
            "LZ4 decode: compressed buffer missing 4-byte size prefix".into(),
        ));
    }
    let (prefix, payload) = data.split_at(LZ4_SIZE_PREFIX_BYTES);
    let mut size = [0u8; LZ4_SIZE_PREFIX_BYTES];
    size.copy_from_slice(prefix);
    let dest_size = u32::from_le_bytes(size) as usize;

    let decompressed = lz4_flex::block::decompress(payload, dest_size)
        .map_err(|e| TableError::Codec(format!("LZ4 decompress failed: {e}")))?;
    if decompressed.len() != dest_size {
        return Err(TableError::Codec(format!(
            "LZ4 decompression error: expected {dest_size} bytes, got {}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

fn get_config_int(comp: &CompressorConfig, key: &str) -> Option<i64> {
    comp.config.get(key).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
    })
}
