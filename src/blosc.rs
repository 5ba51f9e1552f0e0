//! Blosc chunks, through the C library bundled by `blosc-src`.

use std::ffi::CStr;

use serde::Deserialize;

use crate::error::{TableError, TableResult};

/// Largest element size blosc shuffles by; wider rows are compressed as bytes.
const MAX_TYPESIZE: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscCname {
    Lz4,
    Lz4hc,
    Blosclz,
    Zstd,
    Snappy,
    Zlib,
}

impl BloscCname {
    fn as_cstr(self) -> &'static CStr {
        match self {
            BloscCname::Lz4 => c"lz4",
            BloscCname::Lz4hc => c"lz4hc",
            BloscCname::Blosclz => c"blosclz",
            BloscCname::Zstd => c"zstd",
            BloscCname::Snappy => c"snappy",
            BloscCname::Zlib => c"zlib",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloscShuffle {
    NoShuffle,
    Shuffle,
    BitShuffle,
}

impl BloscShuffle {
    fn as_int(self) -> i32 {
        match self {
            BloscShuffle::NoShuffle => blosc_src::BLOSC_NOSHUFFLE as i32,
            BloscShuffle::Shuffle => blosc_src::BLOSC_SHUFFLE as i32,
            BloscShuffle::BitShuffle => blosc_src::BLOSC_BITSHUFFLE as i32,
        }
    }
}

impl<'de> Deserialize<'de> for BloscShuffle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        match &v {
            serde_json::Value::String(s) => match s.to_lowercase().as_str() {
                "noshuffle" | "0" => Ok(BloscShuffle::NoShuffle),
                "shuffle" | "1" => Ok(BloscShuffle::Shuffle),
                "bitshuffle" | "2" => Ok(BloscShuffle::BitShuffle),
                other => Err(serde::de::Error::custom(format!(
                    "Unknown blosc shuffle: {other}"
                ))),
            },
            // -1 asks numcodecs to pick; for records wider than a byte that
            // is the byte shuffle.
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(BloscShuffle::NoShuffle),
                Some(1) | Some(-1) => Ok(BloscShuffle::Shuffle),
                Some(2) => Ok(BloscShuffle::BitShuffle),
                _ => Err(serde::de::Error::custom(format!(
                    "Unknown blosc shuffle int: {n}"
                ))),
            },
            _ => Err(serde::de::Error::custom(
                "Expected string or int for blosc shuffle",
            )),
        }
    }
}

/// Settings of a `{"id": "blosc", ...}` compressor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BloscCodec {
    #[serde(default = "default_cname")]
    pub cname: BloscCname,
    #[serde(default = "default_clevel")]
    pub clevel: i32,
    #[serde(default = "default_shuffle")]
    pub shuffle: BloscShuffle,
    #[serde(default)]
    pub blocksize: usize,
    /// Element size used for shuffling; tables set it to their row size.
    #[serde(default = "default_typesize")]
    pub typesize: usize,
}

fn default_cname() -> BloscCname {
    BloscCname::Lz4
}

fn default_clevel() -> i32 {
    5
}

fn default_shuffle() -> BloscShuffle {
    BloscShuffle::Shuffle
}

fn default_typesize() -> usize {
    1
}

impl Default for BloscCodec {
    fn default() -> Self {
        Self {
            cname: default_cname(),
            clevel: default_clevel(),
            shuffle: default_shuffle(),
            blocksize: 0,
            typesize: default_typesize(),
        }
    }
}

impl BloscCodec {
    pub fn from_config(config: &serde_json::Map<String, serde_json::Value>) -> TableResult<Self> {
        let mut codec: BloscCodec = serde_json::from_value(serde_json::Value::Object(config.clone()))
            .map_err(|e| TableError::Unsupported(format!("blosc settings: {e}")))?;
        codec.clevel = codec.clevel.clamp(0, 9);
        Ok(codec)
    }

    pub fn decode(&self, data: &[u8]) -> TableResult<Vec<u8>> {
        let nbytes = validate(data)
            .ok_or_else(|| TableError::Codec("Blosc encoded value is invalid".into()))?;
        if nbytes == 0 {
            return Ok(Vec::new());
        }

        let mut output = vec![0u8; nbytes];
        let result = unsafe {
            blosc_src::blosc_decompress_ctx(
                data.as_ptr().cast(),
                output.as_mut_ptr().cast(),
                output.len(),
                1,
            )
        };
        if result < 0 {
            return Err(TableError::Codec(format!(
                "Blosc decompress returned error code: {result}"
            )));
        }
        Ok(output)
    }

    pub fn encode(&self, data: &[u8]) -> TableResult<Vec<u8>> {
        let typesize = if (1..=MAX_TYPESIZE).contains(&self.typesize) {
            self.typesize
        } else {
            1
        };
        let destsize = data.len() + blosc_src::BLOSC_MAX_OVERHEAD as usize;
        let mut compressed = vec![0u8; destsize];

        let cbytes = unsafe {
            blosc_src::blosc_compress_ctx(
                self.clevel,
                self.shuffle.as_int(),
                typesize,
                data.len(),
                data.as_ptr().cast(),
                compressed.as_mut_ptr().cast(),
                destsize,
                self.cname.as_cstr().as_ptr(),
                self.blocksize,
                1,
            )
        };
        if cbytes <= 0 {
            return Err(TableError::Codec(format!(
                "Blosc compress returned error code: {cbytes}"
            )));
        }
        compressed.truncate(cbytes as usize);
        Ok(compressed)
    }
}

/// Uncompressed size recorded in a blosc header, `None` for a bad buffer.
fn validate(data: &[u8]) -> Option<usize> {
    let mut nbytes: usize = 0;
    let result =
        unsafe { blosc_src::blosc_cbuffer_validate(data.as_ptr().cast(), data.len(), &mut nbytes) };
    if result == 0 { Some(nbytes) } else { None }
}
