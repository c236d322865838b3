//! Common type definitions.

use serde::{Deserialize, Serialize};

/// Token id as produced by the tokenizer.
pub type TokenId = u32;

/// Name of the token id tensor inside a shard.
pub const INPUT_IDS: &str = "input_ids";

/// Name of the position id tensor inside a shard.
pub const POSITION_IDS: &str = "position_ids";

/// Largest block size whose positions still fit the on-disk `I16` dtype.
pub const MAX_BLOCK_SIZE: usize = i16::MAX as usize + 1;

/// Byte compressor applied to serialized shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Raw snappy blocks.
    #[default]
    Snappy,
    /// Zstandard frames.
    Zstd,
    /// Uncompressed safetensors bytes.
    None,
}

impl Compression {
    /// File name suffix for shards written with this compressor.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Snappy => "safetensor.snappy",
            Self::Zstd => "safetensor.zst",
            Self::None => "safetensor",
        }
    }

    /// Guess the compressor from a shard file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        [Self::Snappy, Self::Zstd, Self::None]
            .into_iter()
            .find(|c| name.ends_with(c.suffix()))
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
            Self::None => "none",
        };
        f.write_str(name)
    }
}
