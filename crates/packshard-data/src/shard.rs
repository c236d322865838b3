//! Shard encoding, naming and buffered writing.
//!
//! A shard is a safetensors container holding two row-major tensors of shape
//! `[blocks, block_size]`:
//!
//! - `input_ids` as `I32`
//! - `position_ids` as `I16`
//!
//! The serialized bytes are passed through a lossless compressor before they
//! hit the disk. File names encode where a shard came from:
//!
//! ```text
//! train_<partition>_<counter>_<suffix>   full shard from a partition
//! train_<partition>_rest_<suffix>        partition leftover (< slice_size blocks)
//! train_<counter>_<suffix>               full shard assembled by the reslicer
//! ```

use crate::Block;
use packshard_core::{
    Compression, PackShardError, Result, INPUT_IDS, POSITION_IDS,
};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Stacked block tensors in their on-disk dtypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockArray {
    block_size: usize,
    input_ids: Vec<i32>,
    position_ids: Vec<i16>,
}

impl BlockArray {
    /// Create an empty array.
    pub fn new(block_size: usize) -> Self {
        Self::with_capacity(block_size, 0)
    }

    /// Create an empty array with room for `blocks` rows.
    pub fn with_capacity(block_size: usize, blocks: usize) -> Self {
        Self {
            block_size,
            input_ids: Vec::with_capacity(blocks * block_size),
            position_ids: Vec::with_capacity(blocks * block_size),
        }
    }

    /// Build an array from flat row-major buffers.
    pub fn from_parts(
        block_size: usize,
        input_ids: Vec<i32>,
        position_ids: Vec<i16>,
    ) -> Result<Self> {
        if block_size == 0
            || input_ids.len() % block_size != 0
            || input_ids.len() != position_ids.len()
        {
            return Err(PackShardError::ShapeMismatch {
                expected: vec![input_ids.len() / block_size.max(1), block_size],
                actual: vec![position_ids.len()],
            });
        }
        Ok(Self {
            block_size,
            input_ids,
            position_ids,
        })
    }

    /// Number of blocks (rows).
    pub fn len(&self) -> usize {
        self.input_ids.len() / self.block_size
    }

    /// Whether the array holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Row width.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Tensor shape `[blocks, block_size]`.
    pub fn shape(&self) -> Vec<usize> {
        vec![self.len(), self.block_size]
    }

    /// Flat token ids.
    pub fn input_ids(&self) -> &[i32] {
        &self.input_ids
    }

    /// Flat position ids.
    pub fn position_ids(&self) -> &[i16] {
        &self.position_ids
    }

    /// One block as `(input_ids, position_ids)`.
    pub fn row(&self, index: usize) -> Option<(&[i32], &[i16])> {
        if index >= self.len() {
            return None;
        }
        let range = index * self.block_size..(index + 1) * self.block_size;
        Some((&self.input_ids[range.clone()], &self.position_ids[range]))
    }

    /// Append a packed block, converting ids to the on-disk dtypes.
    pub fn push_block(&mut self, block: &Block) -> Result<()> {
        if block.input_ids.len() != self.block_size || block.position_ids.len() != self.block_size {
            return Err(PackShardError::ShapeMismatch {
                expected: vec![self.block_size],
                actual: vec![block.input_ids.len()],
            });
        }

        let ids = block
            .input_ids
            .iter()
            .map(|&id| {
                i32::try_from(id).map_err(|_| PackShardError::TokenOutOfRange {
                    value: u64::from(id),
                    dtype: "I32",
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let positions = block
            .position_ids
            .iter()
            .map(|&pos| {
                i16::try_from(pos).map_err(|_| PackShardError::TokenOutOfRange {
                    value: u64::from(pos),
                    dtype: "I16",
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.input_ids.extend(ids);
        self.position_ids.extend(positions);
        Ok(())
    }

    /// Move every block of `other` to the end of `self`.
    pub fn append(&mut self, other: &mut BlockArray) -> Result<()> {
        if other.block_size != self.block_size {
            return Err(PackShardError::ShapeMismatch {
                expected: vec![other.len(), self.block_size],
                actual: other.shape(),
            });
        }
        self.input_ids.append(&mut other.input_ids);
        self.position_ids.append(&mut other.position_ids);
        Ok(())
    }

    /// Concatenate arrays along the block axis.
    pub fn concat(block_size: usize, parts: Vec<BlockArray>) -> Result<BlockArray> {
        let blocks = parts.iter().map(BlockArray::len).sum();
        let mut out = BlockArray::with_capacity(block_size, blocks);
        for mut part in parts {
            out.append(&mut part)?;
        }
        Ok(out)
    }

    /// Split at block `at`; `self` keeps `[0, at)` and the tail is returned.
    pub fn split_off(&mut self, at: usize) -> BlockArray {
        let at = at.min(self.len()) * self.block_size;
        BlockArray {
            block_size: self.block_size,
            input_ids: self.input_ids.split_off(at),
            position_ids: self.position_ids.split_off(at),
        }
    }

    /// Drop every block, keeping the allocation.
    pub fn clear(&mut self) {
        self.input_ids.clear();
        self.position_ids.clear();
    }
}

/// Shard file identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardName {
    /// `train_<partition>_<counter>`
    Full {
        /// Partition id.
        partition: usize,
        /// Shard ordinal within the partition.
        counter: usize,
    },
    /// `train_<partition>_rest`
    Rest {
        /// Partition id.
        partition: usize,
    },
    /// `train_<counter>`
    Resliced {
        /// Global reslicer ordinal.
        counter: usize,
    },
}

impl ShardName {
    /// File name for this shard under the given compressor.
    pub fn file_name(&self, compression: Compression) -> String {
        let suffix = compression.suffix();
        match self {
            Self::Full { partition, counter } => format!("train_{partition}_{counter}_{suffix}"),
            Self::Rest { partition } => format!("train_{partition}_rest_{suffix}"),
            Self::Resliced { counter } => format!("train_{counter}_{suffix}"),
        }
    }
}

/// Compress serialized shard bytes.
pub fn compress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(bytes)
            .map_err(|e| PackShardError::Compression(e.to_string())),
        Compression::Zstd => zstd::stream::encode_all(bytes, 0)
            .map_err(|e| PackShardError::Compression(e.to_string())),
        Compression::None => Ok(bytes.to_vec()),
    }
}

/// Reverse [`compress`].
pub fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(bytes)
            .map_err(|e| PackShardError::Compression(e.to_string())),
        Compression::Zstd => {
            zstd::stream::decode_all(bytes).map_err(|e| PackShardError::Compression(e.to_string()))
        }
        Compression::None => Ok(bytes.to_vec()),
    }
}

/// Serialize and compress a block array.
pub fn encode_shard(array: &BlockArray, compression: Compression) -> Result<Vec<u8>> {
    let shape = array.shape();
    let id_bytes: Vec<u8> = array.input_ids.iter().flat_map(|v| v.to_le_bytes()).collect();
    let pos_bytes: Vec<u8> = array.position_ids.iter().flat_map(|v| v.to_le_bytes()).collect();

    let tensors = vec![
        (INPUT_IDS, TensorView::new(Dtype::I32, shape.clone(), &id_bytes)?),
        (POSITION_IDS, TensorView::new(Dtype::I16, shape, &pos_bytes)?),
    ];
    let metadata = HashMap::from([
        ("format".to_string(), "pt".to_string()),
        ("block_size".to_string(), array.block_size.to_string()),
    ]);

    let raw = safetensors::serialize(tensors, &Some(metadata))?;
    compress(&raw, compression)
}

fn tensor<'a>(tensors: &'a SafeTensors<'a>, name: &str, dtype: Dtype) -> Result<TensorView<'a>> {
    let view = tensors
        .tensor(name)
        .map_err(|_| PackShardError::MissingTensor(name.to_string()))?;
    if view.dtype() != dtype {
        return Err(PackShardError::DtypeMismatch {
            tensor: name.to_string(),
            expected: format!("{dtype:?}"),
            actual: format!("{:?}", view.dtype()),
        });
    }
    if view.shape().len() != 2 {
        return Err(PackShardError::ShapeMismatch {
            expected: vec![0, 0],
            actual: view.shape().to_vec(),
        });
    }
    Ok(view)
}

/// Decompress and deserialize a shard.
pub fn decode_shard(bytes: &[u8], compression: Compression) -> Result<BlockArray> {
    let raw = decompress(bytes, compression)?;
    let tensors = SafeTensors::deserialize(&raw)?;

    let ids = tensor(&tensors, INPUT_IDS, Dtype::I32)?;
    let positions = tensor(&tensors, POSITION_IDS, Dtype::I16)?;
    if ids.shape() != positions.shape() {
        return Err(PackShardError::ShapeMismatch {
            expected: ids.shape().to_vec(),
            actual: positions.shape().to_vec(),
        });
    }

    // The payload is not guaranteed to be aligned, so decode element-wise.
    let input_ids = ids
        .data()
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let position_ids = positions
        .data()
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    BlockArray::from_parts(ids.shape()[1], input_ids, position_ids)
}

/// Encode `array` and write it as `dir/<name>`.
pub fn write_shard(
    dir: &Path,
    name: ShardName,
    array: &BlockArray,
    compression: Compression,
) -> Result<PathBuf> {
    let path = dir.join(name.file_name(compression));
    let bytes = encode_shard(array, compression)?;
    std::fs::write(&path, bytes)?;
    tracing::debug!(path = %path.display(), blocks = array.len(), "wrote shard");
    Ok(path)
}

/// Read a shard, picking the decompressor from its file name.
pub fn read_shard(path: &Path) -> Result<BlockArray> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let compression = Compression::from_file_name(name).ok_or_else(|| {
        PackShardError::Compression(format!("unrecognized shard suffix: {}", path.display()))
    })?;
    let bytes = std::fs::read(path)?;
    decode_shard(&bytes, compression)
}

/// Buffers packed blocks and flushes them as fixed-size shards.
///
/// Every `slice_size` blocks a `train_<partition>_<counter>` shard is written;
/// [`ShardWriter::finish`] writes whatever is left as
/// `train_<partition>_rest`.
#[derive(Debug)]
pub struct ShardWriter {
    dir: PathBuf,
    partition: usize,
    slice_size: usize,
    compression: Compression,
    counter: usize,
    buffer: BlockArray,
    written: Vec<PathBuf>,
}

impl ShardWriter {
    /// Create a writer for one partition; both sizes must be positive.
    pub fn new(
        dir: impl Into<PathBuf>,
        partition: usize,
        block_size: usize,
        slice_size: usize,
        compression: Compression,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(PackShardError::Config("block_size must be positive".into()));
        }
        if slice_size == 0 {
            return Err(PackShardError::Config("slice_size must be positive".into()));
        }
        Ok(Self {
            dir: dir.into(),
            partition,
            slice_size,
            compression,
            counter: 0,
            buffer: BlockArray::with_capacity(block_size, slice_size),
            written: Vec::new(),
        })
    }

    /// Buffer one block, flushing a full shard when the buffer fills.
    pub fn push(&mut self, block: &Block) -> Result<Option<PathBuf>> {
        self.buffer.push_block(block)?;
        if self.buffer.len() < self.slice_size {
            return Ok(None);
        }

        let name = ShardName::Full {
            partition: self.partition,
            counter: self.counter,
        };
        let path = write_shard(&self.dir, name, &self.buffer, self.compression)?;
        self.counter += 1;
        self.buffer.clear();
        self.written.push(path.clone());
        Ok(Some(path))
    }

    /// Buffer every block in order.
    pub fn push_all(&mut self, blocks: &[Block]) -> Result<()> {
        for block in blocks {
            self.push(block)?;
        }
        Ok(())
    }

    /// Number of full shards written so far.
    pub fn full_shards(&self) -> usize {
        self.counter
    }

    /// Blocks waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flush the remainder as a rest shard.
    ///
    /// Returns every path written by this writer and the rest shard path, if
    /// one was needed.
    pub fn finish(mut self) -> Result<(Vec<PathBuf>, Option<PathBuf>)> {
        if self.buffer.is_empty() {
            return Ok((self.written, None));
        }
        let name = ShardName::Rest {
            partition: self.partition,
        };
        let path = write_shard(&self.dir, name, &self.buffer, self.compression)?;
        self.written.push(path.clone());
        Ok((self.written, Some(path)))
    }
}
