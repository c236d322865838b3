//! Consolidation of partition leftovers into full shards.
//!
//! Every partition ends with a `rest` shard holding fewer than `slice_size`
//! blocks. After all partitions are done the reslicer folds those leftovers,
//! one file at a time, into a rolling buffer and cuts full
//! `train_<counter>` shards from it. A leftover file is deleted only after its
//! blocks were folded in and every full shard they completed was written, so
//! a crash can duplicate blocks but never lose them. The final sub-slice
//! remainder is dropped.

use crate::shard::{read_shard, write_shard, BlockArray, ShardName};
use packshard_core::{Compression, PackShardError, Result};
use std::path::{Path, PathBuf};

/// Outcome of one reslice pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResliceReport {
    /// Full shards written.
    pub shards_written: usize,
    /// Blocks read from leftover files.
    pub blocks_read: usize,
    /// Blocks written into full shards.
    pub blocks_written: usize,
    /// Blocks discarded at the end of the pass.
    pub dropped_blocks: usize,
    /// Leftover files deleted.
    pub files_consumed: usize,
    /// Paths of the shards written.
    pub outputs: Vec<PathBuf>,
}

/// Folds leftover shards into full `slice_size` shards.
#[derive(Debug)]
pub struct Reslicer {
    dir: PathBuf,
    slice_size: usize,
    compression: Compression,
    counter: usize,
    block_size: Option<usize>,
    buffer: Vec<BlockArray>,
    buffered: usize,
}

impl Reslicer {
    /// Create a reslicer writing into `dir`; `slice_size` must be positive.
    pub fn new(
        dir: impl Into<PathBuf>,
        slice_size: usize,
        compression: Compression,
    ) -> Result<Self> {
        if slice_size == 0 {
            return Err(PackShardError::Config("slice_size must be positive".into()));
        }
        Ok(Self {
            dir: dir.into(),
            slice_size,
            compression,
            counter: 0,
            block_size: None,
            buffer: Vec::new(),
            buffered: 0,
        })
    }

    /// Start numbering output shards at `counter`.
    pub fn with_start_counter(mut self, counter: usize) -> Self {
        self.counter = counter;
        self
    }

    fn emit_full_shards(&mut self, report: &mut ResliceReport) -> Result<()> {
        while self.buffered >= self.slice_size {
            let Some(block_size) = self.block_size else {
                break;
            };
            let mut joined = BlockArray::concat(block_size, std::mem::take(&mut self.buffer))?;
            let remainder = joined.split_off(self.slice_size);

            let name = ShardName::Resliced {
                counter: self.counter,
            };
            let path = write_shard(&self.dir, name, &joined, self.compression)?;
            tracing::debug!(path = %path.display(), "resliced shard written");
            self.counter += 1;

            report.shards_written += 1;
            report.blocks_written += joined.len();
            report.outputs.push(path);

            self.buffered = remainder.len();
            if !remainder.is_empty() {
                self.buffer.push(remainder);
            }
        }
        Ok(())
    }

    /// Consume leftover shards in the given order.
    pub fn reslice(mut self, leftovers: Vec<PathBuf>) -> Result<ResliceReport> {
        let mut report = ResliceReport::default();
        let total = leftovers.len();

        for (done, path) in leftovers.into_iter().enumerate() {
            let array = read_shard(&path)?;
            // Every shard of one pass must share the first shard's block size.
            match self.block_size {
                Some(block_size) if array.block_size() != block_size => {
                    return Err(PackShardError::ShapeMismatch {
                        expected: vec![array.len(), block_size],
                        actual: array.shape(),
                    });
                }
                Some(_) => {}
                None => self.block_size = Some(array.block_size()),
            }

            report.blocks_read += array.len();
            self.buffered += array.len();
            if !array.is_empty() {
                self.buffer.push(array);
            }

            self.emit_full_shards(&mut report)?;

            std::fs::remove_file(&path)?;
            report.files_consumed += 1;
            tracing::info!(
                remaining = total - done - 1,
                buffered = self.buffered,
                "folded {}",
                path.display()
            );
        }

        report.dropped_blocks = self.buffered;
        if report.dropped_blocks > 0 {
            tracing::warn!(
                dropped = report.dropped_blocks,
                slice_size = self.slice_size,
                "dropping reslice remainder smaller than one shard"
            );
        }

        Ok(report)
    }
}

/// Leftover shards in `dir`: every file whose name contains `rest`, sorted.
pub fn discover_rest_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().contains("rest") {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// First `train_<counter>` index not yet used in `dir`.
pub fn next_resliced_counter(dir: &Path) -> Result<usize> {
    let mut next = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name.strip_prefix("train_") else {
            continue;
        };
        let Some(suffix_at) = stem.find('_') else {
            continue;
        };
        let (counter, suffix) = stem.split_at(suffix_at);
        // Resliced shards have exactly one number before the compressor suffix.
        if Compression::from_file_name(&name).map(|c| c.suffix()) != Some(&suffix[1..]) {
            continue;
        }
        if let Ok(counter) = counter.parse::<usize>() {
            next = next.max(counter + 1);
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, BlockMember};

    const BLOCK: usize = 4;

    fn leftover(dir: &Path, partition: usize, blocks: usize, first: i32) -> PathBuf {
        let mut array = BlockArray::new(BLOCK);
        for i in 0..blocks {
            let fill = (first + i as i32) as u32;
            array
                .push_block(&Block {
                    input_ids: vec![fill; BLOCK],
                    position_ids: (0..BLOCK as u32).collect(),
                    members: vec![BlockMember {
                        source_index: i,
                        piece: 0,
                        length: BLOCK,
                    }],
                })
                .unwrap();
        }
        write_shard(dir, ShardName::Rest { partition }, &array, Compression::Snappy).unwrap()
    }

    fn first_ids(path: &Path) -> Vec<i32> {
        let array = read_shard(path).unwrap();
        (0..array.len()).map(|i| array.row(i).unwrap().0[0]).collect()
    }

    #[test]
    fn test_leftovers_fill_exact_shards() {
        let dir = tempfile::tempdir().unwrap();
        let a = leftover(dir.path(), 0, 4, 100);
        let b = leftover(dir.path(), 8750, 5, 200);

        let report = Reslicer::new(dir.path(), 3, Compression::Snappy)
            .unwrap()
            .reslice(vec![a.clone(), b.clone()])
            .unwrap();

        assert_eq!(report.shards_written, 3);
        assert_eq!(report.blocks_read, 9);
        assert_eq!(report.blocks_written, 9);
        assert_eq!(report.dropped_blocks, 0);
        assert_eq!(report.files_consumed, 2);
        assert!(!a.exists());
        assert!(!b.exists());

        assert_eq!(first_ids(&dir.path().join("train_0_safetensor.snappy")), vec![100, 101, 102]);
        assert_eq!(first_ids(&dir.path().join("train_1_safetensor.snappy")), vec![103, 200, 201]);
        assert_eq!(first_ids(&dir.path().join("train_2_safetensor.snappy")), vec![202, 203, 204]);
    }

    #[test]
    fn test_remainder_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let a = leftover(dir.path(), 0, 2, 1);
        let b = leftover(dir.path(), 10, 2, 10);

        let report = Reslicer::new(dir.path(), 3, Compression::Snappy)
            .unwrap()
            .reslice(vec![a, b])
            .unwrap();

        assert_eq!(report.shards_written, 1);
        assert_eq!(report.dropped_blocks, 1);
        assert_eq!(report.blocks_read, report.blocks_written + report.dropped_blocks);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_large_leftover_emits_several_shards() {
        let dir = tempfile::tempdir().unwrap();
        let a = leftover(dir.path(), 0, 7, 0);

        let report = Reslicer::new(dir.path(), 3, Compression::Snappy)
            .unwrap()
            .with_start_counter(5)
            .reslice(vec![a])
            .unwrap();

        assert_eq!(report.shards_written, 2);
        assert_eq!(report.dropped_blocks, 1);
        assert!(dir.path().join("train_5_safetensor.snappy").exists());
        assert!(dir.path().join("train_6_safetensor.snappy").exists());
    }

    #[test]
    fn test_block_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let a = leftover(dir.path(), 0, 1, 0);

        let mut wide = BlockArray::new(BLOCK * 2);
        wide.push_block(&Block {
            input_ids: vec![1; BLOCK * 2],
            position_ids: vec![0; BLOCK * 2],
            members: Vec::new(),
        })
        .unwrap();
        let b = write_shard(
            dir.path(),
            ShardName::Rest { partition: 9 },
            &wide,
            Compression::Snappy,
        )
        .unwrap();

        let err = Reslicer::new(dir.path(), 3, Compression::Snappy)
            .unwrap()
            .reslice(vec![a, b.clone()])
            .unwrap_err();
        assert!(matches!(err, PackShardError::ShapeMismatch { .. }));
        assert!(b.exists());
    }

    #[test]
    fn test_zero_slice_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Reslicer::new(dir.path(), 0, Compression::Snappy).unwrap_err();
        assert!(matches!(err, PackShardError::Config(_)));
    }

    #[test]
    fn test_failed_write_keeps_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let a = leftover(dir.path(), 0, 2, 0);
        // A regular file where the output directory should be.
        let blocked = dir.path().join("out");
        std::fs::write(&blocked, b"").unwrap();

        let err = Reslicer::new(&blocked, 1, Compression::Snappy)
            .unwrap()
            .reslice(vec![a.clone()])
            .unwrap_err();
        assert!(matches!(err, PackShardError::Io(_)));
        assert!(a.exists());
        assert_eq!(read_shard(&a).unwrap().len(), 2);
    }

    #[test]
    fn test_discover_rest_shards() {
        let dir = tempfile::tempdir().unwrap();
        leftover(dir.path(), 20, 1, 0);
        leftover(dir.path(), 0, 1, 0);
        std::fs::write(dir.path().join("train_0_0_safetensor.snappy"), b"").unwrap();
        std::fs::create_dir(dir.path().join("rest_dir")).unwrap();

        let found = discover_rest_shards(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["train_0_rest_safetensor.snappy", "train_20_rest_safetensor.snappy"]
        );
    }

    #[test]
    fn test_next_resliced_counter() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_resliced_counter(dir.path()).unwrap(), 0);

        for name in [
            "train_0_safetensor.snappy",
            "train_3_safetensor.zst",
            "train_40_7_safetensor.snappy",
            "train_12_rest_safetensor.snappy",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(next_resliced_counter(dir.path()).unwrap(), 4);
    }
}
