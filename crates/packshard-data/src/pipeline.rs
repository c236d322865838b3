//! End-to-end preprocessing: partition, tokenize, split, pack, shard, reslice.
//!
//! The dataset is cut into contiguous partitions of `batch_size` samples.
//! Each partition is handled by exactly one worker of a rayon pool and owns
//! its shard names (`train_<partition>_*`), so workers share no mutable
//! state. Once every partition is done the leftover shards are folded by the
//! [`Reslicer`].

use crate::reslicer::{next_resliced_counter, ResliceReport, Reslicer};
use crate::{BlockPacker, PackingStats, SequenceSplitter, ShardWriter, TextDataset};
use packshard_core::{OutputConfig, PackShardError, PackingConfig, Result, TokenSource};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// A contiguous range of source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Identifier used in shard names: the first sample index.
    pub id: usize,
    /// First sample index.
    pub start: usize,
    /// One past the last sample index.
    pub end: usize,
}

impl Partition {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the partition holds no samples.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Split `[0, total)` into consecutive partitions of at most `batch_size`.
pub fn plan_partitions(total: usize, batch_size: usize) -> Vec<Partition> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| Partition {
            id: start,
            start,
            end: (start + batch_size).min(total),
        })
        .collect()
}

/// What one partition produced.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    /// Partition processed.
    pub partition: Partition,
    /// Pieces handed to the packer.
    pub sequences: usize,
    /// Sources that lost a tail to splitting.
    pub truncated_sources: usize,
    /// Tokens lost with those tails.
    pub dropped_tokens: usize,
    /// Full shards written.
    pub full_shards: usize,
    /// Leftover shard, if the block count was not a multiple of the slice.
    pub rest_shard: Option<PathBuf>,
    /// Block occupancy.
    pub stats: PackingStats,
}

/// Tokenize, split, pack and write one partition.
pub fn process_partition<S: TokenSource + ?Sized>(
    source: &S,
    texts: &[String],
    partition: Partition,
    packing: &PackingConfig,
    dir: &Path,
    compression: packshard_core::Compression,
) -> Result<PartitionReport> {
    let tokenized = source.tokenize_batch(texts)?;
    if tokenized.len() != texts.len() {
        return Err(PackShardError::Tokenizer(format!(
            "tokenizer returned {} sequences for {} texts",
            tokenized.len(),
            texts.len()
        )));
    }

    let splitter = SequenceSplitter::new(
        packing.block_size,
        source.boundary_id(),
        source.terminator_id(),
    );
    let split = splitter.split_batch(&tokenized);
    if split.truncated_sources > 0 {
        tracing::debug!(
            partition = partition.id,
            truncated = split.truncated_sources,
            dropped_tokens = split.dropped_tokens,
            "dropped unsplittable tails"
        );
    }

    let packer = BlockPacker::new(packing.block_size, source.terminator_id());
    let (blocks, stats) = packer.pack_with_stats(&split.sequences)?;

    let mut writer = ShardWriter::new(
        dir,
        partition.id,
        packing.block_size,
        packing.slice_size,
        compression,
    )?;
    writer.push_all(&blocks)?;
    let full_shards = writer.full_shards();
    let (_, rest_shard) = writer.finish()?;

    tracing::info!(
        partition = partition.id,
        samples = partition.len(),
        full_shards,
        rest = rest_shard.is_some(),
        "{}",
        stats.summary()
    );

    Ok(PartitionReport {
        partition,
        sequences: split.sequences.len(),
        truncated_sources: split.truncated_sources,
        dropped_tokens: split.dropped_tokens,
        full_shards,
        rest_shard,
        stats,
    })
}

/// Outcome of a full run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// One entry per partition, in partition order.
    pub partitions: Vec<PartitionReport>,
    /// Reslice pass outcome, if it ran.
    pub reslice: Option<ResliceReport>,
}

impl PipelineReport {
    /// Total blocks packed across partitions.
    pub fn total_blocks(&self) -> usize {
        self.partitions.iter().map(|p| p.stats.num_blocks).sum()
    }

    /// Total full shards written by partitions and the reslicer.
    pub fn total_shards(&self) -> usize {
        let partition_shards: usize = self.partitions.iter().map(|p| p.full_shards).sum();
        partition_shards + self.reslice.as_ref().map_or(0, |r| r.shards_written)
    }

    /// Total tokens lost to unsplittable tails.
    pub fn dropped_tokens(&self) -> usize {
        self.partitions.iter().map(|p| p.dropped_tokens).sum()
    }
}

/// Drives every partition through a worker pool, then reslices.
pub struct Pipeline<S> {
    source: S,
    packing: PackingConfig,
    output: OutputConfig,
}

impl<S: TokenSource> Pipeline<S> {
    /// Create a pipeline; fails on invalid geometry.
    pub fn new(source: S, packing: PackingConfig, output: OutputConfig) -> Result<Self> {
        packing.validate()?;
        if output.num_workers == 0 {
            return Err(PackShardError::Config("num_workers must be positive".into()));
        }
        Ok(Self {
            source,
            packing,
            output,
        })
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output.dir
    }

    /// Run without progress reporting.
    pub fn run(&self, dataset: &TextDataset) -> Result<PipelineReport> {
        self.run_with_progress(dataset, |_| {})
    }

    /// Run, calling `on_partition` as each partition finishes.
    pub fn run_with_progress<F>(
        &self,
        dataset: &TextDataset,
        on_partition: F,
    ) -> Result<PipelineReport>
    where
        F: Fn(&PartitionReport) + Sync,
    {
        std::fs::create_dir_all(&self.output.dir)?;
        let partitions = plan_partitions(dataset.len(), self.packing.batch_size);

        tracing::info!(
            samples = dataset.len(),
            partitions = partitions.len(),
            workers = self.output.num_workers,
            block_size = self.packing.block_size,
            slice_size = self.packing.slice_size,
            "packing dataset into {}",
            self.output.dir.display()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.output.num_workers)
            .build()
            .map_err(|e| PackShardError::Config(format!("failed to build worker pool: {e}")))?;

        let reports = pool.install(|| {
            partitions
                .par_iter()
                .map(|&partition| -> Result<PartitionReport> {
                    let report = process_partition(
                        &self.source,
                        dataset.slice(partition.start, partition.end),
                        partition,
                        &self.packing,
                        &self.output.dir,
                        self.output.compression,
                    )?;
                    on_partition(&report);
                    Ok(report)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let reslice = if self.output.reslice {
            let leftovers: Vec<PathBuf> = reports
                .iter()
                .filter_map(|r| r.rest_shard.clone())
                .collect();
            let start = next_resliced_counter(&self.output.dir)?;
            let reslicer = Reslicer::new(
                &self.output.dir,
                self.packing.slice_size,
                self.output.compression,
            )?;
            let report = reslicer
                .with_start_counter(start)
                .reslice(leftovers)?;
            Some(report)
        } else {
            None
        };

        let report = PipelineReport {
            partitions: reports,
            reslice,
        };
        tracing::info!(
            blocks = report.total_blocks(),
            shards = report.total_shards(),
            dropped_tokens = report.dropped_tokens(),
            "preprocessing complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packshard_core::TokenId;

    #[test]
    fn test_plan_partitions() {
        let parts = plan_partitions(10, 4);
        let ranges: Vec<(usize, usize, usize)> =
            parts.iter().map(|p| (p.id, p.start, p.end)).collect();
        assert_eq!(ranges, vec![(0, 0, 4), (4, 4, 8), (8, 8, 10)]);
        assert_eq!(parts[2].len(), 2);

        assert!(plan_partitions(0, 4).is_empty());
        assert_eq!(plan_partitions(3, 8).len(), 1);
    }

    struct CountingSource;

    impl TokenSource for CountingSource {
        fn tokenize_batch(&self, texts: &[String]) -> Result<Vec<Vec<TokenId>>> {
            Ok(texts.iter().map(|t| vec![7; t.len()]).collect())
        }

        fn terminator_id(&self) -> TokenId {
            0
        }

        fn boundary_id(&self) -> TokenId {
            1
        }
    }

    #[test]
    fn test_process_partition_writes_shards() {
        let dir = tempfile::tempdir().unwrap();
        // Each text of length 3 packs to 4 tokens: two per block of 8.
        let texts: Vec<String> = (0..10).map(|_| "abc".to_string()).collect();
        let packing = PackingConfig::new(8, 2);
        let partition = Partition {
            id: 20,
            start: 20,
            end: 30,
        };

        let report = process_partition(
            &CountingSource,
            &texts,
            partition,
            &packing,
            dir.path(),
            packshard_core::Compression::Snappy,
        )
        .unwrap();

        assert_eq!(report.sequences, 10);
        assert_eq!(report.stats.num_blocks, 5);
        assert_eq!(report.full_shards, 2);
        let rest = report.rest_shard.unwrap();
        assert!(rest.ends_with("train_20_rest_safetensor.snappy"));
        assert!(dir.path().join("train_20_1_safetensor.snappy").exists());
    }

    #[test]
    fn test_pipeline_rejects_bad_config() {
        let output = OutputConfig {
            num_workers: 0,
            ..Default::default()
        };
        assert!(Pipeline::new(CountingSource, PackingConfig::default(), output).is_err());
        let tiny = PackingConfig::new(1, 1);
        assert!(Pipeline::new(CountingSource, tiny, OutputConfig::default()).is_err());
    }
}
