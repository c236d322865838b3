//! packshard CLI - pack tokenized text into fixed-size training shards.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use packshard_core::{Compression, PackShardConfig};
use packshard_data::{
    discover_rest_shards, next_resliced_counter, read_shard, Pipeline, Reslicer, TextDataset,
    Tokenizer,
};

/// Shard compressor.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum CompressionArg {
    /// Raw snappy (default)
    #[default]
    Snappy,
    /// Zstandard
    Zstd,
    /// Uncompressed safetensors
    None,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Snappy => Compression::Snappy,
            CompressionArg::Zstd => Compression::Zstd,
            CompressionArg::None => Compression::None,
        }
    }
}

#[derive(Parser)]
#[command(name = "packshard")]
#[command(
    author,
    version,
    about = "Pack tokenized text into fixed-size training shards",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize, split and pack a dataset into shards
    Pack {
        /// Path to configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset path (JSONL or Parquet)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Path to tokenizer.json
        #[arg(short, long)]
        tokenizer: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tokens per block
        #[arg(long)]
        block_size: Option<usize>,

        /// Blocks per shard
        #[arg(long)]
        slice_size: Option<usize>,

        /// Source samples per partition
        #[arg(long)]
        batch_size: Option<usize>,

        /// Number of partition workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Shard compressor
        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,

        /// Field or column holding the text
        #[arg(long)]
        text_column: Option<String>,

        /// Use at most this many samples
        #[arg(long)]
        max_samples: Option<usize>,

        /// Keep partition leftovers instead of reslicing them
        #[arg(long)]
        no_reslice: bool,
    },

    /// Fold leftover shards in a directory into full shards
    Reslice {
        /// Directory holding `*rest*` shards
        #[arg(short, long)]
        dir: PathBuf,

        /// Blocks per shard
        #[arg(long, default_value = "5000")]
        slice_size: usize,

        /// Compressor for the shards written
        #[arg(long, value_enum, default_value = "snappy")]
        compression: CompressionArg,
    },

    /// Print block statistics of one shard
    Inspect {
        /// Shard file
        shard: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            config,
            dataset,
            tokenizer,
            output,
            block_size,
            slice_size,
            batch_size,
            workers,
            compression,
            text_column,
            max_samples,
            no_reslice,
        } => {
            // Load or create configuration
            let mut config = match config {
                Some(ref path) => PackShardConfig::from_yaml_file(path)?,
                None => PackShardConfig::default(),
            };

            // Override with CLI args if provided
            if let Some(path) = dataset {
                config.dataset.path = path;
            }
            if let Some(path) = tokenizer {
                config.tokenizer.path = path;
            }
            if let Some(dir) = output {
                config.output.dir = dir;
            }
            if let Some(block_size) = block_size {
                config.packing.block_size = block_size;
            }
            if let Some(slice_size) = slice_size {
                config.packing.slice_size = slice_size;
                // Keep the 1.75-slice partition unless set explicitly.
                if batch_size.is_none() {
                    config.packing.batch_size = slice_size * 7 / 4;
                }
            }
            if let Some(batch_size) = batch_size {
                config.packing.batch_size = batch_size;
            }
            if let Some(workers) = workers {
                config.output.num_workers = workers;
            }
            if let Some(compression) = compression {
                config.output.compression = compression.into();
            }
            if let Some(column) = text_column {
                config.dataset.text_column = column;
            }
            if max_samples.is_some() {
                config.dataset.max_samples = max_samples;
            }
            if no_reslice {
                config.output.reslice = false;
            }

            run_pack(config)
        }
        Commands::Reslice {
            dir,
            slice_size,
            compression,
        } => run_reslice(&dir, slice_size, compression.into()),
        Commands::Inspect { shard } => run_inspect(&shard),
    }
}

fn run_pack(config: PackShardConfig) -> anyhow::Result<()> {
    // Validate required fields
    if config.dataset.path.as_os_str().is_empty() {
        anyhow::bail!("Dataset path is required. Use --dataset or specify in config file.");
    }
    if config.tokenizer.path.as_os_str().is_empty() {
        anyhow::bail!("Tokenizer path is required. Use --tokenizer or specify in config file.");
    }
    if !config.tokenizer.path.exists() {
        anyhow::bail!("Tokenizer not found at {:?}", config.tokenizer.path);
    }
    config.validate()?;

    let tokenizer = Tokenizer::from_config(&config.tokenizer)?;
    let dataset = TextDataset::load(&config.dataset)?;
    if dataset.is_empty() {
        anyhow::bail!("Dataset {:?} contains no samples", config.dataset.path);
    }

    let partitions = dataset.len().div_ceil(config.packing.batch_size);
    let progress = ProgressBar::new(partitions as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {pos}/{len} partitions ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let pipeline = Pipeline::new(tokenizer, config.packing.clone(), config.output.clone())?;
    let report = pipeline.run_with_progress(&dataset, |_| progress.inc(1))?;
    progress.finish_and_clear();

    println!("========================================");
    println!("Samples:         {}", dataset.len());
    println!("Partitions:      {}", report.partitions.len());
    println!("Blocks packed:   {}", report.total_blocks());
    println!("Shards written:  {}", report.total_shards());
    println!("Dropped tokens:  {}", report.dropped_tokens());
    if let Some(reslice) = &report.reslice {
        println!(
            "Reslice:         {} leftovers -> {} shards, {} blocks dropped",
            reslice.files_consumed, reslice.shards_written, reslice.dropped_blocks
        );
    }
    println!("Output:          {}", pipeline.output_dir().display());
    println!("========================================");

    Ok(())
}

fn run_reslice(dir: &Path, slice_size: usize, compression: Compression) -> anyhow::Result<()> {
    let reslicer = Reslicer::new(dir, slice_size, compression)?;
    let leftovers = discover_rest_shards(dir)?;
    if leftovers.is_empty() {
        println!("No leftover shards in {}", dir.display());
        return Ok(());
    }

    let start = next_resliced_counter(dir)?;
    tracing::info!(files = leftovers.len(), start_counter = start, "reslicing");

    let report = reslicer.with_start_counter(start).reslice(leftovers)?;

    println!(
        "Folded {} leftovers ({} blocks) into {} shards, dropped {} blocks",
        report.files_consumed, report.blocks_read, report.shards_written, report.dropped_blocks
    );
    Ok(())
}

/// Slots and members visible in one block's position ids.
///
/// Members start at position 0 and padding is position 0 with the terminator
/// id, so a trailing one-token member (a lone terminator) cannot be told apart
/// from padding. Both counts are lower bounds. Every block holds at least one
/// member, so an all-zero row counts as one slot and one member.
fn visible_occupancy(positions: &[i16]) -> (usize, usize) {
    let occupied = positions
        .iter()
        .rposition(|&p| p != 0)
        .map_or(1, |last| last + 1);
    let members = positions[..occupied.min(positions.len())]
        .iter()
        .filter(|&&p| p == 0)
        .count();
    (occupied, members)
}

fn run_inspect(path: &Path) -> anyhow::Result<()> {
    let array = read_shard(path)?;
    let block_size = array.block_size();

    let mut occupied_total = 0usize;
    let mut sequences_total = 0usize;
    let mut max_sequences = 0usize;

    for row in 0..array.len() {
        let Some((_, positions)) = array.row(row) else {
            break;
        };
        let (occupied, sequences) = visible_occupancy(positions);
        occupied_total += occupied;
        sequences_total += sequences;
        max_sequences = max_sequences.max(sequences);
    }

    let blocks = array.len().max(1) as f64;
    println!("Shard:             {}", path.display());
    println!("Shape:             [{}, {}]", array.len(), block_size);
    println!(
        "Occupancy:         >= {:.1}%",
        occupied_total as f64 / (blocks * block_size as f64) * 100.0
    );
    println!(
        "Sequences/block:   >= {:.2} avg, >= {} max",
        sequences_total as f64 / blocks,
        max_sequences
    );
    println!("(a trailing one-token sequence is indistinguishable from padding)");

    Ok(())
}
