//! Configuration types for packshard.

use crate::{Compression, PackShardError, Result, MAX_BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Block and shard geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackingConfig {
    /// Token capacity of one block.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Number of blocks in one full shard.
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,

    /// Number of source samples per partition.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            slice_size: default_slice_size(),
            batch_size: default_batch_size(),
        }
    }
}

impl PackingConfig {
    /// Create a config with the given block and slice sizes.
    pub fn new(block_size: usize, slice_size: usize) -> Self {
        Self {
            block_size,
            slice_size,
            ..Default::default()
        }
    }

    /// Set the partition batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check the geometry before any shard is written.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 2 {
            return Err(PackShardError::Config(format!(
                "block_size must be at least 2, got {}",
                self.block_size
            )));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(PackShardError::Config(format!(
                "block_size {} exceeds {} (positions are stored as i16)",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.slice_size == 0 {
            return Err(PackShardError::Config("slice_size must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(PackShardError::Config("batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Tokenizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Path to a `tokenizer.json` file.
    #[serde(default)]
    pub path: PathBuf,

    /// Text whose token marks a safe split point.
    #[serde(default = "default_boundary_text")]
    pub boundary_text: String,

    /// Explicit terminator id (defaults to the tokenizer's EOS token).
    #[serde(default)]
    pub eos_token_id: Option<u32>,

    /// Explicit boundary id (defaults to the token of `boundary_text`).
    #[serde(default)]
    pub boundary_token_id: Option<u32>,

    /// Let the tokenizer add its special tokens (BOS etc.).
    #[serde(default = "default_true")]
    pub add_special_tokens: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            boundary_text: default_boundary_text(),
            eos_token_id: None,
            boundary_token_id: None,
            add_special_tokens: true,
        }
    }
}

/// Source dataset layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Detect from the file extension.
    #[default]
    Auto,
    /// One JSON object per line.
    Jsonl,
    /// Parquet file with a string column.
    Parquet,
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the dataset file.
    #[serde(default)]
    pub path: PathBuf,

    /// File format.
    #[serde(default)]
    pub format: SourceFormat,

    /// Field or column containing the text.
    #[serde(default = "default_text_column")]
    pub text_column: String,

    /// Maximum samples to use (None for all).
    #[serde(default)]
    pub max_samples: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            format: SourceFormat::default(),
            text_column: default_text_column(),
            max_samples: None,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving every shard.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Byte compressor for shards.
    #[serde(default)]
    pub compression: Compression,

    /// Number of partition workers.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Run the reslice pass after packing.
    #[serde(default = "default_true")]
    pub reslice: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            compression: Compression::default(),
            num_workers: default_num_workers(),
            reslice: true,
        }
    }
}

/// Combined configuration for one preprocessing run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackShardConfig {
    /// Block and shard geometry.
    #[serde(default)]
    pub packing: PackingConfig,

    /// Tokenizer settings.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    /// Source dataset.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

impl PackShardConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.packing.validate()?;
        if self.output.num_workers == 0 {
            return Err(PackShardError::Config("num_workers must be positive".into()));
        }
        Ok(())
    }
}

// Default value functions
fn default_block_size() -> usize {
    512
}
fn default_slice_size() -> usize {
    5000
}
fn default_batch_size() -> usize {
    // 1.75 slices per partition
    default_slice_size() * 7 / 4
}
fn default_true() -> bool {
    true
}
fn default_boundary_text() -> String {
    ".".into()
}
fn default_text_column() -> String {
    "text".into()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/train")
}
fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = PackingConfig::default();
        assert_eq!(cfg.block_size, 512);
        assert_eq!(cfg.slice_size, 5000);
        assert_eq!(cfg.batch_size, 8750);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert!(PackingConfig::new(1, 10).validate().is_err());
        assert!(PackingConfig::new(8, 0).validate().is_err());
        assert!(PackingConfig::new(MAX_BLOCK_SIZE + 1, 10).validate().is_err());
        assert!(PackingConfig::new(MAX_BLOCK_SIZE, 10).validate().is_ok());
        assert!(PackingConfig::new(8, 3).with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
packing:
  block_size: 1024
dataset:
  path: data/c4.jsonl
output:
  compression: zstd
  num_workers: 4
"#;
        let cfg = PackShardConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.packing.block_size, 1024);
        assert_eq!(cfg.packing.slice_size, 5000);
        assert_eq!(cfg.dataset.text_column, "text");
        assert_eq!(cfg.dataset.format, SourceFormat::Auto);
        assert_eq!(cfg.output.compression, Compression::Zstd);
        assert_eq!(cfg.output.num_workers, 4);
        assert!(cfg.output.reslice);
        assert_eq!(cfg.tokenizer.boundary_text, ".");
        assert!(cfg.tokenizer.add_special_tokens);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "output:\n  num_workers: 0").unwrap();
        let cfg = PackShardConfig::from_yaml_file(file.path()).unwrap();
        assert!(cfg.validate().is_err());
    }
}
