//! Error types for packshard.

use thiserror::Error;

/// Result type alias for packshard operations.
pub type Result<T> = std::result::Result<T, PackShardError>;

/// Main error type for packshard operations.
#[derive(Error, Debug)]
pub enum PackShardError {
    /// I/O errors (shard reads, writes and deletions).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tensor container errors.
    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Byte compressor errors.
    #[error("Compression error: {0}")]
    Compression(String),

    /// A sequence longer than the block capacity reached the packer.
    #[error("Sequence of length {length} exceeds block capacity {capacity}")]
    CapacityExceeded {
        /// Sequence length.
        length: usize,
        /// Block capacity.
        capacity: usize,
    },

    /// A token id or position does not fit the on-disk dtype.
    #[error("Value {value} does not fit in {dtype}")]
    TokenOutOfRange {
        /// Offending value.
        value: u64,
        /// Target dtype name.
        dtype: &'static str,
    },

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A shard tensor has an unexpected dtype.
    #[error("Tensor '{tensor}' has dtype {actual}, expected {expected}")]
    DtypeMismatch {
        /// Tensor name.
        tensor: String,
        /// Expected dtype.
        expected: String,
        /// Dtype found in the shard.
        actual: String,
    },

    /// A shard is missing one of its tensors.
    #[error("Shard is missing tensor '{0}'")]
    MissingTensor(String),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Malformed dataset input.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_display() {
        let err = PackShardError::CapacityExceeded {
            length: 600,
            capacity: 512,
        };
        assert_eq!(
            err.to_string(),
            "Sequence of length 600 exceeds block capacity 512"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PackShardError = io_err.into();
        assert!(matches!(err, PackShardError::Io(_)));
        assert!(err.to_string().starts_with("I/O error"));
    }
}
