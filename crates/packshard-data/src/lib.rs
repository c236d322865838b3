//! Packing engine for packshard.
//!
//! This crate provides:
//! - Boundary-token splitting of over-long token sequences
//! - First-Fit Decreasing packing into fixed-size blocks
//! - Shard encoding (safetensors + compression) and buffered shard writing
//! - Consolidation of partition leftovers into full shards
//! - Dataset loading from JSONL and Parquet
//! - Tokenizer integration
//! - The parallel preprocessing pipeline tying these together

#![warn(missing_docs)]

pub mod dataset;
pub mod packing;
pub mod pipeline;
pub mod reslicer;
pub mod shard;
pub mod splitter;
pub mod tokenizer;

pub use dataset::*;
pub use packing::*;
pub use pipeline::*;
pub use reslicer::*;
pub use shard::*;
pub use splitter::*;
pub use tokenizer::*;
