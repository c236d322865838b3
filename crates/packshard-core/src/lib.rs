//! Core types, traits, and configuration for packshard.
//!
//! This crate provides the foundational pieces shared by the packing engine
//! and the command line tool:
//!
//! - The [`TokenSource`] seam between tokenization and packing
//! - Configuration types for block geometry, tokenizer, dataset and output
//! - Common type definitions (token ids, shard tensor names, compression)
//! - Error handling infrastructure

#![warn(missing_docs)]

mod config;
mod error;
mod traits;
mod types;

pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{PackShardError, Result};
    pub use crate::traits::*;
    pub use crate::types::*;
}
