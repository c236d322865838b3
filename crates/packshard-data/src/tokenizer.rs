//! Tokenizer integration.

use packshard_core::{PackShardError, Result, TokenId, TokenSource, TokenizerConfig};

fn tokenizer_err(e: impl std::fmt::Display) -> PackShardError {
    PackShardError::Tokenizer(e.to_string())
}

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    terminator_id: TokenId,
    boundary_id: TokenId,
    add_special_tokens: bool,
}

impl Tokenizer {
    /// Load a tokenizer from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes).map_err(tokenizer_err)?;
        Self::from_inner(inner, &TokenizerConfig::default())
    }

    /// Load the tokenizer named by a config, applying its id overrides.
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(&config.path).map_err(|e| {
            PackShardError::Tokenizer(format!("{}: {}", config.path.display(), e))
        })?;
        Self::from_inner(inner, config)
    }

    fn from_inner(inner: tokenizers::Tokenizer, config: &TokenizerConfig) -> Result<Self> {
        let terminator_id = match config.eos_token_id {
            Some(id) => id,
            None => eos_token_id(&inner).ok_or_else(|| {
                PackShardError::Tokenizer("no EOS token found; set eos_token_id".into())
            })?,
        };
        let boundary_id = match config.boundary_token_id {
            Some(id) => id,
            None => resolve_boundary(&inner, &config.boundary_text)?,
        };

        tracing::debug!(terminator_id, boundary_id, "tokenizer special ids resolved");

        Ok(Self {
            inner,
            terminator_id,
            boundary_id,
            add_special_tokens: config.add_special_tokens,
        })
    }
}

/// Get EOS token ID if available.
fn eos_token_id(inner: &tokenizers::Tokenizer) -> Option<u32> {
    inner
        .token_to_id("</s>")
        .or_else(|| inner.token_to_id("<|endoftext|>"))
        .or_else(|| inner.token_to_id("<|end_of_text|>"))
        .or_else(|| inner.token_to_id("<eos>"))
}

/// The vocabulary entry for `text`, else the first id it encodes to.
fn resolve_boundary(inner: &tokenizers::Tokenizer, text: &str) -> Result<u32> {
    if let Some(id) = inner.token_to_id(text) {
        return Ok(id);
    }
    let encoding = inner.encode(text, false).map_err(tokenizer_err)?;
    encoding.get_ids().first().copied().ok_or_else(|| {
        PackShardError::Tokenizer(format!("boundary text {text:?} encodes to no tokens"))
    })
}

impl TokenSource for Tokenizer {
    fn tokenize_batch(&self, texts: &[String]) -> Result<Vec<Vec<TokenId>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .inner
            .encode_batch(inputs, self.add_special_tokens)
            .map_err(tokenizer_err)?;
        Ok(encodings.iter().map(|e| e.get_ids().to_vec()).collect())
    }

    fn terminator_id(&self) -> TokenId {
        self.terminator_id
    }

    fn boundary_id(&self) -> TokenId {
        self.boundary_id
    }
}
