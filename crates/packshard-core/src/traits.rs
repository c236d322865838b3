//! Core trait definitions.

use crate::{Result, TokenId};

/// Tokenizing collaborator feeding the packer.
///
/// Implementations turn raw texts into token ids and name the two special ids
/// the splitter and packer need: the terminator appended to every piece (and
/// used as token padding) and the boundary token at which over-long
/// sequences may be cut.
pub trait TokenSource: Send + Sync {
    /// Tokenize a batch of texts, one id vector per text, in input order.
    fn tokenize_batch(&self, texts: &[String]) -> Result<Vec<Vec<TokenId>>>;

    /// Terminator (EOS) token id.
    fn terminator_id(&self) -> TokenId;

    /// Sentence-boundary token id.
    fn boundary_id(&self) -> TokenId;
}

impl<T: TokenSource + ?Sized> TokenSource for &T {
    fn tokenize_batch(&self, texts: &[String]) -> Result<Vec<Vec<TokenId>>> {
        (**self).tokenize_batch(texts)
    }

    fn terminator_id(&self) -> TokenId {
        (**self).terminator_id()
    }

    fn boundary_id(&self) -> TokenId {
        (**self).boundary_id()
    }
}
