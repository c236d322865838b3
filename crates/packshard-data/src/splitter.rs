//! Boundary-token splitting of over-long sequences.
//!
//! A block holds at most `block_size` tokens and every piece carries a
//! trailing terminator, so a raw sequence may hold at most `block_size - 1`
//! ids before it has to be cut. Cuts happen only at the boundary token (a
//! sentence end for most tokenizers):
//!
//! ```text
//! block_size = 8, boundary `.` at 4, 9, 15, terminator `$`
//!
//! raw:     a a a a . b b b b . c c c c c . d d d d
//! pieces:  [a a a a $] [b b b b $] [c c c c c $]     (d d d d dropped)
//! ```
//!
//! The boundary slot itself is replaced by the terminator, so a cut at
//! position `p` yields a piece of `p + 1` tokens and the remainder resumes at
//! `p + 1`. Cutting stops once the remainder fits or no boundary is within
//! the limit; either way the remainder of a cut sequence is dropped rather
//! than emitted or hard-split mid-sentence. Only sequences that fit from the
//! start are kept whole.

use packshard_core::TokenId;

/// A tokenized piece ready for packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    /// Token ids, terminator included.
    pub ids: Vec<TokenId>,
    /// Index of the source text inside its batch.
    pub source_index: usize,
    /// Ordinal of this piece among the pieces cut from the same source.
    pub piece: usize,
}

impl TokenSequence {
    /// Create a sequence from already-terminated ids.
    pub fn new(ids: Vec<TokenId>, source_index: usize, piece: usize) -> Self {
        Self {
            ids,
            source_index,
            piece,
        }
    }

    /// Number of tokens, terminator included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the sequence holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Result of splitting one or more raw sequences.
#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    /// Pieces in source order, then cut order.
    pub sequences: Vec<TokenSequence>,
    /// Sources that were cut and lost their remainder.
    pub truncated_sources: usize,
    /// Raw tokens dropped with those remainders.
    pub dropped_tokens: usize,
}

impl SplitOutcome {
    fn absorb(&mut self, other: SplitOutcome) {
        self.sequences.extend(other.sequences);
        self.truncated_sources += other.truncated_sources;
        self.dropped_tokens += other.dropped_tokens;
    }
}

/// Cuts raw token sequences into pieces that fit one block.
#[derive(Debug, Clone, Copy)]
pub struct SequenceSplitter {
    block_size: usize,
    boundary_id: TokenId,
    terminator_id: TokenId,
}

impl SequenceSplitter {
    /// Create a splitter for the given block capacity.
    pub fn new(block_size: usize, boundary_id: TokenId, terminator_id: TokenId) -> Self {
        Self {
            block_size,
            boundary_id,
            terminator_id,
        }
    }

    /// Longest raw run that still fits a block once terminated.
    fn limit(&self) -> usize {
        self.block_size.saturating_sub(1)
    }

    fn terminated(&self, ids: &[TokenId]) -> Vec<TokenId> {
        let mut out = Vec::with_capacity(ids.len() + 1);
        out.extend_from_slice(ids);
        out.push(self.terminator_id);
        out
    }

    /// Split one raw sequence.
    pub fn split(&self, source_index: usize, ids: &[TokenId]) -> SplitOutcome {
        let limit = self.limit();
        let mut outcome = SplitOutcome::default();

        if ids.len() <= limit {
            outcome
                .sequences
                .push(TokenSequence::new(self.terminated(ids), source_index, 0));
            return outcome;
        }

        let mut rest = ids;
        let mut piece = 0;
        while rest.len() > limit {
            let window = &rest[..=limit];
            let Some(pos) = window.iter().rposition(|&id| id == self.boundary_id) else {
                break;
            };
            outcome.sequences.push(TokenSequence::new(
                self.terminated(&rest[..pos]),
                source_index,
                piece,
            ));
            piece += 1;
            rest = &rest[pos + 1..];
        }

        // Whatever is left after cutting is discarded, whether or not it fits.
        if !rest.is_empty() {
            outcome.truncated_sources += 1;
            outcome.dropped_tokens += rest.len();
        }

        outcome
    }

    /// Split a whole batch; `source_index` is the position in `batch`.
    pub fn split_batch(&self, batch: &[Vec<TokenId>]) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();
        for (source_index, ids) in batch.iter().enumerate() {
            outcome.absorb(self.split(source_index, ids));
        }
        outcome
    }
}
