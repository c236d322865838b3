//! Sequence packing into fixed-capacity blocks.
//!
//! Packing concatenates several short sequences into one block so that the
//! training set is stored as uniform `[blocks, block_size]` arrays with
//! little padding:
//!
//! ```text
//! [seq1: 10 tokens][PAD PAD PAD PAD PAD PAD]                    <- unpacked
//! [seq1: 10 tokens][seq3: 8 tokens][seq5: 12 tokens][PAD PAD]   <- packed
//! ```
//!
//! # Algorithm
//!
//! First-Fit Decreasing (FFD) bin packing:
//! 1. Stable-sort sequences by length (descending, ties keep input order)
//! 2. Place each sequence in the first bin (in creation order) with room
//! 3. If no bin has room, open a new bin
//!
//! The result is deterministic for a given input and block size. Position
//! ids restart at zero at each member so a consumer can recover the
//! sequence boundaries without an attention mask.

use crate::TokenSequence;
use packshard_core::{PackShardError, Result, TokenId};

/// Identity of one sequence placed in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockMember {
    /// Index of the source text inside its batch.
    pub source_index: usize,
    /// Piece ordinal within that source.
    pub piece: usize,
    /// Number of tokens occupied.
    pub length: usize,
}

/// A packed block padded to the block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Token ids, padded with the terminator id.
    pub input_ids: Vec<TokenId>,
    /// Position ids, restarting at 0 per member and padded with 0.
    pub position_ids: Vec<u32>,
    /// Members in placement order.
    pub members: Vec<BlockMember>,
}

impl Block {
    /// Number of non-padding tokens.
    pub fn occupied(&self) -> usize {
        self.members.iter().map(|m| m.length).sum()
    }

    /// Number of sequences packed into this block.
    pub fn num_sequences(&self) -> usize {
        self.members.len()
    }

    /// Block capacity.
    pub fn capacity(&self) -> usize {
        self.input_ids.len()
    }

    /// Offsets at which each member starts.
    pub fn sequence_starts(&self) -> Vec<usize> {
        let mut starts = Vec::with_capacity(self.members.len());
        let mut offset = 0usize;
        for member in &self.members {
            starts.push(offset);
            offset += member.length;
        }
        starts
    }
}

/// Occupancy of a set of fixed-capacity blocks.
#[derive(Debug, Clone, Default)]
pub struct PackingStats {
    /// Capacity of every block.
    pub block_size: usize,
    /// Number of blocks created.
    pub num_blocks: usize,
    /// Number of sequences packed.
    pub num_sequences: usize,
    /// Non-padding tokens across all blocks.
    pub total_tokens: usize,
    /// Terminator-id padding appended to fill blocks.
    pub padding_tokens: usize,
    /// Fraction of slots holding sequence tokens.
    pub occupancy: f64,
    /// Maximum sequences in a single block.
    pub max_sequences_per_block: usize,
}

impl PackingStats {
    /// Tally blocks of capacity `block_size`.
    pub fn from_blocks(blocks: &[Block], block_size: usize) -> Self {
        if blocks.is_empty() {
            return Self {
                block_size,
                ..Self::default()
            };
        }

        let total_tokens: usize = blocks.iter().map(Block::occupied).sum();
        let capacity = blocks.len() * block_size;

        Self {
            block_size,
            num_blocks: blocks.len(),
            num_sequences: blocks.iter().map(Block::num_sequences).sum(),
            total_tokens,
            padding_tokens: capacity - total_tokens,
            occupancy: total_tokens as f64 / capacity as f64,
            max_sequences_per_block: blocks.iter().map(Block::num_sequences).max().unwrap_or(0),
        }
    }

    /// Average sequences per block.
    pub fn avg_sequences_per_block(&self) -> f64 {
        if self.num_blocks == 0 {
            return 0.0;
        }
        self.num_sequences as f64 / self.num_blocks as f64
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} seqs into {} x {}-token blocks, {:.1}% occupied ({} padding), \
             {:.1} seqs/block (max {})",
            self.num_sequences,
            self.num_blocks,
            self.block_size,
            self.occupancy * 100.0,
            self.padding_tokens,
            self.avg_sequences_per_block(),
            self.max_sequences_per_block
        )
    }
}

/// A bin for FFD packing (internal use).
struct PackingBin {
    /// Indices into the sequence slice, in placement order.
    members: Vec<usize>,
    free: usize,
}

impl PackingBin {
    fn open(index: usize, length: usize, capacity: usize) -> Self {
        Self {
            members: vec![index],
            free: capacity - length,
        }
    }

    fn can_fit(&self, length: usize) -> bool {
        self.free >= length
    }

    fn add(&mut self, index: usize, length: usize) {
        self.free -= length;
        self.members.push(index);
    }
}

/// First-Fit Decreasing packer producing padded blocks.
#[derive(Debug, Clone, Copy)]
pub struct BlockPacker {
    block_size: usize,
    pad_id: TokenId,
}

impl BlockPacker {
    /// Create a packer; `pad_id` is normally the terminator id.
    pub fn new(block_size: usize, pad_id: TokenId) -> Self {
        Self { block_size, pad_id }
    }

    /// Block capacity in tokens.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pack sequences into blocks.
    ///
    /// Fails with [`PackShardError::CapacityExceeded`] if a sequence longer
    /// than the block size arrives; those must be split beforehand.
    pub fn pack(&self, sequences: &[TokenSequence]) -> Result<Vec<Block>> {
        if let Some(seq) = sequences.iter().find(|s| s.len() > self.block_size) {
            return Err(PackShardError::CapacityExceeded {
                length: seq.len(),
                capacity: self.block_size,
            });
        }

        // `sort_by` is stable, so equal lengths keep their input order.
        let mut order: Vec<usize> = (0..sequences.len()).collect();
        order.sort_by(|&a, &b| sequences[b].len().cmp(&sequences[a].len()));

        let mut bins: Vec<PackingBin> = Vec::new();
        for index in order {
            let length = sequences[index].len();
            match bins.iter_mut().find(|bin| bin.can_fit(length)) {
                Some(bin) => bin.add(index, length),
                None => bins.push(PackingBin::open(index, length, self.block_size)),
            }
        }

        Ok(bins
            .iter()
            .map(|bin| self.finalize(bin, sequences))
            .collect())
    }

    /// Pack sequences and return stats alongside the blocks.
    pub fn pack_with_stats(
        &self,
        sequences: &[TokenSequence],
    ) -> Result<(Vec<Block>, PackingStats)> {
        let blocks = self.pack(sequences)?;
        let stats = PackingStats::from_blocks(&blocks, self.block_size);
        Ok((blocks, stats))
    }

    fn finalize(&self, bin: &PackingBin, sequences: &[TokenSequence]) -> Block {
        let mut input_ids = Vec::with_capacity(self.block_size);
        let mut position_ids = Vec::with_capacity(self.block_size);
        let mut members = Vec::with_capacity(bin.members.len());

        for &index in &bin.members {
            let seq = &sequences[index];
            input_ids.extend_from_slice(&seq.ids);
            position_ids.extend(0..seq.len() as u32);
            members.push(BlockMember {
                source_index: seq.source_index,
                piece: seq.piece,
                length: seq.len(),
            });
        }

        input_ids.resize(self.block_size, self.pad_id);
        position_ids.resize(self.block_size, 0);

        Block {
            input_ids,
            position_ids,
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: TokenId = 0;

    fn seq(len: usize, source_index: usize) -> TokenSequence {
        let offset = 10 * source_index as TokenId;
        let mut ids: Vec<TokenId> = (1..len as TokenId).map(|t| t + offset).collect();
        ids.push(EOS);
        TokenSequence::new(ids, source_index, 0)
    }

    #[test]
    fn test_ffd_example() {
        // block 8, lengths [5, 3, 3, 2] -> [5 + 3] and [3 + 2]
        let sequences = vec![seq(5, 0), seq(3, 1), seq(3, 2), seq(2, 3)];
        let packer = BlockPacker::new(8, EOS);
        let blocks = packer.pack(&sequences).unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].occupied(), 8);
        assert_eq!(blocks[1].occupied(), 5);

        let sources: Vec<Vec<usize>> = blocks
            .iter()
            .map(|b| b.members.iter().map(|m| m.source_index).collect())
            .collect();
        assert_eq!(sources, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_position_ids_restart_per_member() {
        let sequences = vec![seq(3, 0), seq(2, 1)];
        let packer = BlockPacker::new(8, EOS);
        let blocks = packer.pack(&sequences).unwrap();

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.position_ids, vec![0, 1, 2, 0, 1, 0, 0, 0]);
        assert_eq!(block.input_ids, vec![1, 2, EOS, 11, EOS, EOS, EOS, EOS]);
        assert_eq!(block.sequence_starts(), vec![0, 3]);
        for start in block.sequence_starts() {
            assert_eq!(block.position_ids[start], 0);
        }
    }

    #[test]
    fn test_ties_keep_input_order() {
        let sequences = vec![seq(4, 0), seq(4, 1), seq(4, 2)];
        let packer = BlockPacker::new(8, EOS);
        let blocks = packer.pack(&sequences).unwrap();

        let order: Vec<usize> = blocks
            .iter()
            .flat_map(|b| b.members.iter().map(|m| m.source_index))
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_packing_is_deterministic() {
        let sequences: Vec<TokenSequence> = [7, 1, 3, 3, 5, 2, 8, 4, 6, 1]
            .iter()
            .enumerate()
            .map(|(i, &len)| seq(len, i))
            .collect();
        let packer = BlockPacker::new(8, EOS);

        let first = packer.pack(&sequences).unwrap();
        assert_eq!(first, packer.pack(&sequences).unwrap());
    }

    #[test]
    fn test_every_sequence_packed_once() {
        let lengths = [7, 1, 3, 3, 5, 2, 8, 4, 6, 1, 2, 2, 5];
        let sequences: Vec<TokenSequence> = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| seq(len, i))
            .collect();
        let packer = BlockPacker::new(8, EOS);
        let blocks = packer.pack(&sequences).unwrap();

        let mut seen: Vec<usize> = blocks
            .iter()
            .flat_map(|b| b.members.iter().map(|m| m.source_index))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..lengths.len()).collect::<Vec<_>>());

        assert!(blocks.len() <= sequences.len());
        for block in &blocks {
            assert!(block.occupied() <= 8);
            assert_eq!(block.capacity(), 8);
            assert_eq!(block.position_ids.len(), 8);
        }
    }

    #[test]
    fn test_oversized_sequence_fails_fast() {
        let sequences = vec![seq(3, 0), seq(9, 1)];
        let packer = BlockPacker::new(8, EOS);
        let err = packer.pack(&sequences).unwrap_err();

        assert!(matches!(
            err,
            PackShardError::CapacityExceeded {
                length: 9,
                capacity: 8
            }
        ));
    }

    #[test]
    fn test_empty_input() {
        let packer = BlockPacker::new(8, EOS);
        let (blocks, stats) = packer.pack_with_stats(&[]).unwrap();
        assert!(blocks.is_empty());
        assert_eq!(stats.num_blocks, 0);
    }

    #[test]
    fn test_packing_stats() {
        let sequences = vec![seq(8, 0), seq(2, 1), seq(7, 2), seq(3, 3), seq(5, 4), seq(5, 5)];
        let packer = BlockPacker::new(10, EOS);
        let (blocks, stats) = packer.pack_with_stats(&sequences).unwrap();

        // [8, 2], [7, 3], [5, 5]
        assert_eq!(blocks.len(), 3);
        assert_eq!(stats.num_sequences, 6);
        assert_eq!(stats.total_tokens, 30);
        assert_eq!(stats.padding_tokens, 0);
        assert!((stats.occupancy - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.max_sequences_per_block, 2);
        assert!((stats.avg_sequences_per_block() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_summary_reports_padding() {
        // [8], [3]: 11 of 20 slots used.
        let sequences = vec![seq(8, 0), seq(3, 1)];
        let packer = BlockPacker::new(10, EOS);
        let (_, stats) = packer.pack_with_stats(&sequences).unwrap();

        assert_eq!(stats.padding_tokens, 9);
        assert_eq!(
            stats.summary(),
            "2 seqs into 2 x 10-token blocks, 55.0% occupied (9 padding), 1.0 seqs/block (max 1)"
        );

        let empty = PackingStats::from_blocks(&[], 10);
        assert_eq!(empty.block_size, 10);
        assert_eq!(empty.avg_sequences_per_block(), 0.0);
    }
}
