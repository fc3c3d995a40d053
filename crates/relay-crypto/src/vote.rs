// Vote identifiers
//
// A vote identifier commits to the full content of a proposed block:
//   SHA-256(blockHash ‖ epoch ‖ drMerkleRoot ‖ tallyMerkleRoot ‖ previousVoteId)
// with every field encoded as a 256-bit big-endian word. Identical proposals
// therefore collapse onto the same identifier, which is what deduplicates
// ballots for the same block content.

use sha2::{Digest, Sha256};

use crate::hash::{Hash256, HASH_LEN};

/// Compute the vote identifier for a proposal.
///
/// An absent predecessor is encoded as the all-zero word.
pub fn vote_id(
    block_hash: &Hash256,
    epoch: u64,
    dr_merkle_root: &Hash256,
    tally_merkle_root: &Hash256,
    previous_vote_id: Option<&Hash256>,
) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(block_hash.as_bytes());
    hasher.update(Hash256::from_u64(epoch).as_bytes());
    hasher.update(dr_merkle_root.as_bytes());
    hasher.update(tally_merkle_root.as_bytes());
    hasher.update(previous_vote_id.unwrap_or(&Hash256::ZERO).as_bytes());

    let hash_result = hasher.finalize();
    let mut id = [0u8; HASH_LEN];
    id.copy_from_slice(&hash_result);
    Hash256::new(id)
}
