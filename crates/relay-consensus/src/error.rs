// Relay error taxonomy
//
// Two classes of failure leave a relay call:
// 1. Rejected input: the caller can retry with corrected input. Nothing was
//    written.
// 2. Invariant violation: the finalized chain could not be extended without a
//    gap or a fork. This indicates corrupted vote accounting or an adversarial
//    fork. The call is aborted and every staged write is discarded.

use relay_crypto::Hash256;
use thiserror::Error;

use crate::votes::VoteId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Block {block_hash} is already finalized")]
    AlreadyFinalized { block_hash: Hash256 },

    #[error("Voter is not authorized: {reason}")]
    NotAuthorized { reason: String },

    #[error("Bad epoch {epoch}: proposals must target ({lower_exclusive:?}, {upper_inclusive}]")]
    BadEpoch {
        epoch: u64,
        lower_exclusive: Option<u64>,
        upper_inclusive: u64,
    },

    #[error("Block {block_hash} has not been finalized")]
    NotFound { block_hash: Hash256 },

    #[error("Epoch preceding current epoch {current_epoch} is not finalized")]
    EpochNotFinalized { current_epoch: u64 },

    #[error("Invalid relay configuration: {0}")]
    InvalidConfig(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Finalization invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl RelayError {
    /// Fatal errors signal state corruption rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Invariant(_))
    }
}

/// Conditions under which the backfill walk refuses to splice a new block
/// onto the finalized chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("predecessor vote {vote_id} is unknown or was pruned")]
    UnknownPredecessor { vote_id: VoteId },

    #[error("chain reaches epoch {epoch} with block {found}, but the beacon holds {expected}")]
    ForkAtTip {
        epoch: u64,
        expected: Hash256,
        found: Hash256,
    },

    #[error("chain reaches the beacon at epoch {epoch} through vote {found}, but it was finalized under {expected:?}")]
    VoteMismatchAtTip {
        epoch: u64,
        expected: Option<VoteId>,
        found: VoteId,
    },

    #[error("chain jumps from epoch {from_epoch} to {to_epoch}, past the beacon at epoch {beacon_epoch}")]
    Overshoot {
        from_epoch: u64,
        to_epoch: u64,
        beacon_epoch: u64,
    },

    #[error("chain ends without a predecessor while the beacon sits at epoch {beacon_epoch}")]
    Unanchored { beacon_epoch: u64 },

    #[error("predecessor at epoch {predecessor_epoch} does not precede its successor at epoch {successor_epoch}")]
    NonDecreasingEpoch {
        successor_epoch: u64,
        predecessor_epoch: u64,
    },

    #[error("leader for epoch {epoch} does not extend the beacon at epoch {beacon_epoch}")]
    StaleLeader { epoch: u64, beacon_epoch: u64 },

    #[error("backfill exceeded its bound of {bound} steps")]
    BackfillBoundExceeded { bound: u64 },

    #[error("block {block_hash} would be finalized twice")]
    DuplicateFinalization { block_hash: Hash256 },
}

pub type RelayResult<T> = Result<T, RelayError>;
