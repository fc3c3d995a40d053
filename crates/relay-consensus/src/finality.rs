// FINALITY: epoch rollover, quorum check and chain backfill
//
// SAFETY INVARIANTS:
// 1. A finalized block is immutable; a second write for the same hash is fatal
// 2. A block finalizes only when 3 * votes > 2 * active_set_size
// 3. The finalized chain is linked: every newly finalized block's ancestry
//    walks back, through strictly decreasing epochs, onto the vote under
//    which the current beacon was finalized
// 4. The beacon only moves forward
// 5. Round tallies are discarded at every rollover, whether or not the round
//    produced a finalized block

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use relay_crypto::Hash256;

use crate::error::InvariantViolation;
use crate::votes::{Candidate, VoteId, VoteLedger};

/// Width of an encoded beacon: block hash followed by the epoch as a 256-bit word.
pub const BEACON_BYTES: usize = 64;

/// Stored commitment of a finalized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBlock {
    /// Vote under which the block was finalized
    pub vote_id: VoteId,
    pub block_hash: Hash256,
    pub epoch: u64,
    pub dr_merkle_root: Hash256,
    pub tally_merkle_root: Hash256,
    pub previous_vote_id: Option<VoteId>,
}

impl From<&Candidate> for FinalizedBlock {
    fn from(candidate: &Candidate) -> Self {
        FinalizedBlock {
            vote_id: candidate.vote_id,
            block_hash: candidate.block_hash,
            epoch: candidate.epoch,
            dr_merkle_root: candidate.dr_merkle_root,
            tally_merkle_root: candidate.tally_merkle_root,
            previous_vote_id: candidate.previous_vote_id,
        }
    }
}

/// Tip of the finalized chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub block_hash: Hash256,
    pub epoch: u64,
}

impl Beacon {
    /// Opaque encoding handed out for external signing:
    /// `block_hash ‖ uint256(epoch)`, big-endian.
    pub fn to_bytes(&self) -> [u8; BEACON_BYTES] {
        let mut bytes = [0u8; BEACON_BYTES];
        bytes[..32].copy_from_slice(self.block_hash.as_bytes());
        bytes[32..].copy_from_slice(Hash256::from_u64(self.epoch).as_bytes());
        bytes
    }
}

/// The finality record: finalized blocks, the epoch index and the beacon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalityState {
    /// Finalized blocks by hash
    blocks: HashMap<Hash256, FinalizedBlock>,

    /// Finalized block hash per epoch
    epochs: BTreeMap<u64, Hash256>,

    /// Most recently finalized block
    beacon: Option<Beacon>,
}

impl FinalityState {
    pub fn beacon(&self) -> Option<Beacon> {
        self.beacon
    }

    pub fn block(&self, block_hash: &Hash256) -> Option<&FinalizedBlock> {
        self.blocks.get(block_hash)
    }

    pub fn is_finalized(&self, block_hash: &Hash256) -> bool {
        self.blocks.contains_key(block_hash)
    }

    pub fn block_for_epoch(&self, epoch: u64) -> Option<&Hash256> {
        self.epochs.get(&epoch)
    }

    pub fn finalized_epochs(&self) -> impl Iterator<Item = (u64, &Hash256)> {
        self.epochs.iter().map(|(epoch, hash)| (*epoch, hash))
    }

    pub fn finalized_count(&self) -> usize {
        self.blocks.len()
    }

    fn record(&mut self, block: FinalizedBlock) -> Result<(), InvariantViolation> {
        if self.blocks.contains_key(&block.block_hash) {
            return Err(InvariantViolation::DuplicateFinalization { block_hash: block.block_hash });
        }
        self.epochs.insert(block.epoch, block.block_hash);
        self.blocks.insert(block.block_hash, block);
        Ok(())
    }
}

/// Strict two-thirds supermajority: `3 * votes > 2 * active_set_size`.
pub fn quorum_reached(votes: u64, active_set_size: u64) -> bool {
    3 * u128::from(votes) > 2 * u128::from(active_set_size)
}

/// What a rollover did with the finished round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Nobody voted in the finished round
    Empty,

    /// The leader fell short of quorum
    Skipped { leader: VoteId, votes: u64, active_set_size: u64 },

    /// The leader was finalized, together with any recovered ancestors
    Finalized { beacon: Beacon, backfilled: Vec<u64> },
}

/// Runs the end-of-round finalization against a staged copy of the relay
/// state. Any error leaves the copy half-written; callers discard it.
pub struct FinalizationEngine;

impl FinalizationEngine {
    /// Close the round held by `ledger` and open the one for `new_epoch`.
    ///
    /// `active_set_size` is the quorum denominator snapshot; on finalization it
    /// is refreshed from `refresh_active_set`.
    pub fn roll_over(
        ledger: &mut VoteLedger,
        finality: &mut FinalityState,
        active_set_size: &mut u64,
        new_epoch: u64,
        refresh_active_set: impl FnOnce() -> u64,
    ) -> Result<RoundOutcome, InvariantViolation> {
        let closed_epoch = ledger.proposal_epoch();

        let outcome = match ledger.leader().cloned() {
            None => {
                info!("Round for epoch {} closed without votes", closed_epoch);
                RoundOutcome::Empty
            }
            Some(leader) => {
                let votes = ledger.votes_for(&leader.vote_id);
                if quorum_reached(votes, *active_set_size) {
                    let backfilled = Self::finalize(ledger, finality, &leader, new_epoch)?;
                    *active_set_size = refresh_active_set();
                    let pruned = ledger.prune_below(leader.epoch);
                    info!(
                        "Finalized block {} for epoch {} with {} votes ({} backfilled, {} candidates pruned, active set now {})",
                        leader.block_hash,
                        leader.epoch,
                        votes,
                        backfilled.len(),
                        pruned,
                        active_set_size
                    );
                    RoundOutcome::Finalized {
                        beacon: Beacon { block_hash: leader.block_hash, epoch: leader.epoch },
                        backfilled,
                    }
                } else {
                    warn!(
                        "Round for epoch {} skipped: leader {} has {} of {} votes",
                        closed_epoch, leader.vote_id, votes, active_set_size
                    );
                    RoundOutcome::Skipped {
                        leader: leader.vote_id,
                        votes,
                        active_set_size: *active_set_size,
                    }
                }
            }
        };

        ledger.start_round(new_epoch);
        Ok(outcome)
    }

    /// Write the leader and every not-yet-finalized ancestor, then move the
    /// beacon. Returns the epochs recovered by backfill, newest first.
    fn finalize(
        ledger: &VoteLedger,
        finality: &mut FinalityState,
        leader: &Candidate,
        current_epoch: u64,
    ) -> Result<Vec<u64>, InvariantViolation> {
        let tip = finality.beacon;
        let tip_vote = tip.and_then(|beacon| finality.block(&beacon.block_hash)).map(|block| block.vote_id);

        if let Some(beacon) = tip {
            if leader.epoch <= beacon.epoch {
                error!("Leader for epoch {} does not extend beacon at epoch {}", leader.epoch, beacon.epoch);
                return Err(InvariantViolation::StaleLeader { epoch: leader.epoch, beacon_epoch: beacon.epoch });
            }
        }

        finality.record(FinalizedBlock::from(leader))?;

        // No chain can hold more unfinalized epochs than lie between the tip
        // and the current epoch.
        let bound = match tip {
            Some(beacon) => current_epoch.saturating_sub(beacon.epoch),
            None => current_epoch.saturating_add(1),
        };

        let mut backfilled = Vec::new();
        let mut successor_epoch = leader.epoch;
        let mut cursor = leader.previous_vote_id;

        let anchor = loop {
            let Some(vote_id) = cursor else {
                break None;
            };
            let Some(ancestor) = ledger.candidate(&vote_id) else {
                error!("Backfill cannot resolve predecessor vote {}", vote_id);
                return Err(InvariantViolation::UnknownPredecessor { vote_id });
            };

            if ancestor.epoch >= successor_epoch {
                error!(
                    "Backfill found predecessor at epoch {} for successor at epoch {}",
                    ancestor.epoch, successor_epoch
                );
                return Err(InvariantViolation::NonDecreasingEpoch {
                    successor_epoch,
                    predecessor_epoch: ancestor.epoch,
                });
            }

            if tip.map_or(false, |beacon| ancestor.epoch <= beacon.epoch) {
                break Some(ancestor);
            }

            // Unreachable while candidate epochs stay within the clock
            if backfilled.len() as u64 >= bound {
                error!("Backfill exceeded its bound of {} steps", bound);
                return Err(InvariantViolation::BackfillBoundExceeded { bound });
            }

            info!("Backfilling block {} for epoch {}", ancestor.block_hash, ancestor.epoch);
            finality.record(FinalizedBlock::from(ancestor))?;
            backfilled.push(ancestor.epoch);
            successor_epoch = ancestor.epoch;
            cursor = ancestor.previous_vote_id;
        };

        Self::check_convergence(tip, tip_vote, anchor, successor_epoch)?;

        finality.beacon = Some(Beacon { block_hash: leader.block_hash, epoch: leader.epoch });
        Ok(backfilled)
    }

    /// The walk must land exactly on the existing beacon: same epoch, same
    /// block, same vote.
    fn check_convergence(
        tip: Option<Beacon>,
        tip_vote: Option<VoteId>,
        anchor: Option<&Candidate>,
        last_epoch: u64,
    ) -> Result<(), InvariantViolation> {
        match (tip, anchor) {
            (None, None) => Ok(()),
            (Some(beacon), Some(ancestor)) if ancestor.epoch == beacon.epoch => {
                if ancestor.block_hash == beacon.block_hash {
                    match tip_vote {
                        Some(expected) if expected == ancestor.vote_id => Ok(()),
                        _ => {
                            error!(
                                "Chain reaches beacon block {} through vote {}, which was never finalized",
                                beacon.block_hash, ancestor.vote_id
                            );
                            Err(InvariantViolation::VoteMismatchAtTip {
                                epoch: beacon.epoch,
                                expected: tip_vote,
                                found: ancestor.vote_id,
                            })
                        }
                    }
                } else {
                    error!(
                        "Fork at epoch {}: chain reaches {}, beacon holds {}",
                        beacon.epoch, ancestor.block_hash, beacon.block_hash
                    );
                    Err(InvariantViolation::ForkAtTip {
                        epoch: beacon.epoch,
                        expected: beacon.block_hash,
                        found: ancestor.block_hash,
                    })
                }
            }
            (Some(beacon), Some(ancestor)) => {
                error!(
                    "Chain skips the beacon at epoch {}: jumps from {} to {}",
                    beacon.epoch, last_epoch, ancestor.epoch
                );
                Err(InvariantViolation::Overshoot {
                    from_epoch: last_epoch,
                    to_epoch: ancestor.epoch,
                    beacon_epoch: beacon.epoch,
                })
            }
            (Some(beacon), None) => {
                error!("Chain ends before reaching the beacon at epoch {}", beacon.epoch);
                Err(InvariantViolation::Unanchored { beacon_epoch: beacon.epoch })
            }
            // With no beacon every ancestor is newer than the tip, so the
            // walk only stops at the chain start.
            (None, Some(ancestor)) => Err(InvariantViolation::Overshoot {
                from_epoch: last_epoch,
                to_epoch: ancestor.epoch,
                beacon_epoch: 0,
            }),
        }
    }
}
