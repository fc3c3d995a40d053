// BLOCK RELAY: proposal entry point and read accessors
//
// SAFETY INVARIANTS:
// 1. Every call runs to completion against a staged copy of the state and
//    commits it with one assignment; any error leaves the relay untouched
// 2. Epoch rollover is handled before the new ballot is validated or counted
// 3. Reads never mutate state
// 4. The oracle is only read, never written

use log::{debug, info, warn};
use std::collections::BTreeSet;

use relay_crypto::{merkle, Hash256};

use crate::config::{AdmissionPolicy, RelayConfig};
use crate::epoch::{EpochClock, TimeSource};
use crate::error::{RelayError, RelayResult};
use crate::finality::{Beacon, FinalizationEngine, FinalizedBlock, RoundOutcome};
use crate::oracle::{ActiveSetOracle, MemberId};
use crate::state::RelayState;
use crate::votes::{BlockProposal, VoteId};

/// What a bridge node presents alongside its proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A single identity
    Member(MemberId),

    /// Public keys of every signer backing this ballot
    SignerKeys(Vec<Vec<u8>>),
}

/// Which of a finalized block's two Merkle roots a proof targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleRootKind {
    DataRequest,
    Tally,
}

pub struct BlockRelay<O, T> {
    config: RelayConfig,
    clock: EpochClock,
    oracle: O,
    time: T,
    state: RelayState,
}

impl<O: ActiveSetOracle, T: TimeSource> BlockRelay<O, T> {
    /// Create a relay whose first round is the current epoch.
    pub fn new(config: RelayConfig, oracle: O, time: T) -> RelayResult<Self> {
        let clock = config.epoch_clock()?;
        let epoch = clock.epoch_at(time.now());
        let state = RelayState::new(epoch, oracle.count());
        info!(
            "Block relay started at epoch {} with an active set of {} ({:?} admission)",
            epoch, state.active_set_size, config.admission
        );
        Ok(BlockRelay { config, clock, oracle, time, state })
    }

    /// Rebuild a relay from `snapshot()` output.
    pub fn restore(config: RelayConfig, oracle: O, time: T, snapshot: &[u8]) -> RelayResult<Self> {
        let clock = config.epoch_clock()?;
        let state = RelayState::from_snapshot(snapshot)?;
        info!(
            "Block relay restored at round {} with {} finalized blocks",
            state.ledger.proposal_epoch(),
            state.finality.finalized_count()
        );
        Ok(BlockRelay { config, clock, oracle, time, state })
    }

    pub fn snapshot(&self) -> RelayResult<Vec<u8>> {
        self.state.to_snapshot()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Epoch of the source chain right now.
    pub fn current_epoch(&self) -> u64 {
        self.clock.epoch_at(self.time.now())
    }

    /// Submit a ballot for a block and return its vote id.
    ///
    /// If the clock has moved past the stored round, the finished round is
    /// closed first, which may finalize its leader.
    pub fn propose_block(&mut self, credentials: &Credentials, proposal: BlockProposal) -> RelayResult<VoteId> {
        let weight = self.ballot_weight(credentials)?;

        let mut staged = self.state.clone();
        let current_epoch = self.current_epoch();
        if current_epoch > staged.ledger.proposal_epoch() {
            let outcome = self.roll_over(&mut staged, current_epoch)?;
            debug!("Rollover to epoch {}: {:?}", current_epoch, outcome);
        }

        Self::check_proposal(&staged, &proposal, current_epoch)?;

        let vote_id = staged.ledger.cast(&proposal, weight);
        self.state = staged;
        Ok(vote_id)
    }

    /// Close the stored round if the clock has moved on, without casting a
    /// ballot. Returns `None` when the round is still open.
    pub fn advance_epoch(&mut self) -> RelayResult<Option<RoundOutcome>> {
        let current_epoch = self.current_epoch();
        if current_epoch <= self.state.ledger.proposal_epoch() {
            return Ok(None);
        }
        let mut staged = self.state.clone();
        let outcome = self.roll_over(&mut staged, current_epoch)?;
        self.state = staged;
        Ok(Some(outcome))
    }

    fn roll_over(&self, staged: &mut RelayState, current_epoch: u64) -> RelayResult<RoundOutcome> {
        let oracle = &self.oracle;
        let RelayState { ledger, finality, active_set_size } = staged;
        FinalizationEngine::roll_over(ledger, finality, active_set_size, current_epoch, || oracle.count())
            .map_err(RelayError::from)
    }

    fn ballot_weight(&self, credentials: &Credentials) -> RelayResult<u64> {
        match (self.config.admission, credentials) {
            (AdmissionPolicy::ActiveSet, Credentials::Member(member)) => {
                if self.oracle.is_member(member) {
                    Ok(1)
                } else {
                    warn!("Rejected ballot from non-member {}", member);
                    Err(RelayError::NotAuthorized {
                        reason: format!("{} is not an active set member", member),
                    })
                }
            }
            (AdmissionPolicy::ActiveSet, Credentials::SignerKeys(_)) => Err(RelayError::NotAuthorized {
                reason: "active set admission requires a member identity".to_string(),
            }),
            (AdmissionPolicy::SelfReported, Credentials::Member(_)) => Ok(1),
            (AdmissionPolicy::SelfReported, Credentials::SignerKeys(keys)) => {
                let distinct: BTreeSet<&[u8]> = keys.iter().map(Vec::as_slice).collect();
                if distinct.is_empty() {
                    return Err(RelayError::NotAuthorized { reason: "no signer keys presented".to_string() });
                }
                Ok(distinct.len() as u64)
            }
        }
    }

    fn check_proposal(state: &RelayState, proposal: &BlockProposal, current_epoch: u64) -> RelayResult<()> {
        if state.finality.is_finalized(&proposal.block_hash) {
            return Err(RelayError::AlreadyFinalized { block_hash: proposal.block_hash });
        }

        let floor = state.finality.beacon().map(|beacon| beacon.epoch);
        let above_tip = floor.map_or(true, |tip| proposal.epoch > tip);
        if !above_tip || proposal.epoch > current_epoch {
            return Err(RelayError::BadEpoch {
                epoch: proposal.epoch,
                lower_exclusive: floor,
                upper_inclusive: current_epoch,
            });
        }
        Ok(())
    }

    /// The beacon, if anything has been finalized.
    pub fn last_beacon(&self) -> Option<Beacon> {
        self.state.finality.beacon()
    }

    /// The beacon as an opaque `block_hash ‖ uint256(epoch)` blob.
    pub fn last_beacon_bytes(&self) -> Option<Vec<u8>> {
        self.last_beacon().map(|beacon| beacon.to_bytes().to_vec())
    }

    pub fn last_epoch(&self) -> Option<u64> {
        self.last_beacon().map(|beacon| beacon.epoch)
    }

    pub fn last_hash(&self) -> Option<Hash256> {
        self.last_beacon().map(|beacon| beacon.block_hash)
    }

    pub fn finalized_block(&self, block_hash: &Hash256) -> RelayResult<&FinalizedBlock> {
        self.state
            .finality
            .block(block_hash)
            .ok_or(RelayError::NotFound { block_hash: *block_hash })
    }

    /// Block hash finalized for `epoch`, if any.
    pub fn block_for_epoch(&self, epoch: u64) -> Option<Hash256> {
        self.state.finality.block_for_epoch(epoch).copied()
    }

    pub fn read_dr_merkle_root(&self, block_hash: &Hash256) -> RelayResult<Hash256> {
        self.finalized_block(block_hash).map(|block| block.dr_merkle_root)
    }

    pub fn read_tally_merkle_root(&self, block_hash: &Hash256) -> RelayResult<Hash256> {
        self.finalized_block(block_hash).map(|block| block.tally_merkle_root)
    }

    /// Prove a data request against a finalized block.
    ///
    /// Also requires the epoch before the current one to be finalized.
    pub fn verify_dr_poi(&self, proof: &[Hash256], block_hash: &Hash256, index: u64, leaf: &Hash256) -> RelayResult<bool> {
        let root = self.read_dr_merkle_root(block_hash)?;
        let current_epoch = self.current_epoch();
        let previous_finalized = current_epoch
            .checked_sub(1)
            .map_or(false, |previous| self.state.finality.block_for_epoch(previous).is_some());
        if !previous_finalized {
            return Err(RelayError::EpochNotFinalized { current_epoch });
        }
        Ok(merkle::verify(proof, &root, index, leaf))
    }

    /// Prove a tally against a finalized block.
    pub fn verify_tally_poi(&self, proof: &[Hash256], block_hash: &Hash256, index: u64, leaf: &Hash256) -> RelayResult<bool> {
        let root = self.read_tally_merkle_root(block_hash)?;
        Ok(merkle::verify(proof, &root, index, leaf))
    }

    pub fn verify_poi(
        &self,
        kind: MerkleRootKind,
        proof: &[Hash256],
        block_hash: &Hash256,
        index: u64,
        leaf: &Hash256,
    ) -> RelayResult<bool> {
        match kind {
            MerkleRootKind::DataRequest => self.verify_dr_poi(proof, block_hash, index, leaf),
            MerkleRootKind::Tally => self.verify_tally_poi(proof, block_hash, index, leaf),
        }
    }

    /// Whether `caller` may upgrade the relay.
    pub fn is_upgradable(&self, caller: &MemberId) -> bool {
        self.config.owner.as_ref() == Some(caller)
    }
}
