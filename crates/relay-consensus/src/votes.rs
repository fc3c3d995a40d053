// Vote ledger - per-round ballot aggregation
//
// SAFETY INVARIANTS:
// 1. A candidate's vote id is always reproducible from its fields
// 2. Identical proposals collapse onto one candidate (ballot deduplication)
// 3. The round leader changes only when a candidate strictly exceeds it
// 4. Round tallies never outlive their proposal epoch

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use relay_crypto::{vote_id, Hash256};

/// Identifier of a unique proposed block content tuple.
pub type VoteId = Hash256;

/// The content a bridge node proposes for an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposal {
    pub block_hash: Hash256,
    pub epoch: u64,
    pub dr_merkle_root: Hash256,
    pub tally_merkle_root: Hash256,
    /// Vote of the block this one extends; `None` extends the empty chain
    #[serde(default)]
    pub previous_vote_id: Option<VoteId>,
}

impl BlockProposal {
    pub fn vote_id(&self) -> VoteId {
        vote_id(
            &self.block_hash,
            self.epoch,
            &self.dr_merkle_root,
            &self.tally_merkle_root,
            self.previous_vote_id.as_ref(),
        )
    }
}

/// A proposal that received at least one vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub vote_id: VoteId,
    /// Votes gathered in the most recent round that saw this candidate
    pub number_of_votes: u64,
    pub block_hash: Hash256,
    pub dr_merkle_root: Hash256,
    pub tally_merkle_root: Hash256,
    pub previous_vote_id: Option<VoteId>,
    pub epoch: u64,
}

impl Candidate {
    fn from_proposal(vote_id: VoteId, proposal: &BlockProposal) -> Self {
        Candidate {
            vote_id,
            number_of_votes: 0,
            block_hash: proposal.block_hash,
            dr_merkle_root: proposal.dr_merkle_root,
            tally_merkle_root: proposal.tally_merkle_root,
            previous_vote_id: proposal.previous_vote_id,
            epoch: proposal.epoch,
        }
    }

    /// Recompute the vote id from the candidate's fields.
    pub fn recompute_vote_id(&self) -> VoteId {
        vote_id(
            &self.block_hash,
            self.epoch,
            &self.dr_merkle_root,
            &self.tally_merkle_root,
            self.previous_vote_id.as_ref(),
        )
    }
}

/// Ballots for the current proposal round plus the archive of every candidate
/// that may still be referenced as a predecessor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteLedger {
    /// Clock epoch during which the current round accepts votes
    proposal_epoch: u64,

    /// Vote tallies of the current round
    round: HashMap<VoteId, u64>,

    /// Leading candidate of the current round
    leader: Option<VoteId>,

    /// Candidates by vote id, kept across rounds for ancestry resolution
    archive: HashMap<VoteId, Candidate>,
}

impl VoteLedger {
    pub fn new(proposal_epoch: u64) -> Self {
        VoteLedger { proposal_epoch, ..Default::default() }
    }

    pub fn proposal_epoch(&self) -> u64 {
        self.proposal_epoch
    }

    /// Add `weight` votes to a proposal and return its vote id.
    pub fn cast(&mut self, proposal: &BlockProposal, weight: u64) -> VoteId {
        let id = proposal.vote_id();

        let tally = self.round.entry(id).or_insert(0);
        *tally = tally.saturating_add(weight);
        let votes = *tally;

        let candidate = self
            .archive
            .entry(id)
            .or_insert_with(|| Candidate::from_proposal(id, proposal));
        candidate.number_of_votes = votes;

        let leader_votes = self.leader.and_then(|leader| self.round.get(&leader).copied());
        match leader_votes {
            Some(current) if self.leader != Some(id) && votes > current => {
                debug!("Vote {} overtakes the round leader with {} votes", id, votes);
                self.leader = Some(id);
            }
            None => self.leader = Some(id),
            _ => {}
        }

        debug!("Vote {} for epoch {} now has {} votes", id, proposal.epoch, votes);
        id
    }

    /// The current round leader, with its tally.
    pub fn leader(&self) -> Option<&Candidate> {
        self.leader.and_then(|id| self.archive.get(&id))
    }

    /// Votes gathered in the current round for `id`.
    pub fn votes_for(&self, id: &VoteId) -> u64 {
        self.round.get(id).copied().unwrap_or(0)
    }

    pub fn round_size(&self) -> usize {
        self.round.len()
    }

    pub fn candidate(&self, id: &VoteId) -> Option<&Candidate> {
        self.archive.get(id)
    }

    pub fn archived_count(&self) -> usize {
        self.archive.len()
    }

    /// Discard the current round and open a new one.
    pub fn start_round(&mut self, proposal_epoch: u64) {
        self.round.clear();
        self.leader = None;
        self.proposal_epoch = proposal_epoch;
    }

    /// Drop archived candidates that can no longer extend the chain.
    pub fn prune_below(&mut self, epoch: u64) -> usize {
        let before = self.archive.len();
        self.archive.retain(|_, candidate| candidate.epoch >= epoch);
        before - self.archive.len()
    }
}
