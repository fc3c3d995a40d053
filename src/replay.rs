// Scripted relay replay
//
// Drives a relay through a recorded sequence of ballots on a manual clock.
// Used by the `replay` subcommand to reproduce and inspect finalization runs.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use relay_consensus::{
    Beacon, BlockProposal, BlockRelay, Credentials, ManualClock, MemberId, RelayConfig, RelayError,
    RoundOutcome, StaticActiveSet, VoteId,
};
use relay_crypto::{CryptoError, Hash256};

/// One recorded ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Unix time at which the ballot is submitted
    pub at: u64,
    #[serde(default)]
    pub voter: Option<String>,
    /// Hex encoded signer public keys, used instead of `voter`
    #[serde(default)]
    pub signers: Vec<String>,
    pub block_hash: Hash256,
    pub epoch: u64,
    pub dr_root: Hash256,
    pub tally_root: Hash256,
    #[serde(default)]
    pub previous_vote: Option<VoteId>,
}

impl ReplayStep {
    fn credentials(&self) -> Result<Credentials, ReplayError> {
        match &self.voter {
            Some(voter) => Ok(Credentials::Member(MemberId::new(voter.as_str()))),
            None => {
                let keys = self
                    .signers
                    .iter()
                    .map(|key| {
                        hex::decode(key.trim_start_matches("0x"))
                            .map_err(|e| CryptoError::InvalidHex(e.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Credentials::SignerKeys(keys))
            }
        }
    }

    fn proposal(&self) -> BlockProposal {
        BlockProposal {
            block_hash: self.block_hash,
            epoch: self.epoch,
            dr_merkle_root: self.dr_root,
            tally_merkle_root: self.tally_root,
            previous_vote_id: self.previous_vote,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Malformed step: {0}")]
    Step(#[from] CryptoError),

    /// `index` equals the step count when closing the last round failed
    #[error("Step {index} aborted the run: {source}")]
    Fatal { index: usize, source: RelayError },

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Accepted(VoteId),
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub steps: Vec<StepResult>,
    /// Outcome of closing the last round, if the script moved past it
    pub final_round: Option<RoundOutcome>,
    pub beacon: Option<Beacon>,
    pub finalized_epochs: Vec<(u64, Hash256)>,
}

/// Replay `steps` against a fresh relay.
///
/// The active set holds every named voter; `active_set_size` overrides its
/// size when given. After the last step the clock moves one epoch forward so
/// the final round is closed too. Rejected ballots are recorded and skipped;
/// a fatal invariant violation aborts the run.
pub fn run(
    config: RelayConfig,
    steps: &[ReplayStep],
    active_set_size: Option<u64>,
) -> Result<ReplayReport, ReplayError> {
    let voters: BTreeSet<&str> = steps.iter().filter_map(|s| s.voter.as_deref()).collect();
    let active_set = StaticActiveSet::with_members(voters);
    if let Some(size) = active_set_size {
        active_set.set_size(size);
    }

    let clock = config.epoch_clock()?;
    let start = steps.first().map(|s| s.at).unwrap_or(config.genesis_time);
    let time = ManualClock::new(start);
    let mut relay = BlockRelay::new(config, active_set, time.clone())?;

    let mut results = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        time.set(step.at);
        let credentials = step.credentials()?;
        match relay.propose_block(&credentials, step.proposal()) {
            Ok(vote_id) => results.push(StepResult::Accepted(vote_id)),
            Err(source) if source.is_fatal() => return Err(ReplayError::Fatal { index, source }),
            Err(err) => {
                warn!("Step {} rejected: {}", index, err);
                results.push(StepResult::Rejected(err.to_string()));
            }
        }
    }

    let last_epoch = relay.current_epoch();
    time.set(clock.epoch_start_time(last_epoch.saturating_add(1)));
    let final_round = match relay.advance_epoch() {
        Ok(outcome) => outcome,
        Err(source) if source.is_fatal() => return Err(ReplayError::Fatal { index: steps.len(), source }),
        Err(err) => return Err(err.into()),
    };

    let beacon = relay.last_beacon();
    if let Some(beacon) = &beacon {
        info!("Replay finished with beacon {} at epoch {}", beacon.block_hash, beacon.epoch);
    }
    let finalized_epochs = relay
        .state()
        .finality
        .finalized_epochs()
        .map(|(epoch, hash)| (epoch, *hash))
        .collect();

    Ok(ReplayReport { steps: results, final_round, beacon, finalized_epochs })
}
