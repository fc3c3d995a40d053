// Relay state and snapshots
//
// Everything the relay mutates lives in one value so a call can stage its
// writes on a copy and commit them with a single assignment.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::finality::FinalityState;
use crate::votes::VoteLedger;

/// Snapshot layout version, bumped whenever `RelayState` changes shape.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayState {
    /// Current round ballots and the candidate archive
    pub ledger: VoteLedger,

    /// Finalized blocks, epoch index and beacon
    pub finality: FinalityState,

    /// Quorum denominator, refreshed from the oracle on each finalization
    pub active_set_size: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    state: RelayState,
}

impl RelayState {
    pub fn new(proposal_epoch: u64, active_set_size: u64) -> Self {
        RelayState {
            ledger: VoteLedger::new(proposal_epoch),
            finality: FinalityState::default(),
            active_set_size,
        }
    }

    pub fn to_snapshot(&self) -> RelayResult<Vec<u8>> {
        bincode::serialize(&Snapshot { version: SNAPSHOT_VERSION, state: self.clone() })
            .map_err(|e| RelayError::Snapshot(e.to_string()))
    }

    pub fn from_snapshot(bytes: &[u8]) -> RelayResult<Self> {
        let snapshot: Snapshot =
            bincode::deserialize(bytes).map_err(|e| RelayError::Snapshot(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RelayError::Snapshot(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot.state)
    }
}
