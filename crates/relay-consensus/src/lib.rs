pub mod config;
pub mod epoch;
pub mod error;
pub mod finality;
pub mod oracle;
pub mod relay;
pub mod state;
pub mod votes;

pub use config::{AdmissionPolicy, RelayConfig};
pub use epoch::{EpochClock, ManualClock, SystemTime, TimeSource};
pub use error::{InvariantViolation, RelayError, RelayResult};
pub use finality::{quorum_reached, Beacon, FinalityState, FinalizationEngine, FinalizedBlock, RoundOutcome};
pub use oracle::{ActiveSetOracle, MemberId, StaticActiveSet};
pub use relay::{BlockRelay, Credentials, MerkleRootKind};
pub use state::RelayState;
pub use votes::{BlockProposal, Candidate, VoteId, VoteLedger};
