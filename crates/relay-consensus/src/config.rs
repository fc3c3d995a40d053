// Relay configuration

use serde::{Deserialize, Serialize};

use crate::epoch::EpochClock;
use crate::error::RelayResult;
use crate::oracle::MemberId;

/// Who may vote, and with what weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Voters must be current active-set members; each ballot weighs 1
    #[default]
    ActiveSet,

    /// Anyone may vote; the weight is the number of distinct signer keys
    SelfReported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Unix timestamp at which source-chain epoch 0 starts
    pub genesis_time: u64,

    /// Source-chain epoch length in seconds
    pub epoch_duration: u64,

    pub admission: AdmissionPolicy,

    /// Identity allowed to upgrade the relay
    pub owner: Option<MemberId>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            genesis_time: 0,
            epoch_duration: 45,
            admission: AdmissionPolicy::ActiveSet,
            owner: None,
        }
    }
}

impl RelayConfig {
    /// Validate the configuration and derive its epoch clock.
    pub fn epoch_clock(&self) -> RelayResult<EpochClock> {
        EpochClock::new(self.genesis_time, self.epoch_duration)
    }
}
