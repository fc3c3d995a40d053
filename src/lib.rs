//! Witnet block relay.
//!
//! Bridge nodes propose the header commitments of Witnet epochs; the relay
//! finalizes a proposal once more than two thirds of the active set backs it
//! and serves Merkle inclusion proofs against the finalized roots.

pub mod replay;
pub mod settings;

pub use relay_consensus as consensus;
pub use relay_crypto as crypto;

pub use relay_consensus::{BlockProposal, BlockRelay, Credentials, RelayConfig, RelayError};
pub use relay_crypto::Hash256;
