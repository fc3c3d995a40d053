pub mod error;
pub mod hash;
pub mod merkle;
pub mod vote;

pub use error::{CryptoError, CryptoResult};
pub use hash::{combine, sha256, Hash256, HASH_LEN};
pub use merkle::{verify, MerkleProof, MerkleTree};
pub use vote::vote_id;
