// Farming service
// Answers storage challenges by signing them with plotted keys

pub mod service;

pub use service::{
    ChallengeResponder, FarmingConfig, FarmingService, FarmingStats, PlotSummary,
};

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use umbra_core::hashing::sha256;
use umbra_core::{Identifier, PublicKey, Signature};
use umbra_plot::{IndexError, PlotError};

#[derive(Error, Debug)]
pub enum FarmingError {
    #[error("no plot entry matches the challenge")]
    NoMatch,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signer failure: {0}")]
    SignerFailure(String),
    #[error("challenge queue is full")]
    Busy,
    #[error("challenge timed out")]
    Timeout,
    #[error("farming service stopped")]
    ServiceStopped,
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("plot error: {0}")]
    Plot(#[from] PlotError),
}

/// A storage challenge to be answered from plotted keys
#[derive(Clone, Debug)]
pub struct Challenge {
    pub id: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Reserved difficulty scalar; unused by the core
    pub difficulty: u64,
}

impl Challenge {
    pub fn new(payload: Vec<u8>) -> Self {
        Challenge {
            id: hex::encode(sha256(&payload)),
            payload,
            timestamp: Utc::now(),
            difficulty: 0,
        }
    }
}

/// Evidence that a farmer holds the key a challenge selected
#[derive(Clone, Debug)]
pub struct ProofOfStorage {
    pub challenge: Vec<u8>,
    pub plot_path: PathBuf,
    pub offset: u64,
    pub identifier: Identifier,
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl ProofOfStorage {
    /// Signature and identifier consistency check
    pub fn verify(&self) -> bool {
        self.public_key.identifier() == self.identifier
            && self.public_key.verify(&self.challenge, &self.signature)
    }

    /// Tie-breaking quality; lower is better
    pub fn quality(&self) -> u64 {
        quality(&self.challenge, self.signature.as_bytes())
    }
}

/// Big-endian first 8 bytes of `SHA-256(challenge || signature)`
pub fn quality(challenge: &[u8], signature: &[u8]) -> u64 {
    let mut preimage = challenge.to_vec();
    preimage.extend_from_slice(signature);
    let digest = sha256(&preimage);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_id_is_content_derived() {
        let a = Challenge::new(b"payload".to_vec());
        let b = Challenge::new(b"payload".to_vec());
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, Challenge::new(b"other".to_vec()).id);
    }

    #[test]
    fn test_quality_matches_digest_prefix() {
        let q = quality(b"chal", b"sig");
        let mut preimage = b"chal".to_vec();
        preimage.extend_from_slice(b"sig");
        let digest = sha256(&preimage);
        assert_eq!(q.to_be_bytes(), digest[..8]);
    }

    #[test]
    fn test_quality_varies_with_signature() {
        assert_ne!(quality(b"chal", b"sig-a"), quality(b"chal", b"sig-b"));
    }
}
