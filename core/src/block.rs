// Block model
// Fixed little-endian header hashing and the block body

use crate::error::CoreError;
use crate::hashing::{merkle_root, sha256};
use crate::transaction::SignedTransaction;
use crate::BlockHeight;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hex form of the all-zero 32-byte hash (genesis parent, empty merkle root)
pub const ZERO_HASH_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Block header. The hash preimage is
/// `version LE4 || prev(32) || merkle_root(32) || unix_secs LE8 || height LE8
/// || nonce LE8 || challenge_seed bytes || proof_hash bytes`;
/// `farmer_address` is not hashed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_block_hash: String,
    pub merkle_root: String,
    pub timestamp: DateTime<Utc>,
    pub height: BlockHeight,
    pub nonce: u64,
    pub challenge_seed: String,
    pub proof_hash: String,
    pub farmer_address: String,
}

impl BlockHeader {
    /// Deterministic content hash of the header
    pub fn hash(&self) -> String {
        let mut preimage = Vec::with_capacity(
            4 + 32 + 32 + 8 + 8 + 8 + self.challenge_seed.len() + self.proof_hash.len(),
        );
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&decode_hash_or_zero(&self.previous_block_hash));
        preimage.extend_from_slice(&decode_hash_or_zero(&self.merkle_root));
        preimage.extend_from_slice(&self.timestamp.timestamp().to_le_bytes());
        preimage.extend_from_slice(&self.height.to_le_bytes());
        preimage.extend_from_slice(&self.nonce.to_le_bytes());
        preimage.extend_from_slice(self.challenge_seed.as_bytes());
        preimage.extend_from_slice(self.proof_hash.as_bytes());
        hex::encode(sha256(&preimage))
    }
}

/// A 64-hex-char string decodes to its 32 bytes; anything else hashes as zero
fn decode_hash_or_zero(encoded: &str) -> [u8; 32] {
    if encoded.len() == 64 {
        if let Ok(bytes) = hex::decode(encoded) {
            if let Ok(raw) = <[u8; 32]>::try_from(bytes) {
                return raw;
            }
        }
    }
    [0u8; 32]
}

/// Ordered transactions plus their declared count
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<SignedTransaction>,
    pub tx_count: u32,
}

/// A complete block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// Assemble a block, stamping the body count from the transaction list
    pub fn new(header: BlockHeader, transactions: Vec<SignedTransaction>) -> Self {
        let tx_count = transactions.len() as u32;
        Block {
            header,
            body: BlockBody {
                transactions,
                tx_count,
            },
        }
    }

    /// Block hash is the header hash
    pub fn hash(&self) -> String {
        self.header.hash()
    }

    /// Merkle root over the transaction hashes, hex encoded
    pub fn compute_merkle_root(transactions: &[SignedTransaction]) -> Result<String, CoreError> {
        let mut leaves = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let bytes = hex::decode(&tx.tx_hash)
                .map_err(|e| CoreError::InvalidHash(format!("tx hash not hex: {e}")))?;
            let leaf: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CoreError::InvalidHash("tx hash must be 32 bytes".into()))?;
            leaves.push(leaf);
        }
        Ok(hex::encode(merkle_root(&leaves)))
    }
}
