// Transaction model
// Canonical serialization, content hashing, and the signed-tx envelope

use crate::address::Address;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::hashing::shake256_32;
use crate::{Amount, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Algorithm tag carried by ordinary signed transactions
pub const SIGNATURE_ALGORITHM: &str = "ml-dsa-87";

/// Algorithm tag that marks a coinbase; verifiers skip signature checks
pub const COINBASE_ALGORITHM: &str = "coinbase";

/// Sentinel stored in the signature slot of a coinbase
const COINBASE_SIGNATURE: &str = "coinbase";

/// Reference to a previous transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash of the transaction being spent (64 hex chars)
    pub previous_tx_hash: String,
    /// Output position within that transaction
    pub output_index: u32,
    /// Unlocking script; cleared before canonical hashing
    pub script_sig: String,
    /// Sequence number
    pub sequence: u32,
}

/// Value paid to an address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in satoshi-equivalents
    pub value: Amount,
    /// Locking script
    pub script_pub_key: String,
    /// Destination address
    pub address: Address,
}

/// Raw transaction record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Earliest instant the transaction may be included
    pub not_until: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        not_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        nonce: u64,
    ) -> Self {
        Transaction {
            version,
            inputs,
            outputs,
            not_until,
            timestamp,
            nonce,
        }
    }

    /// Canonical serialization: JSON with every `script_sig` cleared
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut canonical = self.clone();
        for input in &mut canonical.inputs {
            input.script_sig.clear();
        }
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Content hash: SHAKE-256/32 over the canonical serialization
    pub fn hash(&self) -> Result<TxHash, CoreError> {
        Ok(hex::encode(shake256_32(&self.canonical_bytes()?)))
    }

    /// Structural checks that do not need chain context
    pub fn validate_structure(&self) -> Result<(), CoreError> {
        if self.version < 1 {
            return Err(CoreError::InvalidHash(format!(
                "unsupported transaction version {}",
                self.version
            )));
        }
        if self.outputs.is_empty() {
            return Err(CoreError::InvalidHash("transaction has no outputs".into()));
        }
        for input in &self.inputs {
            if input.previous_tx_hash.len() != 64
                || hex::decode(&input.previous_tx_hash).is_err()
            {
                return Err(CoreError::InvalidHash(format!(
                    "input references malformed tx hash {:?}",
                    input.previous_tx_hash
                )));
            }
        }
        Ok(())
    }

    /// Sum of output values
    pub fn total_output_value(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// Metadata stamped onto a signed-tx envelope at signing time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEnvelopeHeader {
    pub version: u32,
    pub signed_at: DateTime<Utc>,
}

/// A transaction plus the signature that authorizes it.
///
/// `raw_tx` is the exact JSON string the signature covers; verifiers feed
/// those bytes to the signer unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub raw_tx: String,
    pub signature: String,
    pub tx_hash: TxHash,
    pub signer_public_key: String,
    pub algorithm: String,
    pub header: TxEnvelopeHeader,
}

impl SignedTransaction {
    /// Sign a transaction with a key pair
    pub fn sign(tx: &Transaction, keypair: &Keypair) -> Result<Self, CoreError> {
        let raw_tx = serde_json::to_string(tx)?;
        let signature = keypair.sign(raw_tx.as_bytes())?;
        Ok(SignedTransaction {
            raw_tx,
            signature: signature.to_hex(),
            tx_hash: tx.hash()?,
            signer_public_key: keypair.public_key().to_hex(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            header: TxEnvelopeHeader {
                version: 1,
                signed_at: Utc::now(),
            },
        })
    }

    /// Build the coinbase for a block at the given height
    pub fn coinbase(miner: Address, value: Amount, height: u64) -> Result<Self, CoreError> {
        let now = Utc::now();
        let tx = Transaction::new(
            1,
            vec![],
            vec![TxOutput {
                value,
                script_pub_key: String::new(),
                address: miner,
            }],
            now,
            now,
            height,
        );
        Ok(SignedTransaction {
            raw_tx: serde_json::to_string(&tx)?,
            signature: COINBASE_SIGNATURE.to_string(),
            tx_hash: tx.hash()?,
            signer_public_key: String::new(),
            algorithm: COINBASE_ALGORITHM.to_string(),
            header: TxEnvelopeHeader {
                version: 1,
                signed_at: now,
            },
        })
    }

    /// Decode the wrapped transaction without verifying anything
    pub fn transaction(&self) -> Result<Transaction, CoreError> {
        Ok(serde_json::from_str(&self.raw_tx)?)
    }

    pub fn is_coinbase(&self) -> bool {
        self.algorithm == COINBASE_ALGORITHM
    }

    /// Verify the envelope: signature over `raw_tx` and hash consistency.
    /// Returns the decoded transaction on success.
    pub fn verify(&self) -> Result<Transaction, CoreError> {
        let tx = self.transaction()?;

        if !self.is_coinbase() {
            let public_key = PublicKey::from_hex(&self.signer_public_key)?;
            let signature = Signature::from_hex(&self.signature)?;
            if !public_key.verify(self.raw_tx.as_bytes(), &signature) {
                return Err(CoreError::BadSignature);
            }
        }

        let computed = tx.hash()?;
        if computed != self.tx_hash {
            return Err(CoreError::HashMismatch {
                expected: self.tx_hash.clone(),
                computed,
            });
        }
        Ok(tx)
    }

    /// Approximate wire size: raw JSON plus decoded signature and key bytes
    pub fn size_bytes(&self) -> usize {
        self.raw_tx.len() + self.signature.len() / 2 + self.signer_public_key.len() / 2
    }

    /// Byte length of the canonical form (fee estimation)
    pub fn canonical_size(&self) -> Result<usize, CoreError> {
        Ok(self.transaction()?.canonical_bytes()?.len())
    }
}
