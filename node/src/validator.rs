// Block validator
// Policy checks applied before a block enters the chain store

use chrono::{Duration, Utc};
use thiserror::Error;
use umbra_core::{Amount, Block};
use umbra_tokenomics::{block_reward, estimate_fee_at_rate, DEFAULT_FEE_RATE_PER_BYTE};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("block has no coinbase")]
    MissingCoinbase,
    #[error("coinbase must be transaction 0, found one at index {0}")]
    MisplacedCoinbase(usize),
    #[error("coinbase value mismatch: expected {expected}, got {actual}")]
    WrongCoinbaseValue { expected: Amount, actual: Amount },
    #[error("invalid transaction {hash}: {cause}")]
    InvalidTransaction { hash: String, cause: String },
    #[error("block timestamp is too far in the future")]
    FutureTimestamp,
    #[error("block timestamp is too old")]
    TooOldTimestamp,
    #[error("block is missing proof material")]
    EmptyProof,
}

/// Block validator with configurable rules
pub struct BlockValidator {
    fee_rate: Amount,
    /// Tolerated clock skew into the future
    max_timestamp_drift: Duration,
    /// Oldest acceptable block timestamp relative to now
    max_block_age: Duration,
}

impl Default for BlockValidator {
    fn default() -> Self {
        BlockValidator {
            fee_rate: DEFAULT_FEE_RATE_PER_BYTE,
            max_timestamp_drift: Duration::minutes(2),
            max_block_age: Duration::hours(2),
        }
    }
}

impl BlockValidator {
    pub fn new(fee_rate: Amount) -> Self {
        BlockValidator {
            fee_rate,
            ..Default::default()
        }
    }

    /// Validate block policy. Linkage and merkle integrity are the chain
    /// store's job; this checks everything else.
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        // 1. Exactly one coinbase, at index 0
        let Some(first) = block.body.transactions.first() else {
            return Err(ValidationError::MissingCoinbase);
        };
        if !first.is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }
        if let Some(stray) = block.body.transactions[1..]
            .iter()
            .position(|tx| tx.is_coinbase())
        {
            return Err(ValidationError::MisplacedCoinbase(stray + 1));
        }

        // 2. Every transaction verifies; collect fees along the way
        let mut total_fees: Amount = 0;
        for tx in &block.body.transactions[1..] {
            tx.verify().map_err(|e| ValidationError::InvalidTransaction {
                hash: tx.tx_hash.clone(),
                cause: e.to_string(),
            })?;
            total_fees += estimate_fee_at_rate(tx, self.fee_rate).map_err(|e| {
                ValidationError::InvalidTransaction {
                    hash: tx.tx_hash.clone(),
                    cause: e.to_string(),
                }
            })?;
        }

        // 3. Coinbase pays exactly reward + fees. Genesis carries a fixed
        //    allocation instead and is exempt.
        let coinbase = first
            .verify()
            .map_err(|e| ValidationError::InvalidTransaction {
                hash: first.tx_hash.clone(),
                cause: e.to_string(),
            })?;
        if block.header.height > 0 {
            let expected = block_reward(block.header.height) + total_fees;
            let actual = coinbase.total_output_value();
            if actual != expected {
                return Err(ValidationError::WrongCoinbaseValue { expected, actual });
            }
        }

        // 4. Timestamp bounds; genesis is exempt
        if block.header.height > 0 {
            let now = Utc::now();
            if block.header.timestamp > now + self.max_timestamp_drift {
                return Err(ValidationError::FutureTimestamp);
            }
            if block.header.timestamp < now - self.max_block_age {
                return Err(ValidationError::TooOldTimestamp);
            }
        }

        // 5. Proof material present
        if block.header.challenge_seed.is_empty() || block.header.proof_hash.is_empty() {
            return Err(ValidationError::EmptyProof);
        }

        Ok(())
    }
}
