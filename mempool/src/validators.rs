// Pluggable transaction validators
// Applied in registration order; the first failure is recorded on the entry

use chrono::{Duration, Utc};
use umbra_core::SignedTransaction;

/// A named admission check. Failures are diagnostic: the pool still admits
/// the transaction and records the cause.
pub trait TxValidator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, tx: &SignedTransaction) -> Result<(), String>;
}

/// Structural sanity: version, outputs, input hash encoding
pub struct StructureValidator;

impl TxValidator for StructureValidator {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn validate(&self, tx: &SignedTransaction) -> Result<(), String> {
        if tx.is_coinbase() {
            return Err("coinbase transactions are not accepted from the network".into());
        }
        let decoded = tx.transaction().map_err(|e| e.to_string())?;
        decoded.validate_structure().map_err(|e| e.to_string())
    }
}

/// Signature over the raw bytes and hash consistency
pub struct SignatureValidator;

impl TxValidator for SignatureValidator {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn validate(&self, tx: &SignedTransaction) -> Result<(), String> {
        tx.verify().map(|_| ()).map_err(|e| e.to_string())
    }
}

/// `not_until` must have passed and the timestamp must not be far future
pub struct TimingValidator {
    pub max_future_drift: Duration,
}

impl Default for TimingValidator {
    fn default() -> Self {
        TimingValidator {
            max_future_drift: Duration::minutes(2),
        }
    }
}

impl TxValidator for TimingValidator {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn validate(&self, tx: &SignedTransaction) -> Result<(), String> {
        let decoded = tx.transaction().map_err(|e| e.to_string())?;
        let now = Utc::now();
        if decoded.not_until > now {
            return Err(format!(
                "locked until {} which is in the future",
                decoded.not_until
            ));
        }
        if decoded.timestamp > now + self.max_future_drift {
            return Err(format!("timestamp {} too far in the future", decoded.timestamp));
        }
        Ok(())
    }
}

/// Per-transaction byte ceiling
pub struct SizeValidator {
    pub max_tx_bytes: usize,
}

impl Default for SizeValidator {
    fn default() -> Self {
        SizeValidator {
            max_tx_bytes: 256 * 1024,
        }
    }
}

impl TxValidator for SizeValidator {
    fn name(&self) -> &'static str {
        "size"
    }

    fn validate(&self, tx: &SignedTransaction) -> Result<(), String> {
        let size = tx.size_bytes();
        if size > self.max_tx_bytes {
            return Err(format!("{size} bytes exceeds limit {}", self.max_tx_bytes));
        }
        Ok(())
    }
}

/// The standard validator set, in application order
pub fn default_validators() -> Vec<Box<dyn TxValidator>> {
    vec![
        Box::new(StructureValidator),
        Box::new(SizeValidator::default()),
        Box::new(TimingValidator::default()),
        Box::new(SignatureValidator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use umbra_core::{Address, Keypair, Seed, Transaction, TxInput, TxOutput, SEED_SIZE};

    fn signed_sample(not_until_offset_secs: i64) -> SignedTransaction {
        let keypair = Keypair::from_seed(&Seed::from_bytes([9u8; SEED_SIZE]));
        let now = Utc::now();
        let tx = Transaction::new(
            1,
            vec![TxInput {
                previous_tx_hash: "b".repeat(64),
                output_index: 0,
                script_sig: String::new(),
                sequence: 0,
            }],
            vec![TxOutput {
                value: 10,
                script_pub_key: String::new(),
                address: Address::from_public_key(b"dest"),
            }],
            now + Duration::seconds(not_until_offset_secs),
            now,
            1,
        );
        SignedTransaction::sign(&tx, &keypair).unwrap()
    }

    #[test]
    fn test_good_tx_passes_all() {
        let tx = signed_sample(-5);
        for validator in default_validators() {
            assert!(
                validator.validate(&tx).is_ok(),
                "validator {} rejected a good tx",
                validator.name()
            );
        }
    }

    #[test]
    fn test_timing_flags_future_lock() {
        let tx = signed_sample(3600);
        assert!(TimingValidator::default().validate(&tx).is_err());
    }

    #[test]
    fn test_signature_flags_tampering() {
        let mut tx = signed_sample(-5);
        tx.raw_tx = tx.raw_tx.replace("\"value\":10", "\"value\":11");
        assert!(SignatureValidator.validate(&tx).is_err());
    }

    #[test]
    fn test_structure_flags_coinbase() {
        let coinbase =
            SignedTransaction::coinbase(Address::from_public_key(b"m"), 1, 0).unwrap();
        assert!(StructureValidator.validate(&coinbase).is_err());
    }

    #[test]
    fn test_size_limit() {
        let tx = signed_sample(-5);
        let strict = SizeValidator { max_tx_bytes: 16 };
        assert!(strict.validate(&tx).is_err());
    }
}
