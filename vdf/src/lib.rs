// Wesolowski VDF
// Sequential-squaring delay function over an RSA group with a short proof

pub mod worker;

pub use worker::{spawn_worker, VdfHandle, VdfJob, VdfSolution};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use umbra_core::hashing::{sha3_256, shake256_into};

/// 512-bit modulus for tests and dev mode. Far too small to be sound;
/// production deployments supply a trusted 2048-bit RSA modulus.
pub const DEV_MODULUS_HEX: &str = "f2c4b1a7d89e5f3160b8daecc5a2f7418d96e30b57c1449aa8e265f09b3d7c21\
e5a90487dd16fb23c8a47250f1e6b9834dd0c5e2a6178f4bb92d83615c40ae8f";

/// How many squarings happen between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

#[derive(Error, Debug)]
pub enum VdfError {
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error("proof did not verify")]
    InvalidProof,
    #[error("solve cancelled")]
    Cancelled,
    #[error("vdf worker stopped")]
    ServiceStopped,
}

/// A challenge derived from seed bytes: the group element to be squared
#[derive(Clone, Debug)]
pub struct VdfChallenge {
    /// Hex SHA3-256 of `seed || x_bytes`
    pub id: String,
    /// Group element `x = SHAKE-256(seed) mod N`
    pub input: BigUint,
    pub seed: Vec<u8>,
}

/// Output element plus the Wesolowski proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VdfProof {
    /// `y = x^(2^T) mod N`
    pub output: BigUint,
    /// `π = x^⌊2^T / l⌋ mod N`
    pub proof: BigUint,
}

/// Solver and verifier for a fixed `(N, T)` configuration
#[derive(Clone, Debug)]
pub struct Vdf {
    modulus: BigUint,
    time: u64,
}

impl Vdf {
    pub fn new(modulus: BigUint, time: u64) -> Result<Self, VdfError> {
        if modulus <= BigUint::one() {
            return Err(VdfError::MalformedProof("modulus must exceed 1".into()));
        }
        if time == 0 {
            return Err(VdfError::MalformedProof(
                "time parameter must be positive".into(),
            ));
        }
        Ok(Vdf { modulus, time })
    }

    pub fn from_hex_modulus(modulus_hex: &str, time: u64) -> Result<Self, VdfError> {
        let bytes = hex::decode(modulus_hex)
            .map_err(|e| VdfError::MalformedProof(format!("modulus not hex: {e}")))?;
        Self::new(BigUint::from_bytes_be(&bytes), time)
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    /// Derive the challenge element for arbitrary seed bytes
    pub fn generate_challenge(&self, seed: &[u8]) -> VdfChallenge {
        let mut xof = vec![0u8; (self.modulus.bits() as usize).div_ceil(8)];
        shake256_into(seed, &mut xof);
        let mut input = BigUint::from_bytes_be(&xof) % &self.modulus;
        if input.is_zero() {
            input = BigUint::one();
        }

        let mut id_preimage = seed.to_vec();
        id_preimage.extend_from_slice(&input.to_bytes_be());
        VdfChallenge {
            id: hex::encode(sha3_256(&id_preimage)),
            input,
            seed: seed.to_vec(),
        }
    }

    /// Evaluate the VDF: `T` sequential squarings, then the Wesolowski proof.
    ///
    /// The cancel flag is polled every 2^16 squarings; a set flag aborts with
    /// `Cancelled`.
    pub fn solve(&self, x: &BigUint, cancel: &AtomicBool) -> Result<VdfProof, VdfError> {
        self.check_element(x, "x")?;

        let mut y = x.clone();
        for i in 0..self.time {
            if i % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(VdfError::Cancelled);
            }
            y = &y * &y % &self.modulus;
        }

        let l = self.fiat_shamir(x, &y);
        let q = (BigUint::one() << self.time) / &l;
        let proof = x.modpow(&q, &self.modulus);

        Ok(VdfProof { output: y, proof })
    }

    /// Check a proof: `π^l · x^r ≡ y (mod N)` with `r = 2^T mod l`
    pub fn verify(&self, x: &BigUint, proof: &VdfProof) -> Result<bool, VdfError> {
        self.check_element(x, "x")?;
        self.check_element(&proof.output, "y")?;
        self.check_element(&proof.proof, "pi")?;

        let l = self.fiat_shamir(x, &proof.output);
        let r = BigUint::from(2u8).modpow(&BigUint::from(self.time), &l);

        let lhs =
            proof.proof.modpow(&l, &self.modulus) * x.modpow(&r, &self.modulus) % &self.modulus;
        Ok(lhs == proof.output)
    }

    /// Fiat–Shamir challenge `l = SHA3-256(x || y || N)` forced odd.
    ///
    /// Not hash-to-prime; the odd-integer transcript is frozen and changing
    /// it requires a format version bump.
    fn fiat_shamir(&self, x: &BigUint, y: &BigUint) -> BigUint {
        let mut preimage = x.to_bytes_be();
        preimage.extend_from_slice(&y.to_bytes_be());
        preimage.extend_from_slice(&self.modulus.to_bytes_be());
        let mut l = BigUint::from_bytes_be(&sha3_256(&preimage));
        l.set_bit(0, true);
        l
    }

    fn check_element(&self, value: &BigUint, name: &str) -> Result<(), VdfError> {
        if value.is_zero() {
            return Err(VdfError::MalformedProof(format!("{name} is zero")));
        }
        if value >= &self.modulus {
            return Err(VdfError::MalformedProof(format!(
                "{name} is outside the group"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_vdf(time: u64) -> Vdf {
        Vdf::from_hex_modulus(DEV_MODULUS_HEX, time).unwrap()
    }

    fn unset() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_solve_then_verify() {
        let vdf = dev_vdf(1024);
        let challenge = vdf.generate_challenge(b"hello");

        let proof = vdf.solve(&challenge.input, &unset()).unwrap();
        assert!(vdf.verify(&challenge.input, &proof).unwrap());
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let vdf = dev_vdf(64);
        let a = vdf.generate_challenge(b"seed");
        let b = vdf.generate_challenge(b"seed");
        assert_eq!(a.id, b.id);
        assert_eq!(a.input, b.input);
        assert_ne!(a.id, vdf.generate_challenge(b"other").id);
    }

    #[test]
    fn test_flipped_proof_byte_rejected() {
        let vdf = dev_vdf(1024);
        let challenge = vdf.generate_challenge(b"hello");
        let mut proof = vdf.solve(&challenge.input, &unset()).unwrap();

        let mut bytes = proof.proof.to_bytes_be();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        proof.proof = BigUint::from_bytes_be(&bytes) % vdf.modulus();

        // A flip may push the element to zero; either outcome is a rejection
        match vdf.verify(&challenge.input, &proof) {
            Ok(valid) => assert!(!valid),
            Err(VdfError::MalformedProof(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_mutated_output_rejected() {
        let vdf = dev_vdf(256);
        let challenge = vdf.generate_challenge(b"mutate-y");
        let mut proof = vdf.solve(&challenge.input, &unset()).unwrap();

        proof.output = (&proof.output + BigUint::one()) % vdf.modulus();
        match vdf.verify(&challenge.input, &proof) {
            Ok(valid) => assert!(!valid),
            Err(VdfError::MalformedProof(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_wrong_time_parameter_rejected() {
        let vdf = dev_vdf(256);
        let challenge = vdf.generate_challenge(b"wrong-t");
        let proof = vdf.solve(&challenge.input, &unset()).unwrap();

        let other = dev_vdf(257);
        assert!(!other.verify(&challenge.input, &proof).unwrap());
    }

    #[test]
    fn test_wrong_input_rejected() {
        let vdf = dev_vdf(256);
        let challenge = vdf.generate_challenge(b"input-a");
        let proof = vdf.solve(&challenge.input, &unset()).unwrap();

        let other = vdf.generate_challenge(b"input-b");
        assert!(!vdf.verify(&other.input, &proof).unwrap());
    }

    #[test]
    fn test_cancellation() {
        let vdf = dev_vdf(u32::MAX as u64);
        let challenge = vdf.generate_challenge(b"cancel");
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            vdf.solve(&challenge.input, &cancel),
            Err(VdfError::Cancelled)
        ));
    }

    #[test]
    fn test_rejects_degenerate_config() {
        assert!(Vdf::new(BigUint::one(), 10).is_err());
        assert!(Vdf::new(BigUint::from(99u8), 0).is_err());
    }
}
