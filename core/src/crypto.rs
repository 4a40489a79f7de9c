// Signing abstraction
// Lattice (ML-DSA / Dilithium5-class) key pairs with deterministic seeded keygen

use crate::address::{Address, Identifier};
use crate::error::CoreError;
use crystals_dilithium::dilithium5;
use rand::RngCore;
use zeroize::Zeroize;

/// Seed length for deterministic key generation
pub const SEED_SIZE: usize = 32;

/// Encoded public key length
pub const PUBLIC_KEY_SIZE: usize = 2592;

/// Encoded secret key length
pub const SECRET_KEY_SIZE: usize = 4864;

/// Detached signature length
pub const SIGNATURE_SIZE: usize = 4595;

/// On-plot private key blob: `seed || secret key`. The seed prefix makes the
/// pair reconstructible; the secret-key suffix is what actually fills disk.
pub const PRIVATE_KEY_SIZE: usize = SEED_SIZE + SECRET_KEY_SIZE;

/// 32-byte keygen seed, zeroized on drop
#[derive(Clone)]
pub struct Seed([u8; SEED_SIZE]);

impl Zeroize for Seed {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for Seed {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Seed {
    pub fn from_bytes(bytes: [u8; SEED_SIZE]) -> Self {
        Seed(bytes)
    }

    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SEED_SIZE];
        rng.fill_bytes(&mut bytes);
        Seed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.0
    }
}

/// Encoded lattice public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CoreError::InvalidKey(format!(
                "public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(PublicKey(bytes.to_vec()))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CoreError> {
        let bytes =
            hex::decode(encoded).map_err(|e| CoreError::InvalidKey(format!("bad hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Verify a detached signature over a message
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let pk = dilithium5::PublicKey::from_bytes(&self.0);
        pk.verify(message, signature.as_bytes())
    }

    /// SHAKE-256/32 digest of the key bytes; the plot index key
    pub fn identifier(&self) -> Identifier {
        Identifier::from_public_key(&self.0)
    }

    /// Versioned checksummed address of the key
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.0)
    }
}

/// Detached signature bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CoreError::InvalidSignature(format!(
                "signature must be {SIGNATURE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Signature(bytes.to_vec()))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| CoreError::InvalidSignature(format!("bad hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Signing key pair. Same seed, same keys.
pub struct Keypair {
    seed: Seed,
    inner: dilithium5::Keypair,
}

impl Keypair {
    /// Deterministic key generation from a 32-byte seed
    pub fn from_seed(seed: &Seed) -> Self {
        let inner = dilithium5::Keypair::generate(Some(&seed.as_bytes()[..]));
        Keypair {
            seed: seed.clone(),
            inner,
        }
    }

    /// Fresh key pair from a random seed
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let seed = Seed::random(rng);
        Self::from_seed(&seed)
    }

    /// Sign an arbitrary message
    pub fn sign(&self, message: &[u8]) -> Result<Signature, CoreError> {
        let raw = self.inner.sign(message);
        Signature::from_bytes(&raw[..])
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.inner.public.bytes.to_vec())
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// The on-plot blob: `seed || secret key`
    pub fn to_private_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PRIVATE_KEY_SIZE);
        out.extend_from_slice(self.seed.as_bytes());
        out.extend_from_slice(&self.inner.secret.bytes);
        out
    }

    /// Reconstruct a key pair from an on-plot blob.
    ///
    /// The pair is regenerated from the seed prefix; a secret-key suffix that
    /// does not match the regenerated key means the blob is corrupt.
    pub fn from_private_key_bytes(blob: &[u8]) -> Result<Self, CoreError> {
        if blob.len() != PRIVATE_KEY_SIZE {
            return Err(CoreError::InvalidKey(format!(
                "private key blob must be {PRIVATE_KEY_SIZE} bytes, got {}",
                blob.len()
            )));
        }
        let mut seed_bytes = [0u8; SEED_SIZE];
        seed_bytes.copy_from_slice(&blob[..SEED_SIZE]);
        let keypair = Self::from_seed(&Seed::from_bytes(seed_bytes));
        if keypair.inner.secret.bytes[..] != blob[SEED_SIZE..] {
            return Err(CoreError::InvalidKey(
                "secret key does not match its seed".into(),
            ));
        }
        Ok(keypair)
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.inner.secret.bytes.zeroize();
    }
}
