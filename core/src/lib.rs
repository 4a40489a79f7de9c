// Umbra core types
// Signing, addresses, hashing, transactions, and blocks

pub mod address;
pub mod block;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod transaction;

pub use address::{Address, Identifier, ADDRESS_SIZE, ADDRESS_VERSION};
pub use block::{Block, BlockBody, BlockHeader, ZERO_HASH_HEX};
pub use crypto::{
    Keypair, PublicKey, Seed, Signature, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE,
    SEED_SIZE, SIGNATURE_SIZE,
};
pub use error::CoreError;
pub use transaction::{
    SignedTransaction, Transaction, TxEnvelopeHeader, TxInput, TxOutput, COINBASE_ALGORITHM,
    SIGNATURE_ALGORITHM,
};

/// Height of a block in the chain
pub type BlockHeight = u64;

/// Token amount in satoshi-equivalents
pub type Amount = u64;

/// Lowercase-hex 32-byte content hash
pub type TxHash = String;

/// Smallest unit: 1 shadow = 100,000,000 satoshi-equivalents
pub const SATOSHIS_PER_SHADOW: Amount = 100_000_000;
