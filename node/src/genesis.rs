// Genesis block creation
// Deterministic initial chain state

use chrono::Utc;
use umbra_core::hashing::shake256_20;
use umbra_core::{
    Address, Block, BlockHeader, CoreError, SignedTransaction, SATOSHIS_PER_SHADOW, ZERO_HASH_HEX,
};

/// Label strings stamped into the genesis header
pub const GENESIS_CHALLENGE: &str = "genesis_challenge";
pub const GENESIS_PROOF: &str = "genesis_proof";
pub const GENESIS_FARMER: &str = "genesis_farmer";

const GENESIS_ALLOCATION_TAG: &[u8] = b"umbra genesis allocation";

/// The fixed address funded by the genesis coinbase
pub fn genesis_address() -> Address {
    Address::from_digest(shake256_20(GENESIS_ALLOCATION_TAG))
}

/// Build the genesis block. The timestamp is taken at creation; the chain
/// store persists the block on first init and reloads it thereafter, so the
/// hash stays stable for the life of a data directory.
pub fn create_genesis_block() -> Result<Block, CoreError> {
    let coinbase = SignedTransaction::coinbase(genesis_address(), SATOSHIS_PER_SHADOW, 0)?;
    let merkle_root = Block::compute_merkle_root(std::slice::from_ref(&coinbase))?;

    let header = BlockHeader {
        version: 1,
        previous_block_hash: ZERO_HASH_HEX.to_string(),
        merkle_root,
        timestamp: Utc::now(),
        height: 0,
        nonce: 0,
        challenge_seed: GENESIS_CHALLENGE.to_string(),
        proof_hash: GENESIS_PROOF.to_string(),
        farmer_address: GENESIS_FARMER.to_string(),
    };

    Ok(Block::new(header, vec![coinbase]))
}

/// Whether a block has the genesis shape
pub fn is_genesis(block: &Block) -> bool {
    block.header.height == 0
        && block.header.previous_block_hash == ZERO_HASH_HEX
        && block.header.challenge_seed == GENESIS_CHALLENGE
        && block.header.proof_hash == GENESIS_PROOF
        && block.body.transactions.len() == 1
        && block.body.transactions[0].is_coinbase()
}
