// Reward schedule and fee estimation

use umbra_core::{Amount, BlockHeight, CoreError, SignedTransaction, SATOSHIS_PER_SHADOW};

/// Reward of the first epoch: 50 shadow per block
pub const INITIAL_REWARD: Amount = 50 * SATOSHIS_PER_SHADOW;

/// Blocks per halving epoch
pub const HALVING_INTERVAL: BlockHeight = 210_000;

/// Default fee rate in satoshi-equivalents per canonical byte
pub const DEFAULT_FEE_RATE_PER_BYTE: Amount = 10;

/// Subsidy paid by the coinbase of a block at `height`.
///
/// Halves every `HALVING_INTERVAL` blocks; zero once the shift exhausts the
/// 64-bit amount.
pub fn block_reward(height: BlockHeight) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    INITIAL_REWARD >> halvings
}

/// Fee estimate for a signed transaction at a given byte rate
pub fn estimate_fee_at_rate(
    tx: &SignedTransaction,
    rate_per_byte: Amount,
) -> Result<Amount, CoreError> {
    Ok(tx.canonical_size()? as Amount * rate_per_byte)
}

/// Fee estimate at the default rate
pub fn estimate_fee(tx: &SignedTransaction) -> Result<Amount, CoreError> {
    estimate_fee_at_rate(tx, DEFAULT_FEE_RATE_PER_BYTE)
}
