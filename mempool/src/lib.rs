// Transaction mempool with priority ranking
// Size-bounded pool for pending umbra transactions

pub mod pool;
pub mod validators;

pub use pool::{
    sender_proxy, Mempool, MempoolConfig, MempoolEntry, MempoolStats, PoolError, TxSource,
};
pub use validators::{
    default_validators, SignatureValidator, SizeValidator, StructureValidator, TimingValidator,
    TxValidator,
};
