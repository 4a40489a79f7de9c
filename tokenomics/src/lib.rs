// Umbra tokenomics
// Halving reward schedule and byte-rate fee estimation

pub mod rewards;

pub use rewards::*;
