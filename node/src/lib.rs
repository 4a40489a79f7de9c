// Umbra node
// Chain store, block production, and service orchestration

pub mod assembler;
pub mod chain;
pub mod config;
pub mod genesis;
pub mod producer;
pub mod service;
pub mod validator;

pub use assembler::BlockAssembler;
pub use chain::{ChainError, ChainStats, ChainStore};
pub use config::NodeConfig;
pub use genesis::{create_genesis_block, genesis_address, is_genesis};
pub use producer::{ProduceError, Producer, ProducerConfig, ProducerStats};
pub use service::{NodeContext, UmbraNode};
pub use validator::{BlockValidator, ValidationError};
