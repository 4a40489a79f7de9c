// Producer loop
// Proof-gated block production on a fixed tick

use crate::assembler::{BlockAssembler, MAX_BLOCK_TRANSACTIONS};
use crate::chain::{ChainError, ChainStore};
use crate::validator::{BlockValidator, ValidationError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use umbra_core::hashing::sha256;
use umbra_core::{Address, Block, CoreError};
use umbra_farming::{Challenge, ChallengeResponder, FarmingError};
use umbra_mempool::Mempool;

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("farming error: {0}")]
    Farming(#[from] FarmingError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("proof did not verify")]
    InvalidProof,
}

/// Producer knobs
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub target_block_time: Duration,
    pub max_block_transactions: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            target_block_time: Duration::from_secs(60),
            max_block_transactions: MAX_BLOCK_TRANSACTIONS,
        }
    }
}

/// Production counters
#[derive(Clone, Debug, Default)]
pub struct ProducerStats {
    pub blocks_produced: u64,
    pub failures: u64,
    pub last_block_at: Option<DateTime<Utc>>,
    pub last_quality: Option<u64>,
}

/// Periodically derives a storage challenge from the tip, asks the farming
/// side for a proof, and turns successful proofs into appended blocks.
pub struct Producer {
    chain: Arc<ChainStore>,
    mempool: Arc<RwLock<Mempool>>,
    responder: Arc<dyn ChallengeResponder>,
    assembler: BlockAssembler,
    validator: BlockValidator,
    miner_address: RwLock<Address>,
    stats: Arc<RwLock<ProducerStats>>,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(
        chain: Arc<ChainStore>,
        mempool: Arc<RwLock<Mempool>>,
        responder: Arc<dyn ChallengeResponder>,
        miner_address: Address,
        config: ProducerConfig,
    ) -> Self {
        Producer {
            chain,
            mempool,
            responder,
            assembler: BlockAssembler::default(),
            validator: BlockValidator::default(),
            miner_address: RwLock::new(miner_address),
            stats: Arc::new(RwLock::new(ProducerStats::default())),
            config,
        }
    }

    /// Run the tick loop until shutdown. One log line per tick outcome.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.target_block_time);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                block_time_secs = self.config.target_block_time.as_secs_f64(),
                "producer started"
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match self.produce_once().await {
                            Ok(block) => info!(
                                height = block.header.height,
                                hash = %block.hash(),
                                txs = block.body.tx_count,
                                "produced block"
                            ),
                            Err(e) => {
                                self.stats.write().await.failures += 1;
                                warn!("production tick failed: {e}");
                            }
                        }
                    }
                }
            }
            info!("producer stopped");
        })
    }

    /// One synchronous production attempt (testing hook)
    pub async fn force_build(&self) -> Result<Block, ProduceError> {
        match self.produce_once().await {
            Ok(block) => Ok(block),
            Err(e) => {
                self.stats.write().await.failures += 1;
                Err(e)
            }
        }
    }

    async fn produce_once(&self) -> Result<Block, ProduceError> {
        let tip = self.chain.tip_block().await?;
        let miner = *self.miner_address.read().await;

        let payload = challenge_payload(&tip.hash(), Utc::now().timestamp(), &miner);
        let proof = self.responder.respond(Challenge::new(payload)).await?;
        if !proof.verify() {
            return Err(ProduceError::InvalidProof);
        }
        let quality = proof.quality();

        let picks = {
            let pool = self.mempool.read().await;
            pool.top_k(self.config.max_block_transactions)
        };

        let block = self.assembler.build_block(&tip, picks, &proof, miner)?;
        self.validator.validate_block(&block)?;
        self.chain.append(block.clone()).await?;

        // Prune after append; removal is idempotent, so consumers observing
        // the window between the two steps are fine
        {
            let mut pool = self.mempool.write().await;
            for tx in &block.body.transactions {
                if !tx.is_coinbase() {
                    pool.remove(&tx.tx_hash);
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.blocks_produced += 1;
        stats.last_block_at = Some(Utc::now());
        stats.last_quality = Some(quality);

        Ok(block)
    }

    pub async fn set_miner_address(&self, address: Address) {
        *self.miner_address.write().await = address;
    }

    pub async fn miner_address(&self) -> Address {
        *self.miner_address.read().await
    }

    pub async fn stats(&self) -> ProducerStats {
        self.stats.read().await.clone()
    }
}

/// `SHA-256(tip_hash_bytes || unix_seconds LE || miner address)`
fn challenge_payload(tip_hash: &str, unix_seconds: i64, miner: &Address) -> Vec<u8> {
    let mut preimage = hex::decode(tip_hash).unwrap_or_default();
    preimage.extend_from_slice(&unix_seconds.to_le_bytes());
    preimage.extend_from_slice(miner.encode().as_bytes());
    sha256(&preimage).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use umbra_core::{
        Keypair, Seed, SignedTransaction, Transaction, TxInput, TxOutput, SEED_SIZE,
    };
    use umbra_farming::ProofOfStorage;
    use umbra_mempool::{MempoolConfig, TxSource};

    struct Scratch {
        root: PathBuf,
    }

    impl Scratch {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("umbra-producer-{name}"));
            let _ = std::fs::remove_dir_all(&root);
            std::fs::create_dir_all(&root).unwrap();
            Scratch { root }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    /// Signs every challenge with a fixed key, like a one-entry plot would
    struct FakeResponder {
        keypair: Keypair,
        fail: bool,
    }

    impl FakeResponder {
        fn good() -> Self {
            FakeResponder {
                keypair: Keypair::from_seed(&Seed::from_bytes([21u8; SEED_SIZE])),
                fail: false,
            }
        }

        fn failing() -> Self {
            FakeResponder {
                keypair: Keypair::from_seed(&Seed::from_bytes([22u8; SEED_SIZE])),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ChallengeResponder for FakeResponder {
        async fn respond(&self, challenge: Challenge) -> Result<ProofOfStorage, FarmingError> {
            if self.fail {
                return Err(FarmingError::NoMatch);
            }
            let signature = self
                .keypair
                .sign(&challenge.payload)
                .map_err(|e| FarmingError::SignerFailure(e.to_string()))?;
            Ok(ProofOfStorage {
                challenge: challenge.payload,
                plot_path: "fake.dat".into(),
                offset: 0,
                identifier: self.keypair.public_key().identifier(),
                public_key: self.keypair.public_key(),
                signature,
            })
        }
    }

    fn admissible_tx(nonce: u64) -> SignedTransaction {
        let keypair = Keypair::from_seed(&Seed::from_bytes([23u8; SEED_SIZE]));
        let now = Utc::now();
        let tx = Transaction::new(
            1,
            vec![TxInput {
                previous_tx_hash: format!("{nonce:064x}"),
                output_index: 0,
                script_sig: String::new(),
                sequence: 0,
            }],
            vec![TxOutput {
                value: 250,
                script_pub_key: String::new(),
                address: Address::from_public_key(b"payee"),
            }],
            now,
            now,
            nonce,
        );
        SignedTransaction::sign(&tx, &keypair).unwrap()
    }

    fn producer_over(scratch: &Scratch, responder: Arc<dyn ChallengeResponder>) -> Producer {
        let chain = Arc::new(ChainStore::init(&scratch.root).unwrap());
        let mempool = Arc::new(RwLock::new(Mempool::new(MempoolConfig::default())));
        Producer::new(
            chain,
            mempool,
            responder,
            Address::from_public_key(b"producer-miner"),
            ProducerConfig {
                target_block_time: Duration::from_millis(50),
                max_block_transactions: MAX_BLOCK_TRANSACTIONS,
            },
        )
    }

    #[tokio::test]
    async fn test_force_build_grows_chain_and_drains_pool() {
        let scratch = Scratch::new("force");
        let producer = producer_over(&scratch, Arc::new(FakeResponder::good()));

        {
            let mut pool = producer.mempool.write().await;
            for nonce in 1..=3 {
                pool.submit(admissible_tx(nonce), TxSource::Local).unwrap();
            }
        }

        let block = producer.force_build().await.unwrap();
        assert_eq!(block.header.height, 1);
        assert_eq!(block.body.tx_count, 4);
        assert!(block.body.transactions[0].is_coinbase());

        assert_eq!(producer.chain.tip().await.1, 1);
        assert_eq!(producer.mempool.read().await.len(), 0);

        let stats = producer.stats().await;
        assert_eq!(stats.blocks_produced, 1);
        assert_eq!(stats.failures, 0);
        assert!(stats.last_quality.is_some());
    }

    #[tokio::test]
    async fn test_failed_proof_counts_failure() {
        let scratch = Scratch::new("fail");
        let producer = producer_over(&scratch, Arc::new(FakeResponder::failing()));

        let result = producer.force_build().await;
        assert!(matches!(
            result,
            Err(ProduceError::Farming(FarmingError::NoMatch))
        ));
        assert_eq!(producer.stats().await.failures, 1);
        assert_eq!(producer.chain.tip().await.1, 0);
    }

    #[tokio::test]
    async fn test_spawned_loop_produces_until_shutdown() {
        let scratch = Scratch::new("loop");
        let producer = Arc::new(producer_over(&scratch, Arc::new(FakeResponder::good())));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = Arc::clone(&producer).spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(producer.stats().await.blocks_produced >= 1);
        assert!(producer.chain.tip().await.1 >= 1);
    }

    #[tokio::test]
    async fn test_set_miner_address_takes_effect() {
        let scratch = Scratch::new("miner");
        let producer = producer_over(&scratch, Arc::new(FakeResponder::good()));
        let replacement = Address::from_public_key(b"replacement-miner");

        producer.set_miner_address(replacement).await;
        let block = producer.force_build().await.unwrap();

        assert_eq!(block.header.farmer_address, replacement.encode());
        let coinbase = block.body.transactions[0].verify().unwrap();
        assert_eq!(coinbase.outputs[0].address, replacement);
    }
}
