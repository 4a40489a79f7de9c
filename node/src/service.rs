// Node service
// Main orchestrator tying all components together

use crate::chain::ChainStore;
use crate::config::NodeConfig;
use crate::genesis;
use crate::producer::{Producer, ProducerConfig};
use anyhow::Context;
use chrono::Duration as ChronoDuration;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use umbra_core::Address;
use umbra_farming::{FarmingConfig, FarmingService};
use umbra_mempool::{default_validators, Mempool, MempoolConfig};
use umbra_plot::{PlotIndex, DEFAULT_BATCH_SIZE};
use umbra_vdf::{spawn_worker, Vdf, VdfHandle, DEV_MODULUS_HEX};

/// Per-node identity created at startup and passed explicitly; there is no
/// ambient global state.
#[derive(Clone, Debug)]
pub struct NodeContext {
    pub miner_address: Address,
    pub node_id: String,
}

impl NodeContext {
    fn new(miner_address: Address) -> Self {
        let mut id_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        NodeContext {
            miner_address,
            node_id: hex::encode(id_bytes),
        }
    }
}

/// Main node service coordinating all subsystems
pub struct UmbraNode {
    context: NodeContext,
    chain: Arc<ChainStore>,
    mempool: Arc<RwLock<Mempool>>,
    farming: Option<Arc<FarmingService>>,
    producer: Option<Arc<Producer>>,
    vdf: Option<VdfHandle>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl UmbraNode {
    /// Bring up the node: chain store, plot index, farming, mempool,
    /// optional VDF worker, optional producer.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;

        info!("starting umbra node");
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        // Chain store
        let chain = Arc::new(ChainStore::init(&config.blockchain_dir())?);
        let stats = chain.stats().await;
        info!(
            tip_height = stats.tip_height,
            blocks = stats.block_count,
            "chain store ready"
        );

        // Mempool + periodic expiry sweep
        let mempool = Arc::new(RwLock::new(Mempool::with_validators(
            MempoolConfig {
                max_mempool_size: config.mempool_max_bytes,
                max_transactions: config.mempool_max_txs,
                tx_expiry: ChronoDuration::seconds(config.tx_expiry_secs as i64),
            },
            default_validators(),
        )));
        tasks.push(spawn_expiry_sweep(
            Arc::clone(&mempool),
            Duration::from_secs((config.tx_expiry_secs / 2).max(1)),
            shutdown_tx.subscribe(),
        ));

        // Plot index + farming responder
        let farming = if config.plot_dirs.is_empty() {
            info!("no plot directories configured; farming disabled");
            None
        } else {
            let index = PlotIndex::create(&config.plot_index_dir())
                .context("cannot create plot index")?;
            let indexed = index
                .reindex(&config.plot_dirs, DEFAULT_BATCH_SIZE)
                .context("plot reindex failed")?;
            info!(entries = indexed, "plot index built");

            let (service, worker) = FarmingService::start(
                Arc::new(index),
                config.plot_dirs.clone(),
                FarmingConfig {
                    queue_depth: config.farming_queue,
                    ..FarmingConfig::default()
                },
                shutdown_tx.subscribe(),
            );
            tasks.push(worker);
            Some(Arc::new(service))
        };

        // Optional VDF worker, cancelled through the shutdown signal
        let vdf = if config.vdf_time == 0 {
            None
        } else {
            let modulus_hex = match config.vdf_modulus.as_deref() {
                Some(hex) => hex.to_string(),
                None => {
                    warn!("no VDF modulus supplied; using the small dev modulus");
                    DEV_MODULUS_HEX.to_string()
                }
            };
            let vdf = Vdf::from_hex_modulus(&modulus_hex, config.vdf_time)
                .map_err(|e| anyhow::anyhow!("bad VDF configuration: {e}"))?;

            let cancel = Arc::new(AtomicBool::new(false));
            let (handle, worker) = spawn_worker(vdf, 8, Arc::clone(&cancel));
            tasks.push(worker);
            tasks.push(spawn_cancel_on_shutdown(cancel, shutdown_tx.subscribe()));
            Some(handle)
        };

        // Node identity
        let miner_address = config.miner().unwrap_or_else(|| {
            let fallback = genesis::genesis_address();
            if config.produce {
                warn!("no miner address supplied; rewards go to the genesis address");
            }
            fallback
        });
        let context = NodeContext::new(miner_address);
        info!(node_id = %context.node_id, miner = %context.miner_address, "node context ready");

        // Producer loop
        let producer = if config.produce {
            let Some(farming_service) = farming.as_ref() else {
                anyhow::bail!("block production requires a farming service");
            };
            let responder = Arc::clone(farming_service);
            let producer = Arc::new(Producer::new(
                Arc::clone(&chain),
                Arc::clone(&mempool),
                responder,
                context.miner_address,
                ProducerConfig {
                    target_block_time: config.effective_block_time(),
                    ..ProducerConfig::default()
                },
            ));
            tasks.push(Arc::clone(&producer).spawn(shutdown_tx.subscribe()));
            Some(producer)
        } else {
            None
        };

        info!("node is ready");
        Ok(UmbraNode {
            context,
            chain,
            mempool,
            farming,
            producer,
            vdf,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    /// Signal every worker to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for all workers to drain after `shutdown`
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("task ended abnormally: {e}");
            }
        }
        info!("node stopped");
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<RwLock<Mempool>> {
        &self.mempool
    }

    pub fn farming(&self) -> Option<&Arc<FarmingService>> {
        self.farming.as_ref()
    }

    pub fn producer(&self) -> Option<&Arc<Producer>> {
        self.producer.as_ref()
    }

    pub fn vdf(&self) -> Option<&VdfHandle> {
        self.vdf.as_ref()
    }
}

fn spawn_expiry_sweep(
    mempool: Arc<RwLock<Mempool>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let expired = mempool.write().await.cleanup_expired();
                    if expired > 0 {
                        info!("expired {expired} pooled transactions");
                    }
                }
            }
        }
    })
}

fn spawn_cancel_on_shutdown(
    cancel: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if shutdown.changed().await.is_err() || *shutdown.borrow() {
                cancel.store(true, Ordering::Relaxed);
                break;
            }
        }
    })
}
