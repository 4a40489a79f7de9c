// Chain store
// Hash and height indexes over persisted blocks, tip tracking, genesis bootstrap

use crate::genesis;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use umbra_core::{Block, BlockHeight, CoreError};

const GENESIS_FILE: &str = "genesis.json";
const BLOCKS_DIR: &str = "blocks";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("unknown parent block {0}")]
    UnknownParent(String),
    #[error("height mismatch: parent height {parent} + 1 != block height {block}")]
    HeightMismatch { parent: u64, block: u64 },
    #[error("merkle root mismatch: header {header}, computed {computed}")]
    BadMerkle { header: String, computed: String },
    #[error("tx count mismatch: declared {declared}, actual {actual}")]
    CountMismatch { declared: u32, actual: usize },
    #[error("persistence error: {0}")]
    Persist(String),
    #[error("block not found")]
    NotFound,
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

struct ChainInner {
    by_hash: HashMap<String, Block>,
    // First-seen block per height; siblings never displace it
    by_height: HashMap<BlockHeight, String>,
    tip_hash: String,
    tip_height: BlockHeight,
}

/// Chain statistics snapshot
#[derive(Clone, Debug)]
pub struct ChainStats {
    pub tip_hash: String,
    pub tip_height: BlockHeight,
    pub block_count: usize,
    pub data_dir: PathBuf,
}

/// Persistent block store.
///
/// One reader/writer lock guards the indexes; `append` holds exclusive
/// access across validation, insertion, and persistence.
pub struct ChainStore {
    inner: RwLock<ChainInner>,
    data_dir: PathBuf,
}

impl ChainStore {
    /// Open a chain directory: load or create the genesis, then replay every
    /// persisted block. Malformed block files are skipped with a warning.
    pub fn init(data_dir: &Path) -> Result<Self, ChainError> {
        std::fs::create_dir_all(data_dir.join(BLOCKS_DIR))
            .map_err(|e| ChainError::Persist(format!("cannot create {}: {e}", data_dir.display())))?;

        let genesis_path = data_dir.join(GENESIS_FILE);
        let genesis: Block = if genesis_path.exists() {
            let raw = std::fs::read_to_string(&genesis_path)
                .map_err(|e| ChainError::Persist(format!("cannot read genesis: {e}")))?;
            serde_json::from_str(&raw)
                .map_err(|e| ChainError::Persist(format!("cannot parse genesis: {e}")))?
        } else {
            let genesis = genesis::create_genesis_block()?;
            write_pretty(&genesis_path, &genesis)?;
            info!("created genesis block {}", genesis.hash());
            genesis
        };

        let genesis_hash = genesis.hash();
        let mut inner = ChainInner {
            by_hash: HashMap::from([(genesis_hash.clone(), genesis)]),
            by_height: HashMap::from([(0, genesis_hash.clone())]),
            tip_hash: genesis_hash,
            tip_height: 0,
        };

        // Replay persisted blocks lowest-height first so parents exist
        let mut replay = Vec::new();
        let blocks_dir = data_dir.join(BLOCKS_DIR);
        let entries = std::fs::read_dir(&blocks_dir)
            .map_err(|e| ChainError::Persist(format!("cannot list blocks: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Block>(&raw).map_err(|e| e.to_string()))
            {
                Ok(block) => replay.push(block),
                Err(e) => warn!("skipping malformed block file {}: {e}", path.display()),
            }
        }
        replay.sort_by_key(|b| b.header.height);

        let mut replayed = 0usize;
        for block in replay {
            let hash = block.hash();
            match validate_and_insert(&mut inner, block) {
                Ok(()) => replayed += 1,
                Err(e) => warn!("skipping invalid persisted block {hash}: {e}"),
            }
        }
        info!(
            "chain store ready: tip height {} ({} blocks replayed)",
            inner.tip_height, replayed
        );

        Ok(ChainStore {
            inner: RwLock::new(inner),
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Validate and append a block, persisting it to `blocks/<hash>.json`.
    /// Re-appending an already-stored block is a no-op.
    pub async fn append(&self, block: Block) -> Result<(), ChainError> {
        let mut inner = self.inner.write().await;
        let hash = block.hash();

        if inner.by_hash.contains_key(&hash) {
            return Ok(());
        }

        validate_linkage(&inner, &block)?;
        validate_body(&block)?;

        // Persist before indexing so the on-disk set is never behind memory
        write_pretty(&self.block_path(&hash), &block)?;
        insert(&mut inner, hash, block);
        Ok(())
    }

    fn block_path(&self, hash: &str) -> PathBuf {
        self.data_dir.join(BLOCKS_DIR).join(format!("{hash}.json"))
    }

    pub async fn get(&self, hash: &str) -> Option<Block> {
        self.inner.read().await.by_hash.get(hash).cloned()
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.inner.read().await.by_hash.contains_key(hash)
    }

    /// Block at a height; height 0 resolves the genesis
    pub async fn get_by_height(&self, height: BlockHeight) -> Option<Block> {
        let inner = self.inner.read().await;
        let hash = inner.by_height.get(&height)?;
        inner.by_hash.get(hash).cloned()
    }

    /// `(hash, height)` of the current tip
    pub async fn tip(&self) -> (String, BlockHeight) {
        let inner = self.inner.read().await;
        (inner.tip_hash.clone(), inner.tip_height)
    }

    /// The tip block itself
    pub async fn tip_block(&self) -> Result<Block, ChainError> {
        let inner = self.inner.read().await;
        inner
            .by_hash
            .get(&inner.tip_hash)
            .cloned()
            .ok_or(ChainError::NotFound)
    }

    /// Up to `n` blocks walking down from the tip
    pub async fn recent(&self, n: usize) -> Vec<Block> {
        let inner = self.inner.read().await;
        let mut out = Vec::with_capacity(n.min(inner.tip_height as usize + 1));
        let mut height = inner.tip_height;
        loop {
            if out.len() >= n {
                break;
            }
            if let Some(hash) = inner.by_height.get(&height) {
                if let Some(block) = inner.by_hash.get(hash) {
                    out.push(block.clone());
                }
            }
            if height == 0 {
                break;
            }
            height -= 1;
        }
        out
    }

    pub async fn stats(&self) -> ChainStats {
        let inner = self.inner.read().await;
        ChainStats {
            tip_hash: inner.tip_hash.clone(),
            tip_height: inner.tip_height,
            block_count: inner.by_hash.len(),
            data_dir: self.data_dir.clone(),
        }
    }
}

fn validate_linkage(inner: &ChainInner, block: &Block) -> Result<(), ChainError> {
    if block.header.height == 0 {
        // The only height-0 block is the genesis installed at init
        return Err(ChainError::UnknownParent(
            block.header.previous_block_hash.clone(),
        ));
    }
    let parent = inner
        .by_hash
        .get(&block.header.previous_block_hash)
        .ok_or_else(|| ChainError::UnknownParent(block.header.previous_block_hash.clone()))?;
    if parent.header.height + 1 != block.header.height {
        return Err(ChainError::HeightMismatch {
            parent: parent.header.height,
            block: block.header.height,
        });
    }
    Ok(())
}

fn validate_body(block: &Block) -> Result<(), ChainError> {
    let computed = Block::compute_merkle_root(&block.body.transactions)?;
    if computed != block.header.merkle_root {
        return Err(ChainError::BadMerkle {
            header: block.header.merkle_root.clone(),
            computed,
        });
    }
    if block.body.tx_count as usize != block.body.transactions.len() {
        return Err(ChainError::CountMismatch {
            declared: block.body.tx_count,
            actual: block.body.transactions.len(),
        });
    }
    Ok(())
}

fn validate_and_insert(inner: &mut ChainInner, block: Block) -> Result<(), ChainError> {
    let hash = block.hash();
    if inner.by_hash.contains_key(&hash) {
        return Ok(());
    }
    validate_linkage(inner, &block)?;
    validate_body(&block)?;
    insert(inner, hash, block);
    Ok(())
}

fn insert(inner: &mut ChainInner, hash: String, block: Block) {
    let height = block.header.height;
    inner.by_height.entry(height).or_insert_with(|| hash.clone());
    if height > inner.tip_height {
        inner.tip_height = height;
        inner.tip_hash = hash.clone();
        info!("new tip: height {height} hash {hash}");
    }
    inner.by_hash.insert(hash, block);
}

fn write_pretty(path: &Path, block: &Block) -> Result<(), ChainError> {
    let json = serde_json::to_string_pretty(block)
        .map_err(|e| ChainError::Persist(format!("cannot serialize block: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| ChainError::Persist(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use umbra_core::{BlockHeader, SignedTransaction};

    struct Scratch {
        root: PathBuf,
    }

    impl Scratch {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("umbra-chain-{name}"));
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

    fn child_of(parent: &Block, txs: Vec<SignedTransaction>) -> Block {
        let header = BlockHeader {
            version: 1,
            previous_block_hash: parent.hash(),
            merkle_root: Block::compute_merkle_root(&txs).unwrap(),
            timestamp: Utc::now(),
            height: parent.header.height + 1,
            nonce: 0,
            challenge_seed: "00ff".to_string(),
            proof_hash: "11ee".to_string(),
            farmer_address: "farmer".to_string(),
        };
        Block::new(header, txs)
    }

    #[tokio::test]
    async fn test_init_creates_genesis() {
        let scratch = Scratch::new("init");
        let chain = ChainStore::init(&scratch.root).unwrap();

        let (tip_hash, tip_height) = chain.tip().await;
        assert_eq!(tip_height, 0);
        assert!(scratch.root.join("genesis.json").exists());

        let genesis = chain.get_by_height(0).await.unwrap();
        assert_eq!(genesis.hash(), tip_hash);
        assert!(crate::genesis::is_genesis(&genesis));
    }

    #[tokio::test]
    async fn test_append_advances_tip_and_persists() {
        let scratch = Scratch::new("append");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let block = child_of(&genesis, vec![]);
        let hash = block.hash();
        chain.append(block.clone()).await.unwrap();

        assert_eq!(chain.tip().await, (hash.clone(), 1));
        assert_eq!(chain.get(&hash).await.unwrap(), block);
        assert!(scratch.root.join("blocks").join(format!("{hash}.json")).exists());
    }

    #[tokio::test]
    async fn test_restart_reloads_chain() {
        let scratch = Scratch::new("restart");
        let block = {
            let chain = ChainStore::init(&scratch.root).unwrap();
            let genesis = chain.tip_block().await.unwrap();
            let block = child_of(&genesis, vec![]);
            chain.append(block.clone()).await.unwrap();
            block
        };

        let reopened = ChainStore::init(&scratch.root).unwrap();
        let (tip_hash, tip_height) = reopened.tip().await;
        assert_eq!(tip_height, 1);
        assert_eq!(tip_hash, block.hash());
        assert_eq!(reopened.get(&block.hash()).await.unwrap().body, block.body);
    }

    #[tokio::test]
    async fn test_unknown_parent_rejected() {
        let scratch = Scratch::new("orphan");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let mut orphan = child_of(&genesis, vec![]);
        orphan.header.previous_block_hash = "ab".repeat(32);
        assert!(matches!(
            chain.append(orphan).await,
            Err(ChainError::UnknownParent(_))
        ));
    }

    #[tokio::test]
    async fn test_height_mismatch_rejected() {
        let scratch = Scratch::new("height");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let mut skipper = child_of(&genesis, vec![]);
        skipper.header.height = 5;
        assert!(matches!(
            chain.append(skipper).await,
            Err(ChainError::HeightMismatch { parent: 0, block: 5 })
        ));
    }

    #[tokio::test]
    async fn test_bad_merkle_rejected() {
        let scratch = Scratch::new("merkle");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let mut bad = child_of(&genesis, vec![]);
        bad.header.merkle_root = "cd".repeat(32);
        assert!(matches!(
            chain.append(bad).await,
            Err(ChainError::BadMerkle { .. })
        ));
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let scratch = Scratch::new("count");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let mut bad = child_of(&genesis, vec![]);
        bad.body.tx_count = 3;
        assert!(matches!(
            chain.append(bad).await,
            Err(ChainError::CountMismatch {
                declared: 3,
                actual: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_first_seen_height_wins() {
        let scratch = Scratch::new("siblings");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let genesis = chain.tip_block().await.unwrap();

        let first = child_of(&genesis, vec![]);
        let mut second = child_of(&genesis, vec![]);
        second.header.nonce = 99;
        assert_ne!(first.hash(), second.hash());

        chain.append(first.clone()).await.unwrap();
        chain.append(second.clone()).await.unwrap();

        // Same height: the earlier block keeps both the height slot and the tip
        assert_eq!(chain.get_by_height(1).await.unwrap().hash(), first.hash());
        assert_eq!(chain.tip().await.0, first.hash());
        // The sibling is still retrievable by hash
        assert!(chain.get(&second.hash()).await.is_some());
    }

    #[tokio::test]
    async fn test_recent_descends_from_tip() {
        let scratch = Scratch::new("recent");
        let chain = ChainStore::init(&scratch.root).unwrap();
        let mut parent = chain.tip_block().await.unwrap();
        for _ in 0..3 {
            let block = child_of(&parent, vec![]);
            chain.append(block.clone()).await.unwrap();
            parent = block;
        }

        let recent = chain.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].header.height, 3);
        assert_eq!(recent[1].header.height, 2);

        // Genesis is included when the window reaches height 0
        let all = chain.recent(10).await;
        assert_eq!(all.len(), 4);
        assert_eq!(all.last().unwrap().header.height, 0);
    }
}
