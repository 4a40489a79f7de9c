// Priority mempool
// Hash-keyed store with a lazy-deletion max-heap and address indexes

use crate::validators::TxValidator;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;
use umbra_core::{Amount, SignedTransaction, TxHash};
use umbra_tokenomics::estimate_fee;

/// Priority weights: `fee*W_FEE + age*W_TIME + size*W_SIZE`
pub const W_FEE: f64 = 1.0;
pub const W_TIME: f64 = 0.01;
pub const W_SIZE: f64 = -0.001;

/// Locally submitted transactions get a priority boost
const LOCAL_MULTIPLIER: f64 = 1.5;

/// No entry ranks below this
const PRIORITY_FLOOR: f64 = 0.1;

/// Characters of `previous_tx_hash` used as the sender proxy key
const SENDER_PROXY_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already in pool")]
    Duplicate,
    #[error("pool is full")]
    Full,
    #[error("cannot evict enough to free {0} bytes")]
    CannotEvict(usize),
    #[error("transaction could not be decoded: {0}")]
    ParseFailed(String),
}

/// Where a transaction came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TxSource {
    Local,
    Peer,
    Api,
}

/// A pooled transaction and its bookkeeping
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub signed_tx: SignedTransaction,
    pub source: TxSource,
    pub received_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub fee: Amount,
    pub priority: f64,
    pub validated: bool,
    pub validation_error: Option<String>,
    pub broadcast_count: u32,
    pub last_broadcast: Option<DateTime<Utc>>,
}

/// Pool configuration
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    /// Maximum total size in bytes
    pub max_mempool_size: usize,
    /// Maximum number of transactions
    pub max_transactions: usize,
    /// Entries older than this are dropped by `cleanup_expired`
    pub tx_expiry: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_mempool_size: 20 * 1024 * 1024,
            max_transactions: 10_000,
            tx_expiry: Duration::hours(1),
        }
    }
}

/// Pool statistics
#[derive(Clone, Debug, Default, Serialize)]
pub struct MempoolStats {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected_duplicate: u64,
    pub rejected_full: u64,
    pub evicted: u64,
    pub expired: u64,
    pub validation_failures: u64,
    pub total_transactions: usize,
    pub total_bytes: usize,
}

// Heap entries are never removed eagerly; consumers re-check `by_hash`
#[derive(Clone, Debug)]
struct HeapEntry {
    priority: f64,
    received_at: DateTime<Utc>,
    tx_hash: TxHash,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Primary: higher priority. Tie-breaker: earlier received wins.
        match self.priority.total_cmp(&other.priority) {
            Ordering::Equal => match other.received_at.cmp(&self.received_at) {
                Ordering::Equal => self.tx_hash.cmp(&other.tx_hash),
                ordering => ordering,
            },
            ordering => ordering,
        }
    }
}

/// Sender proxy key: the first 8 chars of an input's `previous_tx_hash`
pub fn sender_proxy(previous_tx_hash: &str) -> String {
    previous_tx_hash
        .chars()
        .take(SENDER_PROXY_LEN)
        .collect()
}

/// Priority-ranked, size-bounded transaction pool.
///
/// The pool itself is a plain structure; callers share it behind a single
/// reader/writer lock (writes exclusive, reads shared).
pub struct Mempool {
    config: MempoolConfig,
    validators: Vec<Box<dyn TxValidator>>,
    by_hash: HashMap<TxHash, MempoolEntry>,
    heap: BinaryHeap<HeapEntry>,
    by_receiver: HashMap<String, HashSet<TxHash>>,
    by_sender: HashMap<String, HashSet<TxHash>>,
    by_source: HashMap<TxSource, HashSet<TxHash>>,
    total_size: usize,
    stats: MempoolStats,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self::with_validators(config, Vec::new())
    }

    /// The validator set is closed once the pool is constructed
    pub fn with_validators(config: MempoolConfig, validators: Vec<Box<dyn TxValidator>>) -> Self {
        Mempool {
            config,
            validators,
            by_hash: HashMap::new(),
            heap: BinaryHeap::new(),
            by_receiver: HashMap::new(),
            by_sender: HashMap::new(),
            by_source: HashMap::new(),
            total_size: 0,
            stats: MempoolStats::default(),
        }
    }

    /// Admit a transaction.
    ///
    /// Validator failures do not reject: the entry is inserted flagged so
    /// operators can observe the cause distribution. Space is made by
    /// evicting strictly-lower-priority entries; when nothing below the
    /// newcomer can be evicted the pool is `Full`.
    pub fn submit(
        &mut self,
        signed_tx: SignedTransaction,
        source: TxSource,
    ) -> Result<TxHash, PoolError> {
        self.stats.submitted += 1;
        let tx_hash = signed_tx.tx_hash.clone();

        if self.by_hash.contains_key(&tx_hash) {
            self.stats.rejected_duplicate += 1;
            return Err(PoolError::Duplicate);
        }

        let decoded = signed_tx
            .transaction()
            .map_err(|e| PoolError::ParseFailed(e.to_string()))?;
        let size_bytes = signed_tx.size_bytes();
        let fee = estimate_fee(&signed_tx).map_err(|e| PoolError::ParseFailed(e.to_string()))?;

        let now = Utc::now();
        let age_seconds = (now - decoded.timestamp).num_seconds().max(0) as f64;
        let priority = priority_for(fee, age_seconds, size_bytes, source);

        // Byte budget, then count budget; only lower-priority entries yield
        if size_bytes > self.config.max_mempool_size {
            self.stats.rejected_full += 1;
            return Err(PoolError::Full);
        }
        while self.total_size + size_bytes > self.config.max_mempool_size {
            if self.evict_one_below(Some(priority)).is_none() {
                self.stats.rejected_full += 1;
                return Err(PoolError::Full);
            }
        }
        while self.by_hash.len() >= self.config.max_transactions {
            if self.evict_one_below(Some(priority)).is_none() {
                self.stats.rejected_full += 1;
                return Err(PoolError::Full);
            }
        }

        // Run validators in registration order; record the first failure
        let mut validation_error = None;
        for validator in &self.validators {
            if let Err(cause) = validator.validate(&signed_tx) {
                self.stats.validation_failures += 1;
                debug!(
                    tx = %tx_hash,
                    validator = validator.name(),
                    "validation failed: {cause}"
                );
                validation_error = Some(format!("{}: {cause}", validator.name()));
                break;
            }
        }

        for output in &decoded.outputs {
            self.by_receiver
                .entry(output.address.encode())
                .or_default()
                .insert(tx_hash.clone());
        }
        for input in &decoded.inputs {
            self.by_sender
                .entry(sender_proxy(&input.previous_tx_hash))
                .or_default()
                .insert(tx_hash.clone());
        }
        self.by_source
            .entry(source)
            .or_default()
            .insert(tx_hash.clone());

        self.heap.push(HeapEntry {
            priority,
            received_at: now,
            tx_hash: tx_hash.clone(),
        });
        self.by_hash.insert(
            tx_hash.clone(),
            MempoolEntry {
                signed_tx,
                source,
                received_at: now,
                size_bytes,
                fee,
                priority,
                validated: true,
                validation_error,
                broadcast_count: 0,
                last_broadcast: None,
            },
        );
        self.total_size += size_bytes;
        self.stats.accepted += 1;

        Ok(tx_hash)
    }

    /// Remove a transaction; the heap entry goes stale and is skipped later
    pub fn remove(&mut self, tx_hash: &str) -> Option<MempoolEntry> {
        let entry = self.by_hash.remove(tx_hash)?;
        self.total_size -= entry.size_bytes;
        self.unindex(tx_hash, &entry);
        Some(entry)
    }

    fn unindex(&mut self, tx_hash: &str, entry: &MempoolEntry) {
        if let Ok(decoded) = entry.signed_tx.transaction() {
            for output in &decoded.outputs {
                if let Some(set) = self.by_receiver.get_mut(&output.address.encode()) {
                    set.remove(tx_hash);
                    if set.is_empty() {
                        self.by_receiver.remove(&output.address.encode());
                    }
                }
            }
            for input in &decoded.inputs {
                let proxy = sender_proxy(&input.previous_tx_hash);
                if let Some(set) = self.by_sender.get_mut(&proxy) {
                    set.remove(tx_hash);
                    if set.is_empty() {
                        self.by_sender.remove(&proxy);
                    }
                }
            }
        }
        if let Some(set) = self.by_source.get_mut(&entry.source) {
            set.remove(tx_hash);
        }
    }

    /// Evict the lowest-priority entry, optionally only if it ranks strictly
    /// below the ceiling. Returns the evicted hash.
    fn evict_one_below(&mut self, ceiling: Option<f64>) -> Option<TxHash> {
        let victim = self
            .by_hash
            .iter()
            .min_by(|a, b| {
                a.1.priority
                    .total_cmp(&b.1.priority)
                    .then_with(|| b.1.received_at.cmp(&a.1.received_at))
            })
            .map(|(hash, entry)| (hash.clone(), entry.priority))?;

        if let Some(ceiling) = ceiling {
            if victim.1 >= ceiling {
                return None;
            }
        }

        self.remove(&victim.0)?;
        self.stats.evicted += 1;
        debug!(tx = %victim.0, priority = victim.1, "evicted from mempool");
        Some(victim.0)
    }

    /// Free at least `bytes_needed` by evicting lowest-priority entries
    pub fn evict_at_least(&mut self, bytes_needed: usize) -> Result<usize, PoolError> {
        let mut freed = 0usize;
        while freed < bytes_needed {
            let before = self.total_size;
            if self.evict_one_below(None).is_none() {
                return Err(PoolError::CannotEvict(bytes_needed - freed));
            }
            freed += before - self.total_size;
        }
        Ok(freed)
    }

    pub fn get(&self, tx_hash: &str) -> Option<&MempoolEntry> {
        self.by_hash.get(tx_hash)
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        self.by_hash.contains_key(tx_hash)
    }

    /// Entries spending from a sender proxy key
    pub fn get_by_sender(&self, proxy: &str) -> Vec<&MempoolEntry> {
        self.collect_index(self.by_sender.get(proxy))
    }

    /// Entries paying the given encoded address
    pub fn get_by_receiver(&self, address: &str) -> Vec<&MempoolEntry> {
        self.collect_index(self.by_receiver.get(address))
    }

    /// Entries from a source
    pub fn get_by_source(&self, source: TxSource) -> Vec<&MempoolEntry> {
        self.collect_index(self.by_source.get(&source))
    }

    fn collect_index(&self, hashes: Option<&HashSet<TxHash>>) -> Vec<&MempoolEntry> {
        hashes
            .map(|set| set.iter().filter_map(|h| self.by_hash.get(h)).collect())
            .unwrap_or_default()
    }

    /// The k highest-priority live entries, best first. Drains a copy of the
    /// heap, skipping entries that have since been removed.
    pub fn top_k(&self, k: usize) -> Vec<SignedTransaction> {
        let mut heap = self.heap.clone();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(k.min(self.by_hash.len()));

        while out.len() < k {
            let Some(candidate) = heap.pop() else { break };
            if let Some(entry) = self.by_hash.get(&candidate.tx_hash) {
                if seen.insert(candidate.tx_hash.clone()) {
                    out.push(entry.signed_tx.clone());
                }
            }
        }
        out
    }

    /// Drop entries older than the expiry window; returns how many
    pub fn cleanup_expired(&mut self) -> usize {
        let cutoff = Utc::now() - self.config.tx_expiry;
        let expired: Vec<TxHash> = self
            .by_hash
            .iter()
            .filter(|(_, entry)| entry.received_at < cutoff)
            .map(|(hash, _)| hash.clone())
            .collect();

        for hash in &expired {
            self.remove(hash);
        }
        self.stats.expired += expired.len() as u64;
        if !expired.is_empty() {
            debug!("expired {} mempool entries", expired.len());
        }
        expired.len()
    }

    /// Mark an entry as broadcast once more
    pub fn record_broadcast(&mut self, tx_hash: &str) {
        if let Some(entry) = self.by_hash.get_mut(tx_hash) {
            entry.broadcast_count += 1;
            entry.last_broadcast = Some(Utc::now());
        }
    }

    pub fn stats(&self) -> MempoolStats {
        let mut stats = self.stats.clone();
        stats.total_transactions = self.by_hash.len();
        stats.total_bytes = self.total_size;
        stats
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

fn priority_for(fee: Amount, age_seconds: f64, size_bytes: usize, source: TxSource) -> f64 {
    let mut priority = fee as f64 * W_FEE + age_seconds * W_TIME + size_bytes as f64 * W_SIZE;
    if source == TxSource::Local {
        priority *= LOCAL_MULTIPLIER;
    }
    priority.max(PRIORITY_FLOOR)
}
