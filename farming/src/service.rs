// Farming responder
// Single-consumer worker over a bounded challenge queue

use crate::{Challenge, FarmingError, ProofOfStorage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use umbra_core::hashing::shake256_32;
use umbra_core::{Identifier, Keypair};
use umbra_plot::{format, PlotIndex};

/// Smoothing factor for the response-time average
const RESPONSE_EWMA_ALPHA: f64 = 0.2;

/// Farming service knobs
#[derive(Clone, Debug)]
pub struct FarmingConfig {
    /// Bounded challenge queue depth; overflow fails fast with `Busy`
    pub queue_depth: usize,
    /// Per-challenge deadline
    pub challenge_timeout: Duration,
}

impl Default for FarmingConfig {
    fn default() -> Self {
        FarmingConfig {
            queue_depth: 64,
            challenge_timeout: Duration::from_secs(30),
        }
    }
}

/// Farming counters
#[derive(Clone, Debug, Default)]
pub struct FarmingStats {
    pub challenges_handled: u64,
    pub challenges_failed: u64,
    /// Exponentially smoothed response time in milliseconds
    pub average_response_ms: f64,
    pub last_challenge_at: Option<DateTime<Utc>>,
}

/// One plot as seen by `list_plots`
#[derive(Clone, Debug)]
pub struct PlotSummary {
    pub path: PathBuf,
    pub k: u32,
    pub entries: u64,
}

struct ChallengeRequest {
    challenge: Challenge,
    reply: oneshot::Sender<Result<ProofOfStorage, FarmingError>>,
}

/// Async seam between the producer and whatever answers challenges;
/// tests substitute a fake responder.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    async fn respond(&self, challenge: Challenge) -> Result<ProofOfStorage, FarmingError>;
}

/// Handle to the farming worker
pub struct FarmingService {
    requests: mpsc::Sender<ChallengeRequest>,
    stats: Arc<RwLock<FarmingStats>>,
    plot_dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl FarmingService {
    /// Spawn the responder worker over an already-built plot index
    pub fn start(
        index: Arc<PlotIndex>,
        plot_dirs: Vec<PathBuf>,
        config: FarmingConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (requests_tx, mut requests_rx) = mpsc::channel::<ChallengeRequest>(config.queue_depth);
        let stats = Arc::new(RwLock::new(FarmingStats::default()));
        let worker_stats = Arc::clone(&stats);

        let worker = tokio::spawn(async move {
            info!("farming responder started");
            loop {
                let request = tokio::select! {
                    changed = shutdown.changed() => {
                        // A dropped sender means nobody can signal us again
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    request = requests_rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                let started = std::time::Instant::now();
                let worker_index = Arc::clone(&index);
                let challenge = request.challenge.clone();

                // Plot reads and lattice signing are blocking work
                let result = tokio::task::spawn_blocking(move || {
                    respond_from_plots(&worker_index, &challenge)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(FarmingError::SignerFailure(format!("worker panicked: {e}")))
                });

                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                {
                    let mut stats = worker_stats.write().await;
                    stats.last_challenge_at = Some(Utc::now());
                    match &result {
                        Ok(_) => stats.challenges_handled += 1,
                        Err(_) => stats.challenges_failed += 1,
                    }
                    stats.average_response_ms = if stats.challenges_handled
                        + stats.challenges_failed
                        == 1
                    {
                        elapsed_ms
                    } else {
                        RESPONSE_EWMA_ALPHA * elapsed_ms
                            + (1.0 - RESPONSE_EWMA_ALPHA) * stats.average_response_ms
                    };
                }

                match &result {
                    Ok(proof) => debug!(
                        id = %request.challenge.id,
                        plot = %proof.plot_path.display(),
                        quality = proof.quality(),
                        "challenge answered"
                    ),
                    Err(e) => warn!(id = %request.challenge.id, "challenge failed: {e}"),
                }

                // Submitter may have timed out and gone away
                let _ = request.reply.send(result);
            }
            info!("farming responder stopped");
        });

        (
            FarmingService {
                requests: requests_tx,
                stats,
                plot_dirs,
                timeout: config.challenge_timeout,
            },
            worker,
        )
    }

    /// Queue a challenge and wait for its proof
    pub async fn submit_challenge(
        &self,
        challenge: Challenge,
    ) -> Result<ProofOfStorage, FarmingError> {
        let (reply, response) = oneshot::channel();

        self.requests
            .try_send(ChallengeRequest { challenge, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => FarmingError::Busy,
                mpsc::error::TrySendError::Closed(_) => FarmingError::ServiceStopped,
            })?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FarmingError::ServiceStopped),
            Err(_) => Err(FarmingError::Timeout),
        }
    }

    /// Headers of every plot in the configured directories
    pub fn list_plots(&self) -> Vec<PlotSummary> {
        let mut plots = Vec::new();
        for dir in &self.plot_dirs {
            let Ok(read_dir) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !format::is_plot_file_name(name) {
                    continue;
                }
                match File::open(&path).map_err(FarmingError::Io).and_then(|mut f| {
                    format::read_header(&mut f).map_err(FarmingError::Plot)
                }) {
                    Ok(header) => plots.push(PlotSummary {
                        path,
                        k: header.k,
                        entries: header.entries.len() as u64,
                    }),
                    Err(e) => warn!("unreadable plot {}: {e}", path.display()),
                }
            }
        }
        plots
    }

    pub async fn stats(&self) -> FarmingStats {
        self.stats.read().await.clone()
    }
}

#[async_trait]
impl ChallengeResponder for FarmingService {
    async fn respond(&self, challenge: Challenge) -> Result<ProofOfStorage, FarmingError> {
        self.submit_challenge(challenge).await
    }
}

/// Resolve a challenge against the index and sign it with the plotted key
fn respond_from_plots(
    index: &PlotIndex,
    challenge: &Challenge,
) -> Result<ProofOfStorage, FarmingError> {
    let target = Identifier::from_bytes(shake256_32(&challenge.payload));
    let (identifier, location) = index
        .lookup_closest(&target)?
        .ok_or(FarmingError::NoMatch)?;

    // Plot files are opened per lookup and closed after the read
    let mut file = File::open(&location.path)?;
    let blob = format::read_private_key(&mut file, location.offset)?;

    let keypair = Keypair::from_private_key_bytes(&blob)
        .map_err(|e| FarmingError::SignerFailure(e.to_string()))?;
    let public_key = keypair.public_key();
    if public_key.identifier() != identifier {
        return Err(FarmingError::SignerFailure(
            "plot entry identifier does not match its key".into(),
        ));
    }

    let signature = keypair
        .sign(&challenge.payload)
        .map_err(|e| FarmingError::SignerFailure(e.to_string()))?;

    Ok(ProofOfStorage {
        challenge: challenge.payload.clone(),
        plot_path: location.path,
        offset: location.offset,
        identifier,
        public_key,
        signature,
    })
}
