// VDF worker
// Dedicated solver task fed by a job channel

use crate::{Vdf, VdfError, VdfProof};
use num_bigint::BigUint;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A solved challenge handed back to the submitter
#[derive(Clone, Debug)]
pub struct VdfSolution {
    pub challenge_id: String,
    pub input: BigUint,
    pub output: BigUint,
    pub proof: BigUint,
    pub elapsed: Duration,
}

/// One unit of work for the solver task
pub struct VdfJob {
    pub seed: Vec<u8>,
    pub reply: oneshot::Sender<Result<VdfSolution, VdfError>>,
}

/// Cheap handle for submitting seeds to the worker
#[derive(Clone)]
pub struct VdfHandle {
    jobs: mpsc::Sender<VdfJob>,
}

impl VdfHandle {
    /// Solve the VDF over the given seed, waiting for the result
    pub async fn solve(&self, seed: Vec<u8>) -> Result<VdfSolution, VdfError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(VdfJob { seed, reply })
            .await
            .map_err(|_| VdfError::ServiceStopped)?;
        response.await.map_err(|_| VdfError::ServiceStopped)?
    }
}

/// Spawn the solver task. Jobs are processed one at a time; the shared
/// cancel flag aborts an in-flight solve mid-squaring.
pub fn spawn_worker(
    vdf: Vdf,
    queue_depth: usize,
    cancel: Arc<AtomicBool>,
) -> (VdfHandle, JoinHandle<()>) {
    let (jobs_tx, mut jobs_rx) = mpsc::channel::<VdfJob>(queue_depth);

    let handle = tokio::spawn(async move {
        info!(
            time = vdf.time(),
            modulus_bits = vdf.modulus().bits(),
            "vdf worker started"
        );

        while let Some(job) = jobs_rx.recv().await {
            let vdf = vdf.clone();
            let cancel = Arc::clone(&cancel);
            let seed = job.seed;

            let result = tokio::task::spawn_blocking(move || {
                let challenge = vdf.generate_challenge(&seed);
                let started = std::time::Instant::now();
                let proof: VdfProof = vdf.solve(&challenge.input, &cancel)?;
                Ok(VdfSolution {
                    challenge_id: challenge.id,
                    input: challenge.input,
                    output: proof.output,
                    proof: proof.proof,
                    elapsed: started.elapsed(),
                })
            })
            .await
            .unwrap_or_else(|e| {
                warn!("vdf solve task panicked: {e}");
                Err(VdfError::ServiceStopped)
            });

            match &result {
                Ok(solution) => debug!(
                    id = %solution.challenge_id,
                    elapsed_ms = solution.elapsed.as_millis() as u64,
                    "vdf solved"
                ),
                Err(e) => warn!("vdf solve failed: {e}"),
            }

            // Submitter may have timed out and dropped the receiver
            let _ = job.reply.send(result);
        }

        info!("vdf worker stopped");
    });

    (VdfHandle { jobs: jobs_tx }, handle)
}
