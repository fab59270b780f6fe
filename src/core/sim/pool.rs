//! Worker pool for batched simulations
//!
//! Batches go through one bounded queue shared by a fixed set of worker
//! threads. Each batch carries its own result channel and every job in it
//! produces exactly one outcome, unless the pool is stopped first.

use super::simulator::{simulate_request, SimResult};
use super::subject::AuthContext;
use crate::error::{Result, SimError};
use crate::options::{Options, PoolConfig};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Capacity of the batch queue
pub const QUEUE_CAPACITY: usize = 512;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One simulation request with the options it runs under
#[derive(Debug, Clone)]
pub struct Job {
    pub context: AuthContext,
    pub options: Arc<Options>,
}

impl Job {
    pub fn new(context: AuthContext, options: Arc<Options>) -> Self {
        Job { context, options }
    }
}

struct Batch {
    jobs: Vec<Job>,
    results: Sender<Result<SimResult>>,
}

struct PoolState {
    sender: Option<Sender<Batch>>,
    workers: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

/// Fixed-size pool of simulation workers
pub struct Pool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Pool {
            config,
            state: Mutex::new(PoolState {
                sender: None,
                workers: Vec::new(),
                cancel: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Pool sized from `IAMSIM_*` environment variables
    pub fn from_env() -> Self {
        Self::new(PoolConfig::from_env())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// How long a collector should wait for one batch outcome
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Spawn the workers; a running pool is left as is
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.sender.is_some() {
            return Ok(());
        }

        let (sender, receiver) = channel::bounded::<Batch>(QUEUE_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(self.config.num_workers);

        for id in 0..self.config.num_workers.max(1) {
            let receiver = receiver.clone();
            let worker_cancel = Arc::clone(&cancel);
            let spawned = thread::Builder::new()
                .name(format!("iamsim-worker-{}", id))
                .spawn(move || run_worker(id, receiver, worker_cancel));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    cancel.store(true, Ordering::Release);
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        info!(
            workers = workers.len(),
            capacity = QUEUE_CAPACITY,
            "simulation pool started"
        );
        state.sender = Some(sender);
        state.workers = workers;
        state.cancel = cancel;
        Ok(())
    }

    /// Queue a batch, starting the pool if needed
    ///
    /// The returned receiver yields one outcome per job. It disconnects early
    /// if the pool is stopped before the batch finishes.
    pub fn submit(&self, jobs: Vec<Job>) -> Result<Receiver<Result<SimResult>>> {
        self.start()?;
        let (sender, cancel) = {
            let state = self.state.lock();
            match &state.sender {
                Some(sender) => (sender.clone(), Arc::clone(&state.cancel)),
                None => return Err(SimError::PoolStopped),
            }
        };

        let (results, outcomes) = channel::unbounded();
        let mut batch = Batch { jobs, results };
        loop {
            match sender.send_timeout(batch, POLL_INTERVAL) {
                Ok(()) => return Ok(outcomes),
                Err(SendTimeoutError::Timeout(pending)) => {
                    if cancel.load(Ordering::Acquire) {
                        return Err(SimError::PoolStopped);
                    }
                    batch = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(SimError::PoolStopped),
            }
        }
    }

    /// Cancel outstanding work and join every worker
    ///
    /// A later `submit` starts a fresh set of workers.
    pub fn stop(&self) {
        let workers = {
            let mut state = self.state.lock();
            state.cancel.store(true, Ordering::Release);
            state.sender = None;
            std::mem::take(&mut state.workers)
        };
        if workers.is_empty() {
            return;
        }

        let count = workers.len();
        for handle in workers {
            let _ = handle.join();
        }
        info!(workers = count, "simulation pool stopped");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(id: usize, batches: Receiver<Batch>, cancel: Arc<AtomicBool>) {
    while !cancel.load(Ordering::Acquire) {
        match batches.recv_timeout(POLL_INTERVAL) {
            Ok(batch) => handle_batch(batch, &cancel),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = id, "worker exiting");
}

fn handle_batch(batch: Batch, cancel: &AtomicBool) {
    for job in batch.jobs {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        let outcome = simulate_request(&job.context, &job.options);
        if batch.results.send(outcome).is_err() {
            // Collector gave up on this batch
            return;
        }
    }
}
