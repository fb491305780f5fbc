use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::handoff::{HandoffBuffer, Producer, QueueEntry};
use crate::ids::Partition;
use crate::probe::{Probe, ProbeError};

/// Positions between two progress lines, measured on the shared ceiling.
const PROGRESS_INTERVAL: usize = 1_000;

/// Counters shared by every worker of one pool.
#[derive(Debug, Default)]
pub struct PoolProgress {
    ceiling: AtomicUsize,
    active: AtomicUsize,
}

impl PoolProgress {
    /// Highest per-worker position observed so far.
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Relaxed)
    }

    /// Workers still iterating their partition.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Raise the ceiling to `position`; true when this call raised it.
    fn advance(&self, position: usize) -> bool {
        self.ceiling.fetch_max(position, Ordering::Relaxed) < position
    }
}

/// Decrements the active count however the worker ends.
struct ActiveGuard(Arc<PoolProgress>);

impl ActiveGuard {
    fn enter(progress: &Arc<PoolProgress>) -> Self {
        progress.active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(progress))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The partition ran out.
    Exhausted,
    /// Shutdown was requested.
    Stopped,
    /// The probe failed fatally, or the task panicked.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    /// Results handed to the buffer by this worker.
    pub probed: usize,
    pub exit: WorkerExit,
}

impl WorkerReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.exit, WorkerExit::Failed(_))
    }
}

/// W concurrent producers, one per partition.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<(usize, JoinHandle<WorkerReport>)>,
    shutdown: CancellationToken,
    progress: Arc<PoolProgress>,
}

impl WorkerPool {
    /// Spawn one task per partition. Every task holds a producer handle on
    /// `buffer` until it ends.
    pub fn spawn(
        partitions: Vec<Partition>,
        probe: Arc<dyn Probe>,
        buffer: &Arc<HandoffBuffer>,
        shutdown: CancellationToken,
    ) -> Self {
        let progress = Arc::new(PoolProgress::default());

        let handles = partitions
            .into_iter()
            .map(|partition| {
                let worker = partition.worker();
                let task = Worker {
                    worker,
                    probe: Arc::clone(&probe),
                    producer: buffer.producer(),
                    shutdown: shutdown.clone(),
                    progress: Arc::clone(&progress),
                    active: ActiveGuard::enter(&progress),
                };
                (worker, tokio::spawn(task.run(partition)))
            })
            .collect();

        Self {
            handles,
            shutdown,
            progress,
        }
    }

    pub fn progress(&self) -> Arc<PoolProgress> {
        Arc::clone(&self.progress)
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Ask every worker to stop at its next iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every worker to finish.
    pub async fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for (worker, handle) in self.handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => {
                    error!(worker, error = %err, "worker task did not complete");
                    WorkerReport {
                        worker,
                        probed: 0,
                        exit: WorkerExit::Failed(err.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

struct Worker {
    worker: usize,
    probe: Arc<dyn Probe>,
    producer: Producer,
    shutdown: CancellationToken,
    progress: Arc<PoolProgress>,
    active: ActiveGuard,
}

impl Worker {
    async fn run(self, partition: Partition) -> WorkerReport {
        let worker = self.worker;
        let mut probed = 0;
        let exit = self.iterate(partition, &mut probed).await;
        drop(self.active);

        debug!(worker, probed, exit = ?exit, "worker finished");
        WorkerReport {
            worker,
            probed,
            exit,
        }
    }

    async fn iterate(&self, partition: Partition, probed: &mut usize) -> WorkerExit {
        let worker = self.worker;

        for (position, id) in partition.enumerate() {
            if self.shutdown.is_cancelled() {
                return WorkerExit::Stopped;
            }

            if self.progress.advance(position) && position % PROGRESS_INTERVAL == 0 {
                info!(
                    position,
                    active = self.progress.active(),
                    "scan progress"
                );
            }

            match self.probe.probe(id, &self.shutdown).await {
                Ok(payload) => {
                    if self.shutdown.is_cancelled() {
                        info!(
                            worker,
                            id,
                            position,
                            ceiling = self.progress.ceiling(),
                            active = self.progress.active(),
                            "probe finished during shutdown"
                        );
                    } else if payload.is_some() {
                        info!(worker, id, "payload found");
                    } else {
                        debug!(worker, id, "nothing at identifier");
                    }

                    self.producer.send(QueueEntry::new(id, payload));
                    *probed += 1;
                }
                Err(ProbeError::Cancelled) => return WorkerExit::Stopped,
                Err(err) => {
                    error!(worker, id, error = %err, "probe failed; worker aborting");
                    return WorkerExit::Failed(err.to_string());
                }
            }
        }

        WorkerExit::Exhausted
    }
}
