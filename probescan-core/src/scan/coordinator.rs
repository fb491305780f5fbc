use std::any::{type_name, type_name_of_val};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::handoff::{HandoffBuffer, QueueEntry};
use super::pool::{WorkerPool, WorkerReport};
use crate::config::ScanSettings;
use crate::error::Result;
use crate::ids::{Identifier, IdentifierSet};
use crate::probe::Probe;
use crate::store::ScanStore;

/// Why the consumer loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every worker finished and the buffer ran dry.
    Exhausted,
    /// A present payload turned up outside the configured range.
    OutOfRange(Identifier),
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Summary of one scan run.
#[derive(Clone, Debug)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop: StopReason,
    /// Identifiers written to the ledger during this run.
    pub recorded: u64,
    /// Of those, identifiers that carried a payload.
    pub present: u64,
    pub rows_written: u64,
    pub workers: Vec<WorkerReport>,
}

impl ScanReport {
    pub fn failures(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|report| report.is_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[derive(Debug, Default)]
struct Tally {
    recorded: u64,
    present: u64,
    rows_written: u64,
}

/// Drives one scan: spawns the worker pool, persists every result on the
/// calling task, and enforces the range guard.
pub struct Scanner<S> {
    store: S,
    probe: Arc<dyn Probe>,
    settings: ScanSettings,
}

impl<S> fmt::Debug for Scanner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("store_type", &type_name::<S>())
            .field("probe_type", &type_name_of_val(self.probe.as_ref()))
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S: ScanStore> Scanner<S> {
    pub fn new(store: S, probe: Arc<dyn Probe>, settings: ScanSettings) -> Self {
        Self {
            store,
            probe,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Scan `ids` until they run out, an out-of-range payload appears, or
    /// `cancel` fires. Every result a worker produced is persisted before
    /// this returns.
    pub async fn run(
        &self,
        ids: IdentifierSet,
        cancel: CancellationToken,
    ) -> Result<ScanReport> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let partitions = ids.partition(self.settings.workers)?;

        info!(
            %run_id,
            identifiers = ids.len(),
            workers = self.settings.workers,
            range.min = self.settings.range.min,
            range.max = ?self.settings.range.max,
            order = ?self.settings.order,
            "starting scan"
        );

        let buffer = Arc::new(HandoffBuffer::new(self.settings.order));
        let pool = WorkerPool::spawn(
            partitions,
            Arc::clone(&self.probe),
            &buffer,
            cancel.child_token(),
        );

        let mut tally = Tally::default();
        let stop = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                next = buffer.recv() => next,
            };
            let Some(entry) = next else {
                break StopReason::Exhausted;
            };

            if let Err(err) = self.persist(&entry, &mut tally).await {
                error!(%run_id, id = entry.id, error = %err, "persistence failed; aborting scan");
                pool.request_shutdown();
                pool.join().await;
                return Err(err);
            }

            if entry.payload.is_some() && !self.settings.range.contains(entry.id) {
                warn!(%run_id, id = entry.id, "payload outside identifier range; stopping scan");
                break StopReason::OutOfRange(entry.id);
            }
        };

        let workers = self.shutdown_and_drain(pool, &buffer, &mut tally).await?;

        let report = ScanReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            stop,
            recorded: tally.recorded,
            present: tally.present,
            rows_written: tally.rows_written,
            workers,
        };

        for failure in report.failures() {
            error!(%run_id, worker = failure.worker, exit = ?failure.exit, "worker failed");
        }
        info!(
            %run_id,
            stop = ?report.stop,
            recorded = report.recorded,
            present = report.present,
            rows = report.rows_written,
            "scan finished"
        );

        Ok(report)
    }

    /// Stop the workers, wait for all of them, then persist whatever they
    /// left in the buffer, in removal order.
    async fn shutdown_and_drain(
        &self,
        pool: WorkerPool,
        buffer: &HandoffBuffer,
        tally: &mut Tally,
    ) -> Result<Vec<WorkerReport>> {
        pool.request_shutdown();
        let progress = pool.progress();
        info!(
            active = progress.active(),
            pending = buffer.len(),
            "waiting for workers"
        );
        let workers = pool.join().await;

        let mut drained = 0usize;
        while let Some(entry) = buffer.try_pop() {
            self.persist(&entry, tally).await?;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "persisted buffered results after shutdown");
        }

        Ok(workers)
    }

    async fn persist(&self, entry: &QueueEntry, tally: &mut Tally) -> Result<()> {
        let outcome = self.store.record(entry.id, entry.payload.as_ref()).await?;
        tally.recorded += 1;
        tally.rows_written += outcome.rows_written as u64;
        if entry.payload.is_some() {
            tally.present += 1;
        }
        Ok(())
    }
}
