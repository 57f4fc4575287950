//! Fetch Worker Pool
//!
//! One cycle is a producer feeding known sources into a bounded queue and a
//! fixed set of workers draining it. Each worker keeps its own records and
//! counters; they are merged once every worker has exited and the merged
//! batch is written with a single [`Catalog::upsert_batch`] call.

use crate::db::Catalog;
use crate::error::{Error, Result};
use crate::fetcher::RecordBuilder;
use crate::types::{BuildOutcome, CatalogRecord, CycleReport, SourceFreshness};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Results gathered by one worker
#[derive(Default)]
struct WorkerTally {
    records: Vec<CatalogRecord>,
    built: usize,
    unchanged: usize,
    failed: usize,
}

impl WorkerTally {
    fn merge(&mut self, other: WorkerTally) {
        self.records.extend(other.records);
        self.built += other.built;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Bounded-concurrency fetch pipeline over every known source
pub struct FetchPool {
    catalog: Arc<Catalog>,
    builder: Arc<RecordBuilder>,
    max_concurrent: usize,
}

impl FetchPool {
    /// Create a pool running at most `max_concurrent` builds at once (minimum 1)
    pub fn new(catalog: Arc<Catalog>, builder: Arc<RecordBuilder>, max_concurrent: usize) -> Self {
        Self {
            catalog,
            builder,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run one fetch cycle
    ///
    /// Per-source failures are logged and counted but never abort the cycle.
    /// Cancelling `cancel` stops the producer; workers finish what is already
    /// queued and the records gathered so far are still written.
    ///
    /// # Errors
    ///
    /// Returns an error if the known sources cannot be enumerated or the batch
    /// write fails.
    pub async fn run_cycle(&self, cycle: u64, cancel: &CancellationToken) -> Result<CycleReport> {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<SourceFreshness>(self.max_concurrent);
        let rx = Arc::new(Mutex::new(rx));

        let producer = {
            let catalog = self.catalog.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { produce(catalog, tx, cancel).await })
        };

        let mut workers = JoinSet::new();
        for worker in 0..self.max_concurrent {
            let builder = self.builder.clone();
            let rx = rx.clone();
            workers.spawn(async move { work(worker, builder, rx).await });
        }

        let mut tally = WorkerTally::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_tally) => tally.merge(worker_tally),
                Err(e) => error!(cycle, error = %e, "Fetch worker panicked"),
            }
        }

        let sources = producer
            .await
            .map_err(|e| Error::Other(format!("source producer panicked: {}", e)))??;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!(cycle, "Fetch cycle cancelled, persisting records gathered so far");
        }

        info!(cycle, records = tally.records.len(), "Writing fetched records");
        let inserted = self.catalog.upsert_batch(&tally.records).await?;

        let report = CycleReport {
            cycle,
            sources,
            built: tally.built,
            unchanged: tally.unchanged,
            failed: tally.failed,
            inserted,
            cancelled,
            duration: started.elapsed(),
        };
        info!(
            cycle,
            sources = report.sources,
            built = report.built,
            unchanged = report.unchanged,
            failed = report.failed,
            inserted = report.inserted,
            duration_ms = report.duration.as_millis() as u64,
            "Fetch cycle complete"
        );
        Ok(report)
    }
}

/// Enqueue every known source until exhausted or cancelled; returns how many were queued
async fn produce(
    catalog: Arc<Catalog>,
    tx: mpsc::Sender<SourceFreshness>,
    cancel: CancellationToken,
) -> Result<usize> {
    let sources = catalog.known_sources().await?;
    debug!(count = sources.len(), "Enumerated known sources");

    let mut queued = 0;
    for source in sources {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(queued, "Cancellation requested, no more sources will be queued");
                break;
            }
            sent = tx.send(source) => {
                if sent.is_err() {
                    break;
                }
                queued += 1;
            }
        }
    }
    // Dropping the sender closes the queue so workers drain and exit
    Ok(queued)
}

async fn work(
    worker: usize,
    builder: Arc<RecordBuilder>,
    rx: Arc<Mutex<mpsc::Receiver<SourceFreshness>>>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let next = rx.lock().await.recv().await;
        let Some(source) = next else {
            break;
        };

        debug!(worker, url = %source.url, "Processing source");
        match builder.build(&source).await {
            Ok(BuildOutcome::Unchanged) => {
                debug!(url = %source.url, "Source is up to date");
                tally.unchanged += 1;
            }
            Ok(BuildOutcome::Built(record)) => {
                debug!(url = %source.url, hash = %record.hash, entries = record.entries.len(), "Record built");
                tally.built += 1;
                tally.records.push(record);
            }
            Err(e) if e.is_source_failure() => {
                warn!(url = %source.url, error = %e, "Failed to build record, skipping source");
                tally.failed += 1;
            }
            Err(e) => {
                error!(url = %source.url, error = %e, "Unexpected error building record, skipping source");
                tally.failed += 1;
            }
        }
    }

    tally
}
