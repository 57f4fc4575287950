//! # opkcat
//!
//! Incremental catalog builder for OPK package archives.
//!
//! Sources are package URLs discovered in a markdown document. On every fetch
//! cycle each known source is fetched conditionally; changed archives are
//! hashed, unpacked and their desktop entry manifests read into a
//! [`CatalogRecord`]. Records are deduplicated by content hash and persisted
//! together with each source's freshness, then made searchable.
//!
//! ## Quick Start
//!
//! ```no_run
//! use opkcat::{Catalog, Config, FetchPool, FetchScheduler, RecordBuilder, run_until_signal};
//! use opkcat::fetcher::{HttpGetter, UnsquashfsExtractor};
//! use opkcat::scheduler::Service;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let catalog = Arc::new(Catalog::from_config(&config).await?);
//!     catalog.register_source("http://example.com/gambatte.opk").await?;
//!
//!     let builder = Arc::new(RecordBuilder::new(
//!         Arc::new(HttpGetter::new(&config.fetch)?),
//!         Arc::new(UnsquashfsExtractor::from_config(&config.extract)?),
//!         config.temp_dir(),
//!         config.extract.manifest_suffix.clone(),
//!     ));
//!     let pool = Arc::new(FetchPool::new(
//!         catalog.clone(),
//!         builder,
//!         config.fetch.max_concurrent_fetches,
//!     ));
//!     let scheduler = FetchScheduler::new(pool, config.schedule.fetch_interval, false);
//!
//!     scheduler.start(CancellationToken::new()).await?;
//!     run_until_signal(&scheduler).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Catalog store: primary key-value store and search index
pub mod db;
/// Error types
pub mod error;
/// Conditional fetching, unpacking and manifest reading
pub mod fetcher;
/// Bounded-concurrency fetch cycles
pub mod pool;
/// Periodic fetch scheduling and service lifecycle
pub mod scheduler;
/// Package link discovery in markdown documents
pub mod sources;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Catalog, CatalogOptions};
pub use error::{DatabaseError, Error, ExtractError, FetchError, Result};
pub use fetcher::RecordBuilder;
pub use pool::FetchPool;
pub use scheduler::{FetchScheduler, SchedulerState, Service};
pub use types::{
    BuildOutcome, CatalogRecord, ContentHash, CycleReport, Entry, Event, Freshness,
    SourceFreshness,
};

/// Wait for a termination signal, then stop the scheduler.
///
/// - **Unix:** SIGTERM or SIGINT. If one handler cannot be registered the
///   other is still honoured; if neither can, falls back to `ctrl_c()`.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns once every in-flight fetch cycle has exited.
pub async fn run_until_signal(scheduler: &FetchScheduler) -> Result<()> {
    let signal = wait_for_signal().await;
    tracing::info!(
        signal,
        state = %scheduler.state(),
        active_cycles = scheduler.active_cycles(),
        "Shutdown signal received, stopping fetch scheduler"
    );
    scheduler.stop().await
}

/// Resolves with the name of the signal that arrived
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = [
        ("SIGTERM", signal(SignalKind::terminate())),
        ("SIGINT", signal(SignalKind::interrupt())),
    ];

    let mut registered = Vec::with_capacity(handlers.len());
    for (name, handler) in handlers {
        match handler {
            Ok(handler) => registered.push((name, handler)),
            // Restricted environments (containers, tests) may refuse some handlers
            Err(e) => tracing::warn!(signal = name, error = %e, "Could not register signal handler"),
        }
    }

    match registered.as_mut_slice() {
        [] => {
            tracing::error!("No signal handlers registered, falling back to ctrl_c");
            let _ = tokio::signal::ctrl_c().await;
            "ctrl_c"
        }
        [(name, only)] => {
            only.recv().await;
            *name
        }
        [(first_name, first), (second_name, second), ..] => {
            tokio::select! {
                _ = first.recv() => *first_name,
                _ = second.recv() => *second_name,
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C, stopping now");
    }
    "ctrl_c"
}
