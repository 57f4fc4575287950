//! End-to-end tests of the fetch pipeline against a mock HTTP server
//!
//! The HTTP transport is real (reqwest against wiremock); only unsquashfs is
//! replaced by a fake extractor so the tests run without squashfs images.

mod common;

use common::{Pipeline, conditional_request_count, mount_package, write_document};
use opkcat::scheduler::Service;
use opkcat::sources::source_list;
use opkcat::{Event, FetchScheduler, SchedulerState};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

async fn register_document(pipeline: &Pipeline, links: &[String]) -> usize {
    let document = write_document(pipeline.dir.path(), links);
    let urls = source_list(&document, ".opk").unwrap();
    for url in &urls {
        pipeline.catalog.register_source(url).await.unwrap();
    }
    urls.len()
}

#[tokio::test]
async fn cycle_catalogs_linked_packages_and_skips_unchanged_ones() {
    let server = MockServer::start().await;
    mount_package(&server, "/gambatte.opk", "\"g1\"", "Gambatte").await;
    mount_package(&server, "/picodrive.opk", "\"p1\"", "PicoDrive").await;

    let pipeline = Pipeline::new().await;
    let registered = register_document(
        &pipeline,
        &[
            format!("{}/gambatte.opk", server.uri()),
            format!("{}/readme.txt", server.uri()),
            format!("{}/picodrive.opk", server.uri()),
        ],
    )
    .await;
    assert_eq!(registered, 2);

    let first = pipeline.pool.run_cycle(1, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.sources, 2);
    assert_eq!(first.built, 2);
    assert_eq!(first.inserted, 2);
    assert_eq!(pipeline.extractor.calls(), 2);
    assert_eq!(pipeline.temp_files(), 0);

    let results = pipeline.catalog.query("Gambatte").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entries[0].name, "Gambatte");
    assert_eq!(results[0].entries[0].categories, vec!["games", "arcade"]);
    assert_eq!(results[0].etag, "\"g1\"");

    // Second pass sends the stored tags and gets 304 for both
    let second = pipeline.pool.run_cycle(2, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(pipeline.extractor.calls(), 2);
    assert_eq!(conditional_request_count(&server).await, 2);
}

#[tokio::test]
async fn mirrored_package_is_stored_once_and_both_mirrors_become_fresh() {
    let server = MockServer::start().await;
    mount_package(&server, "/mirror-a/app.opk", "\"a\"", "Mirrored").await;
    mount_package(&server, "/mirror-b/app.opk", "\"b\"", "Mirrored").await;

    let pipeline = Pipeline::new().await;
    register_document(
        &pipeline,
        &[
            format!("{}/mirror-a/app.opk", server.uri()),
            format!("{}/mirror-b/app.opk", server.uri()),
        ],
    )
    .await;

    let first = pipeline.pool.run_cycle(1, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.built, 2);
    assert_eq!(first.inserted, 1);
    assert_eq!(pipeline.catalog.record_count().await.unwrap(), 1);

    let second = pipeline.pool.run_cycle(2, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(pipeline.extractor.calls(), 2);
}

#[tokio::test]
async fn server_errors_do_not_abort_the_cycle() {
    let server = MockServer::start().await;
    mount_package(&server, "/good.opk", "\"g\"", "Good").await;

    let pipeline = Pipeline::new().await;
    register_document(
        &pipeline,
        &[
            format!("{}/missing.opk", server.uri()),
            format!("{}/good.opk", server.uri()),
        ],
    )
    .await;

    let report = pipeline.pool.run_cycle(1, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.inserted, 1);

    // The failed source keeps zero freshness and is retried next time
    let freshness = pipeline
        .catalog
        .freshness(&format!("{}/missing.opk", server.uri()))
        .await
        .unwrap();
    assert!(freshness.is_zero());
}

#[tokio::test]
async fn freshness_survives_reopen() {
    let server = MockServer::start().await;
    mount_package(&server, "/gambatte.opk", "\"g1\"", "Gambatte").await;

    let pipeline = Pipeline::new().await;
    register_document(&pipeline, &[format!("{}/gambatte.opk", server.uri())]).await;
    pipeline.pool.run_cycle(1, &CancellationToken::new()).await.unwrap();
    let dir = pipeline.close().await;

    let reopened = Pipeline::in_dir(dir).await;
    assert_eq!(reopened.catalog.record_count().await.unwrap(), 1);
    assert_eq!(reopened.catalog.query("gamb").await.unwrap().len(), 1);

    let report = reopened.pool.run_cycle(2, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(reopened.extractor.calls(), 0);
}

#[tokio::test]
async fn scheduler_runs_startup_cycle_and_stops_cleanly() {
    let server = MockServer::start().await;
    mount_package(&server, "/gambatte.opk", "\"g1\"", "Gambatte").await;

    let pipeline = Pipeline::new().await;
    register_document(&pipeline, &[format!("{}/gambatte.opk", server.uri())]).await;

    let scheduler = FetchScheduler::new(pipeline.pool.clone(), Duration::from_secs(3600), false);
    let mut events = scheduler.subscribe();
    scheduler.start(CancellationToken::new()).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Event::CycleFinished(report) = events.recv().await.unwrap() {
                return report;
            }
        }
    })
    .await
    .expect("startup cycle finished");
    assert_eq!(report.cycle, 1);
    assert_eq!(report.inserted, 1);

    scheduler.stop().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(scheduler.active_cycles(), 0);
    assert_eq!(pipeline.catalog.query("Gambatte").await.unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn termination_signal_stops_running_scheduler() {
    let pipeline = Pipeline::new().await;
    let scheduler = std::sync::Arc::new(FetchScheduler::new(
        pipeline.pool.clone(),
        Duration::from_secs(3600),
        false,
    ));
    scheduler.start(CancellationToken::new()).await.unwrap();

    let waiter = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { opkcat::run_until_signal(&scheduler).await })
    };
    // Let the waiter install its handlers before the signal is sent
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(10), waiter)
        .await
        .expect("scheduler stopped after signal")
        .unwrap()
        .unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}
