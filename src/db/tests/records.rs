use super::*;
use crate::error::{DatabaseError, Error};
use std::sync::Arc;

#[tokio::test]
async fn test_upsert_batch_is_idempotent() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let rec = record(1, "http://example.com/a.opk", &["Foo"]);

    assert_eq!(catalog.upsert_batch(std::slice::from_ref(&rec)).await.unwrap(), 1);
    assert!(catalog.exists(&rec.hash).await.unwrap());
    assert_eq!(catalog.upsert_batch(std::slice::from_ref(&rec)).await.unwrap(), 0);
    assert_eq!(catalog.record_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_record_returns_stored_record() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let rec = record(2, "http://example.com/a.opk", &["Foo", "Foo Editor"]);

    catalog.upsert_batch(std::slice::from_ref(&rec)).await.unwrap();

    let stored = catalog.get_record(&rec.hash).await.unwrap().unwrap();
    assert_eq!(stored, rec);
    assert!(
        catalog
            .get_record(&ContentHash::new(vec![9; 32]))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_same_content_from_two_urls_is_stored_once() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let first = record(3, "http://mirror-a.example.com/app.opk", &["App"]);
    let mut second = first.clone();
    second.source_url = "http://mirror-b.example.com/app.opk".to_string();

    // Same batch and across batches
    assert_eq!(
        catalog
            .upsert_batch(&[first.clone(), second.clone()])
            .await
            .unwrap(),
        1
    );
    assert_eq!(catalog.upsert_batch(&[second]).await.unwrap(), 0);

    assert_eq!(catalog.record_count().await.unwrap(), 1);
    let stored = catalog.get_record(&first.hash).await.unwrap().unwrap();
    assert_eq!(stored.source_url, first.source_url);
}

#[tokio::test]
async fn test_empty_hash_aborts_whole_batch() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let good = record(4, "http://example.com/good.opk", &["Good"]);
    let mut bad = record(5, "http://example.com/bad.opk", &["Bad"]);
    bad.hash = ContentHash::default();

    let result = catalog.upsert_batch(&[good.clone(), bad]).await;
    assert!(matches!(
        result,
        Err(Error::Database(DatabaseError::InvalidRecord { .. }))
    ));

    // Nothing from the batch was committed
    assert!(!catalog.exists(&good.hash).await.unwrap());
    assert_eq!(catalog.record_count().await.unwrap(), 0);
    assert_eq!(catalog.source_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_source_url_aborts_whole_batch() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let rec = record(6, "", &["Nameless"]);

    assert!(catalog.upsert_batch(&[rec]).await.is_err());
    assert_eq!(catalog.record_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_new_record_updates_source_freshness() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let rec = record(8, "http://example.com/a.opk", &["Foo"]);
    catalog.register_source(&rec.source_url).await.unwrap();

    catalog.upsert_batch(std::slice::from_ref(&rec)).await.unwrap();

    let freshness = catalog.freshness(&rec.source_url).await.unwrap();
    assert_eq!(freshness.last_fetched, Some(rec.fetched_at));
    assert_eq!(freshness.etag, rec.etag);
}

#[tokio::test]
async fn test_duplicate_advances_freshness_when_enabled() {
    let (catalog, _dir) = open_catalog(CatalogOptions {
        advance_freshness_on_duplicate: true,
        ..CatalogOptions::default()
    })
    .await;
    let original = record(10, "http://mirror-a.example.com/app.opk", &["App"]);
    let mut mirror = original.clone();
    mirror.source_url = "http://mirror-b.example.com/app.opk".to_string();
    mirror.etag = "\"mirror\"".to_string();

    catalog.upsert_batch(&[original]).await.unwrap();
    catalog.register_source(&mirror.source_url).await.unwrap();
    assert_eq!(catalog.upsert_batch(std::slice::from_ref(&mirror)).await.unwrap(), 0);

    let freshness = catalog.freshness(&mirror.source_url).await.unwrap();
    assert_eq!(freshness.etag, "\"mirror\"");
}

#[tokio::test]
async fn test_duplicate_leaves_freshness_when_disabled() {
    let (catalog, _dir) = open_catalog(CatalogOptions {
        advance_freshness_on_duplicate: false,
        ..CatalogOptions::default()
    })
    .await;
    let original = record(11, "http://mirror-a.example.com/app.opk", &["App"]);
    let mut mirror = original.clone();
    mirror.source_url = "http://mirror-b.example.com/app.opk".to_string();

    catalog.upsert_batch(&[original]).await.unwrap();
    catalog.register_source(&mirror.source_url).await.unwrap();
    assert_eq!(catalog.upsert_batch(std::slice::from_ref(&mirror)).await.unwrap(), 0);

    let freshness = catalog.freshness(&mirror.source_url).await.unwrap();
    assert!(freshness.is_zero());
}

#[tokio::test]
async fn test_concurrent_writers_insert_each_hash_once() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    let catalog = Arc::new(catalog);

    let mut handles = Vec::new();
    for writer in 0..8u8 {
        let catalog = catalog.clone();
        handles.push(tokio::spawn(async move {
            // Every writer offers the same four hashes under its own URLs
            let batch: Vec<CatalogRecord> = (0..4u8)
                .map(|h| {
                    record(
                        100 + h,
                        &format!("http://w{}.example.com/{}.opk", writer, h),
                        &["Shared"],
                    )
                })
                .collect();
            catalog.upsert_batch(&batch).await.unwrap()
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 4);
    assert_eq!(catalog.record_count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_empty_batch_inserts_nothing() {
    let (catalog, _dir) = open_catalog(CatalogOptions::default()).await;
    assert_eq!(catalog.upsert_batch(&[]).await.unwrap(), 0);
}
