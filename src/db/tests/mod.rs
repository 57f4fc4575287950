use crate::db::{Catalog, CatalogOptions};
use crate::types::{CatalogRecord, ContentHash, Entry};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

mod records;

/// Open a catalog in a fresh temporary directory; keep the directory alive for the test
async fn open_catalog(options: CatalogOptions) -> (Catalog, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::open(
        &dir.path().join("catalog.db"),
        &dir.path().join("index.db"),
        options,
    )
    .await
    .unwrap();
    (catalog, dir)
}

fn entry(name: &str) -> Entry {
    Entry {
        name: name.to_string(),
        kind: "Application".to_string(),
        description: format!("{} for the GCW Zero", name),
        categories: vec!["Game".to_string(), "Arcade".to_string()],
        icon: vec![0x89, b'P', b'N', b'G'],
    }
}

fn record(hash_byte: u8, url: &str, names: &[&str]) -> CatalogRecord {
    CatalogRecord {
        hash: ContentHash::new(vec![hash_byte; 32]),
        source_url: url.to_string(),
        fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        etag: format!("\"etag-{}\"", hash_byte),
        entries: names.iter().map(|name| entry(name)).collect(),
    }
}
