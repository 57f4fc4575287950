//! Package fixtures, a fake extractor and HTTP mocks

use async_trait::async_trait;
use opkcat::fetcher::{HttpGetter, PackageExtractor};
use opkcat::{Catalog, CatalogOptions, Config, FetchPool, RecordBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Manifest suffix used by every fixture
pub const MANIFEST_SUFFIX: &str = ".gcw0.desktop";

/// Stand-in for unsquashfs
///
/// Archives are plain text holding the application name; unpacking writes a
/// manifest and icon for that name.
pub struct FakeExtractor {
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageExtractor for FakeExtractor {
    async fn unpack(&self, archive: &Path, dest: &Path) -> opkcat::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let name = tokio::fs::read_to_string(archive).await?;
        let name = name.trim();
        let icon = name.to_lowercase();

        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(
            dest.join(format!("{}{}", icon, MANIFEST_SUFFIX)),
            format!(
                "[Desktop Entry]\nName={}\nComment={} for the GCW Zero\nType=Application\nCategories=games;arcade;\nIcon={}\n",
                name, name, icon
            ),
        )
        .await?;
        tokio::fs::write(dest.join(format!("{}.png", icon)), b"\x89PNG").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Serve `body` at `route` with entity tag `etag`, answering 304 when the client already has it
pub async fn mount_package(server: &MockServer, route: &str, etag: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("if-none-match", etag))
        .respond_with(ResponseTemplate::new(304).insert_header("etag", etag))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", etag)
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Number of requests that carried `If-None-Match`
pub async fn conditional_request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.headers.contains_key("if-none-match"))
        .count()
}

/// Catalog, temp directory and the pieces of a fetch pipeline wired together
pub struct Pipeline {
    pub dir: TempDir,
    pub catalog: Arc<Catalog>,
    pub extractor: Arc<FakeExtractor>,
    pub pool: Arc<FetchPool>,
}

impl Pipeline {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir).await
    }

    /// Open (or reopen) the catalog kept in `dir`
    pub async fn in_dir(dir: TempDir) -> Self {
        let catalog = Arc::new(
            Catalog::open(
                &dir.path().join("catalog.db"),
                &dir.path().join("index.db"),
                CatalogOptions::default(),
            )
            .await
            .unwrap(),
        );
        let extractor = FakeExtractor::new();
        let builder = RecordBuilder::new(
            Arc::new(HttpGetter::new(&Config::default().fetch).unwrap()),
            extractor.clone(),
            dir.path().join("tmp"),
            MANIFEST_SUFFIX,
        );
        let pool = Arc::new(FetchPool::new(catalog.clone(), Arc::new(builder), 4));
        Self {
            dir,
            catalog,
            extractor,
            pool,
        }
    }

    /// Close the catalog and hand back the directory for reopening
    pub async fn close(self) -> TempDir {
        self.catalog.close().await;
        self.dir
    }

    pub fn temp_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Write a markdown document linking to `links` and return its path
pub fn write_document(dir: &Path, links: &[String]) -> PathBuf {
    let mut markdown = String::from("# Packages\n\n");
    for (i, link) in links.iter().enumerate() {
        markdown.push_str(&format!("- [Package {}]({})\n", i, link));
    }
    let path = dir.join("sources.md");
    std::fs::write(&path, markdown).unwrap();
    path
}
