//! Catalog lifecycle and schema migrations.

use crate::config::Config;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{Catalog, CatalogOptions, SearchIndex};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Primary store schema, one entry per version
const STORE_MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE kv (
        key BLOB PRIMARY KEY NOT NULL,
        value BLOB NOT NULL
    ) WITHOUT ROWID
    "#];

/// Search index schema, one entry per version
const INDEX_MIGRATIONS: &[&str] = &[r#"
    CREATE VIRTUAL TABLE catalog_fts USING fts5(
        doc_id UNINDEXED,
        name,
        kind,
        description,
        categories,
        source_url UNINDEXED,
        tokenize = 'unicode61'
    )
    "#];

impl Catalog {
    /// Open (or create) the primary store and the search index
    ///
    /// Any failure here is fatal for the process and is reported as
    /// [`Error::Setup`].
    pub async fn open(db_path: &Path, index_path: &Path, options: CatalogOptions) -> Result<Self> {
        let store = connect(db_path)
            .await
            .map_err(|e| Error::Setup(format!("primary store {}: {}", db_path.display(), e)))?;
        migrate(&store, "primary store", STORE_MIGRATIONS)
            .await
            .map_err(|e| Error::Setup(format!("primary store {}: {}", db_path.display(), e)))?;

        let index_pool = match connect(index_path).await {
            Ok(pool) => pool,
            Err(e) => {
                store.close().await;
                return Err(Error::Setup(format!(
                    "search index {}: {}",
                    index_path.display(),
                    e
                )));
            }
        };
        if let Err(e) = migrate(&index_pool, "search index", INDEX_MIGRATIONS).await {
            store.close().await;
            index_pool.close().await;
            return Err(Error::Setup(format!(
                "search index {}: {}",
                index_path.display(),
                e
            )));
        }

        tracing::info!(
            db = %db_path.display(),
            index = %index_path.display(),
            "Catalog opened"
        );

        Ok(Self {
            store,
            index: SearchIndex::new(index_pool),
            write_lock: tokio::sync::Mutex::new(()),
            options,
        })
    }

    /// Open the catalog at the locations named by `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            &config.storage.database_path,
            &config.storage.index_path,
            CatalogOptions::from(config),
        )
        .await
    }

    /// Close both connection pools
    pub async fn close(&self) {
        self.store.close().await;
        self.index.close().await;
    }
}

/// Connect with WAL journaling so readers see a consistent snapshot while a writer commits
async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to create database directory: {}",
                e
            )))
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to parse database path: {}",
                e
            )))
        })?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePool::connect_with(options).await.map_err(|e| {
        Error::Database(DatabaseError::ConnectionFailed(format!(
            "Failed to connect to database: {}",
            e
        )))
    })
}

/// Apply every migration newer than the recorded schema version
async fn migrate(pool: &SqlitePool, label: &str, migrations: &[&str]) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(|e| {
        Error::Database(DatabaseError::ConnectionFailed(format!(
            "Failed to acquire connection: {}",
            e
        )))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "Failed to create schema_version table: {}",
            e
        )))
    })?;

    let current_version: Option<i64> =
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {}",
                    e
                )))
            })?
            .flatten();
    let current_version = current_version.unwrap_or(0);

    for (i, statement) in migrations.iter().enumerate() {
        let version = i as i64 + 1;
        if version > current_version {
            apply_migration(&mut conn, label, version, statement).await?;
        }
    }

    Ok(())
}

/// Run one migration statement and record it, all inside a transaction
async fn apply_migration(
    conn: &mut SqliteConnection,
    label: &str,
    version: i64,
    statement: &str,
) -> Result<()> {
    tracing::info!(version, "Applying {} migration", label);

    sqlx::query("BEGIN")
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

    let result = async {
        sqlx::query(statement).execute(&mut *conn).await?;
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await?;
        Ok::<(), sqlx::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to commit {} migration v{}: {}",
                        label, version, e
                    )))
                })?;
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(Error::Database(DatabaseError::MigrationFailed(format!(
                "{} migration v{} failed: {}",
                label, version, e
            ))));
        }
    }

    tracing::info!(version, "{} migration complete", label);
    Ok(())
}
