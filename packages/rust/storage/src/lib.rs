//! Geocode cache storage.
//!
//! [`GeocodeCache`] is the key/value contract the pipeline's cache stages
//! rely on: an ordered multi-key read and a multi-key write, each one round
//! trip. Two backends implement it:
//! - [`Storage`]: a libSQL database, entries persist across runs
//! - [`MemoryCache`]: an in-process map for tests and throwaway runs
//!
//! Entries are never expired here.

mod memory;
mod migrations;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use geoenrich_shared::{DEFAULT_CACHE_COLLECTION, GeoenrichError, Result};
use libsql::{Connection, Database, params};

pub use memory::MemoryCache;

// ---------------------------------------------------------------------------
// GeocodeCache
// ---------------------------------------------------------------------------

/// Multi-key cache contract keyed by literal address string.
pub trait GeocodeCache: Send + Sync {
    /// Look up every key in one round trip. The result has one slot per key,
    /// in request order; `None` is a miss.
    fn get_many(&self, keys: &[String])
    -> impl Future<Output = Result<Vec<Option<String>>>> + Send;

    /// Store every `(key, value)` pair in one round trip.
    fn set_many(&self, entries: &[(String, String)]) -> impl Future<Output = Result<()>> + Send;
}

impl<C: GeocodeCache> GeocodeCache for Arc<C> {
    fn get_many(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<String>>>> + Send {
        (**self).get_many(keys)
    }

    fn set_many(&self, entries: &[(String, String)]) -> impl Future<Output = Result<()>> + Send {
        (**self).set_many(entries)
    }
}

fn storage_err(e: impl std::fmt::Display) -> GeoenrichError {
    GeoenrichError::Cache(e.to_string())
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Persistent cache handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    collection: String,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GeoenrichError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            collection: DEFAULT_CACHE_COLLECTION.to_string(),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            collection: DEFAULT_CACHE_COLLECTION.to_string(),
            readonly: true,
        })
    }

    /// Use a different collection (namespace) for all entries.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// The collection entries are read from and written to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        GeoenrichError::Cache(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(GeoenrichError::Cache(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Number of entries in this handle's collection.
    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM geocode_cache WHERE collection = ?1",
                params![self.collection.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(storage_err),
            None => Ok(0),
        }
    }
}

impl GeocodeCache for Storage {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // All keys travel as one JSON array parameter so the lookup is a
        // single statement regardless of batch size.
        let keys_json = serde_json::to_string(keys).map_err(storage_err)?;
        let mut rows = self
            .conn
            .query(
                "SELECT key, value FROM geocode_cache
                 WHERE collection = ?1 AND key IN (SELECT value FROM json_each(?2))",
                params![self.collection.as_str(), keys_json.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut found: HashMap<String, String> = HashMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let key: String = row.get(0).map_err(storage_err)?;
            let value: String = row.get(1).map_err(storage_err)?;
            found.insert(key, value);
        }

        tracing::trace!(
            requested = keys.len(),
            found = found.len(),
            collection = %self.collection,
            "cache multi-get"
        );

        Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.check_writable()?;
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO geocode_cache (collection, key, value, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET
                   value = excluded.value,
                   created_at = excluded.created_at",
                params![
                    self.collection.as_str(),
                    key.as_str(),
                    value.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::trace!(written = entries.len(), collection = %self.collection, "cache multi-set");
        Ok(())
    }
}
