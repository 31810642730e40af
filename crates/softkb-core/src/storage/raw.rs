//! Raw-record store
//!
//! Holds source records as they were harvested, before projection. Records
//! are keyed by `(source, collection, record_key)`; reloading a dump keeps
//! the first copy of each record.

use serde_json::Value as Json;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info, warn};

use super::jsonl::{DumpSpec, JsonlReader};
use crate::domain::store::Page;
use crate::error::{Error, Result};

/// Records inserted per transaction while importing
const IMPORT_BATCH: usize = 500;

/// Result of an import operation
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Records written
    pub records: u64,
    /// Records already present
    pub duplicates: u64,
    /// Lines skipped as malformed
    pub skipped: u64,
    /// Any warnings during import
    pub warnings: Vec<String>,
}

impl ImportResult {
    pub fn absorb(&mut self, other: ImportResult) {
        self.records += other.records;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.warnings.extend(other.warnings);
    }
}

/// A stored raw record
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub key: String,
    pub parent: Option<String>,
    pub body: Json,
}

#[derive(Debug, sqlx::FromRow)]
struct RawRow {
    record_key: String,
    parent_key: Option<String>,
    body: String,
}

impl RawRow {
    fn into_record(self) -> Result<RawRecord> {
        let body = serde_json::from_str(&self.body)
            .map_err(|e| Error::Parse(format!("Invalid raw record {}: {}", self.record_key, e)))?;
        Ok(RawRecord {
            key: self.record_key,
            parent: self.parent_key,
            body,
        })
    }
}

/// SQLite store of raw source records
#[derive(Debug, Clone)]
pub struct RawRecordStore {
    pool: SqlitePool,
}

impl RawRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Import a JSON Lines dump described by `spec`
    ///
    /// Malformed lines and records without a key are skipped with a warning.
    pub async fn import_jsonl(&self, spec: &DumpSpec, path: &Path) -> Result<ImportResult> {
        let mut result = ImportResult::default();
        let mut batch: Vec<(String, Option<String>, String)> = Vec::with_capacity(IMPORT_BATCH);

        for line in JsonlReader::open(path)? {
            let location = format!("{}:{}", path.display(), line.line);
            let record = match line.record {
                Ok(record) => record,
                Err(e) => {
                    let error = Error::malformed(spec.source, location, e.to_string());
                    warn!(
                        source = spec.source,
                        collection = spec.collection,
                        error = %error,
                        "Skipping malformed record"
                    );
                    result.skipped += 1;
                    result.warnings.push(error.to_string());
                    continue;
                }
            };

            let Some(key) = spec.record_key(&record) else {
                let error = Error::malformed(spec.source, location, "record has no key");
                warn!(
                        source = spec.source,
                        collection = spec.collection,
                        error = %error,
                        "Skipping malformed record"
                    );
                result.skipped += 1;
                result.warnings.push(error.to_string());
                continue;
            };

            let body = serde_json::to_string(&record)
                .map_err(|e| Error::Parse(format!("Failed to serialize record: {}", e)))?;
            batch.push((key, spec.parent_key(&record), body));

            if batch.len() >= IMPORT_BATCH {
                self.write_batch(spec, &mut batch, &mut result).await?;
            }
        }
        self.write_batch(spec, &mut batch, &mut result).await?;

        info!(
            source = spec.source,
            collection = spec.collection,
            records = result.records,
            duplicates = result.duplicates,
            skipped = result.skipped,
            "Imported dump"
        );
        Ok(result)
    }

    async fn write_batch(
        &self,
        spec: &DumpSpec,
        batch: &mut Vec<(String, Option<String>, String)>,
        result: &mut ImportResult,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (key, parent, body) in batch.drain(..) {
            let written = sqlx::query(
                r#"
                INSERT INTO raw_records (source, collection, record_key, parent_key, body)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(source, collection, record_key) DO NOTHING
                "#,
            )
            .bind(spec.source)
            .bind(spec.collection)
            .bind(&key)
            .bind(&parent)
            .bind(&body)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if written > 0 {
                result.records += 1;
            } else {
                result.duplicates += 1;
            }
        }
        tx.commit().await?;
        debug!(
            source = spec.source,
            collection = spec.collection,
            total = result.records,
            "Committed import batch"
        );
        Ok(())
    }

    pub async fn count(&self, source: &str, collection: &str) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM raw_records WHERE source = ? AND collection = ?")
                .bind(source)
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    /// Page of records in load order
    pub async fn page(
        &self,
        source: &str,
        collection: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Page<RawRecord>> {
        let total = self.count(source, collection).await?;
        let rows: Vec<RawRow> = sqlx::query_as(
            r#"
            SELECT record_key, parent_key, body FROM raw_records
            WHERE source = ? AND collection = ?
            ORDER BY seq
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(source)
        .bind(collection)
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let records = rows.into_iter().map(RawRow::into_record).collect::<Result<Vec<_>>>()?;
        Ok(Page { records, total })
    }

    pub async fn get(
        &self,
        source: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<RawRecord>> {
        let row: Option<RawRow> = sqlx::query_as(
            r#"
            SELECT record_key, parent_key, body FROM raw_records
            WHERE source = ? AND collection = ? AND record_key = ?
            "#,
        )
        .bind(source)
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RawRow::into_record).transpose()
    }

    /// Records of a collection whose parent key is `parent`, in load order
    pub async fn children(
        &self,
        source: &str,
        collection: &str,
        parent: &str,
    ) -> Result<Vec<RawRecord>> {
        let rows: Vec<RawRow> = sqlx::query_as(
            r#"
            SELECT record_key, parent_key, body FROM raw_records
            WHERE source = ? AND collection = ? AND parent_key = ?
            ORDER BY seq
            "#,
        )
        .bind(source)
        .bind(collection)
        .bind(parent)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    /// Remove the records of one source, or of every source
    pub async fn clear(&self, source: Option<&str>) -> Result<u64> {
        let removed = match source {
            Some(source) => {
                sqlx::query("DELETE FROM raw_records WHERE source = ?")
                    .bind(source)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM raw_records").execute(&self.pool).await?,
        };
        Ok(removed.rows_affected())
    }

    /// Record counts per `(source, collection)`
    pub async fn stats(&self) -> Result<Vec<(String, String, u64)>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT source, collection, COUNT(*) FROM raw_records
            GROUP BY source, collection
            ORDER BY source, collection
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(source, collection, count)| (source, collection, count.max(0) as u64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::jsonl::dumps_for;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    fn annotations_spec() -> &'static DumpSpec {
        dumps_for("mentions")
            .find(|spec| spec.collection == "annotations")
            .unwrap()
    }

    #[tokio::test]
    async fn test_import_skips_malformed_lines() {
        let store = RawRecordStore::new(setup_test_db().await);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"_id\": {\"$oid\": \"a1\"}, \"document\": {\"$oid\": \"d1\"}}\n",
                "{broken\n",
                "\n",
                "{\"no_key\": true}\n",
                "{\"_id\": {\"$oid\": \"a2\"}, \"document\": {\"$oid\": \"d1\"}}\n",
                "{\"_id\": {\"$oid\": \"a3\"}, \"document\": {\"$oid\": \"d2\"}}\n",
            ),
        )
        .unwrap();

        let result = store.import_jsonl(annotations_spec(), &path).await.unwrap();
        assert_eq!(result.records, 3);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains(":2"));

        assert_eq!(store.count("mentions", "annotations").await.unwrap(), 3);
        let children = store.children("mentions", "annotations", "d1").await.unwrap();
        let keys: Vec<&str> = children.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_reimport_keeps_first_copy() {
        let store = RawRecordStore::new(setup_test_db().await);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        std::fs::write(&path, "{\"_id\": {\"$oid\": \"a1\"}, \"v\": 1}\n").unwrap();
        store.import_jsonl(annotations_spec(), &path).await.unwrap();

        std::fs::write(&path, "{\"_id\": {\"$oid\": \"a1\"}, \"v\": 2}\n").unwrap();
        let result = store.import_jsonl(annotations_spec(), &path).await.unwrap();
        assert_eq!(result.records, 0);
        assert_eq!(result.duplicates, 1);

        let record = store.get("mentions", "annotations", "a1").await.unwrap().unwrap();
        assert_eq!(record.body["v"], 1);
    }

    #[tokio::test]
    async fn test_paging_in_load_order() {
        let store = RawRecordStore::new(setup_test_db().await);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        let content: String = (0..5)
            .map(|i| format!("{{\"_id\": {{\"$oid\": \"k{}\"}}}}\n", 4 - i))
            .collect();
        std::fs::write(&path, content).unwrap();
        store.import_jsonl(annotations_spec(), &path).await.unwrap();

        let first = store.page("mentions", "annotations", 0, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.page_count(2), 3);
        assert_eq!(first.records[0].key, "k4");

        let last = store.page("mentions", "annotations", 4, 2).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.records[0].key, "k0");

        assert_eq!(store.clear(Some("mentions")).await.unwrap(), 5);
        assert!(store.stats().await.unwrap().is_empty());
    }
}
