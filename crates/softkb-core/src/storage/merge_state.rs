//! Persistence of merge groups

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::merging::{MergeGroups, group_id};
use crate::domain::store::MergeStateStore;
use crate::error::{Error, Result};

const NEXT_GROUP: &str = "next_group";

const CLEAR_STATEMENTS: [&str; 3] = [
    "DELETE FROM merge_index",
    "DELETE FROM merge_groups",
    "DELETE FROM merge_state",
];

/// Merge state stored in the `merge_groups`, `merge_index` and `merge_state` tables
#[derive(Debug, Clone)]
pub struct SqliteMergeStateStore {
    pool: SqlitePool,
}

impl SqliteMergeStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MergeStateStore for SqliteMergeStateStore {
    async fn save(&self, groups: &MergeGroups) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for sql in CLEAR_STATEMENTS {
            sqlx::query(sql).execute(&mut *tx).await?;
        }

        for (group, members) in groups.raw_groups() {
            let body = serde_json::to_string(members)
                .map_err(|e| Error::Parse(format!("Failed to serialize merge group: {}", e)))?;
            sqlx::query("INSERT INTO merge_groups (group_no, members) VALUES (?, ?)")
                .bind(*group as i64)
                .bind(&body)
                .execute(&mut *tx)
                .await?;

            for member in members {
                sqlx::query("INSERT INTO merge_index (entity_id, group_no) VALUES (?, ?)")
                    .bind(member)
                    .bind(*group as i64)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("INSERT INTO merge_state (name, value) VALUES (?, ?)")
            .bind(NEXT_GROUP)
            .bind(groups.next_id() as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(groups = groups.len(), members = groups.member_count(), "Saved merge state");
        Ok(())
    }

    async fn load(&self) -> Result<MergeGroups> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT group_no, members FROM merge_groups ORDER BY group_no")
                .fetch_all(&self.pool)
                .await?;

        let mut groups = BTreeMap::new();
        for (group, body) in rows {
            let members: Vec<String> = serde_json::from_str(&body)
                .map_err(|e| Error::Parse(format!("Invalid merge group {}: {}", group, e)))?;
            groups.insert(group.max(0) as u64, members);
        }

        let next: Option<(i64,)> = sqlx::query_as("SELECT value FROM merge_state WHERE name = ?")
            .bind(NEXT_GROUP)
            .fetch_optional(&self.pool)
            .await?;

        let next_id = next.map(|(n,)| n.max(0) as u64).unwrap_or(0);
        let loaded = MergeGroups::from_parts(groups, next_id)?;

        // merge_index must agree with the group bodies
        let index: Vec<(String, i64)> =
            sqlx::query_as("SELECT entity_id, group_no FROM merge_index")
                .fetch_all(&self.pool)
                .await?;
        for (entity_id, group) in index {
            let persisted = group_id(group.max(0) as u64);
            if loaded.group_of(&entity_id).as_deref() != Some(persisted.as_str()) {
                return Err(Error::MergeInvariantViolation(format!(
                    "persisted index entry of {} disagrees with group membership",
                    entity_id
                )));
            }
        }

        Ok(loaded)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for sql in CLEAR_STATEMENTS {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteMergeStateStore::new(setup_test_db().await);

        let mut groups = MergeGroups::new();
        groups.register_merging("software/a", "software/b").unwrap();
        groups.register_merging("software/c", "software/d").unwrap();
        groups.register_merging("software/b", "software/d").unwrap();
        groups.register_merging("persons/x", "persons/y").unwrap();

        store.save(&groups).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, groups);
        loaded.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let store = SqliteMergeStateStore::new(setup_test_db().await);

        let mut first = MergeGroups::new();
        first.register_merging("a", "b").unwrap();
        store.save(&first).await.unwrap();

        let mut second = MergeGroups::new();
        second.register_merging("c", "d").unwrap();
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(!loaded.is_registered("a"));
        assert_eq!(loaded.head_of("d"), Some("c"));
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SqliteMergeStateStore::new(setup_test_db().await);
        let mut groups = MergeGroups::new();
        groups.register_merging("a", "b").unwrap();
        store.save(&groups).await.unwrap();

        store.reset().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
