//! Database migrations
//!
//! This module manages SQLite schema migrations for softkb.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 4;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Graph store
const MIGRATION_V1: &str = r#"
    -- Vertices of the staging and knowledge-base graphs
    CREATE TABLE IF NOT EXISTS vertices (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        graph TEXT NOT NULL CHECK (graph IN ('staging', 'kb')),
        id TEXT NOT NULL,
        collection TEXT NOT NULL,
        labels TEXT NOT NULL DEFAULT '',
        index_doi TEXT,
        index_title_author TEXT,
        index_orcid TEXT,
        index_entity TEXT,
        body TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (graph, id)
    );

    CREATE INDEX IF NOT EXISTS idx_vertices_collection ON vertices(graph, collection, seq);
    CREATE INDEX IF NOT EXISTS idx_vertices_labels ON vertices(graph, collection, labels);
    CREATE INDEX IF NOT EXISTS idx_vertices_doi ON vertices(graph, collection, index_doi);
    CREATE INDEX IF NOT EXISTS idx_vertices_title_author
        ON vertices(graph, collection, index_title_author);
    CREATE INDEX IF NOT EXISTS idx_vertices_orcid ON vertices(graph, collection, index_orcid);
    CREATE INDEX IF NOT EXISTS idx_vertices_entity ON vertices(graph, collection, index_entity);

    -- Label and aliases of every vertex, for label-or-alias lookups
    CREATE TABLE IF NOT EXISTS vertex_names (
        graph TEXT NOT NULL,
        vertex_id TEXT NOT NULL,
        name TEXT NOT NULL,
        is_label INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (graph, vertex_id, name),
        FOREIGN KEY (graph, vertex_id) REFERENCES vertices(graph, id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_vertex_names_name ON vertex_names(graph, name);

    -- Edges of the staging and knowledge-base graphs
    CREATE TABLE IF NOT EXISTS edges (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        graph TEXT NOT NULL CHECK (graph IN ('staging', 'kb')),
        id TEXT NOT NULL,
        collection TEXT NOT NULL,
        from_id TEXT NOT NULL,
        to_id TEXT NOT NULL,
        index_software TEXT,
        body TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (graph, id)
    );

    CREATE INDEX IF NOT EXISTS idx_edges_collection ON edges(graph, collection, seq);
    CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(graph, to_id, seq);
    CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(graph, from_id);
    CREATE INDEX IF NOT EXISTS idx_edges_software ON edges(graph, index_software);
"#;

/// Migration 2: Merge decisions
const MIGRATION_V2: &str = r#"
    -- Merge groups, members stored as a JSON array in group order
    CREATE TABLE IF NOT EXISTS merge_groups (
        group_no INTEGER PRIMARY KEY NOT NULL,
        members TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Entity id to owning group
    CREATE TABLE IF NOT EXISTS merge_index (
        entity_id TEXT PRIMARY KEY NOT NULL,
        group_no INTEGER NOT NULL REFERENCES merge_groups(group_no) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_merge_index_group ON merge_index(group_no);

    -- Counters of the merge state
    CREATE TABLE IF NOT EXISTS merge_state (
        name TEXT PRIMARY KEY NOT NULL,
        value INTEGER NOT NULL
    );
"#;

/// Migration 3: Raw source records
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS raw_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        collection TEXT NOT NULL,
        record_key TEXT NOT NULL,
        parent_key TEXT,
        body TEXT NOT NULL,
        imported_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (source, collection, record_key)
    );

    CREATE INDEX IF NOT EXISTS idx_raw_records_collection ON raw_records(source, collection, seq);
    CREATE INDEX IF NOT EXISTS idx_raw_records_parent
        ON raw_records(source, collection, parent_key);
"#;

/// Migration 4: Web lookup cache
const MIGRATION_V4: &str = r#"
    CREATE TABLE IF NOT EXISTS lookup_cache (
        cache_key TEXT PRIMARY KEY NOT NULL,
        url TEXT NOT NULL,
        success INTEGER NOT NULL,
        status INTEGER,
        data TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Versioned schema steps, applied in order
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (1, "Graph store", MIGRATION_V1),
    (2, "Merge decisions", MIGRATION_V2),
    (3, "Raw source records", MIGRATION_V3),
    (4, "Web lookup cache", MIGRATION_V4),
];

async fn current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version
///
/// Each step runs in its own transaction together with its `_migrations`
/// row, so an interrupted upgrade resumes at the failed step.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current = current_version(pool).await?;
    if current >= CURRENT_VERSION {
        tracing::debug!(version = current, "Database schema is up to date");
        return Ok(());
    }

    for &(version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "Applying database migration");
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    tracing::info!(from = current, to = CURRENT_VERSION, "Database migrations completed");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_are_contiguous() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|(v, _, _)| *v).collect();
        assert_eq!(versions, (1..=CURRENT_VERSION).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_resumes_after_partial_upgrade() {
        let pool = create_test_pool().await;
        sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(&pool).await.unwrap();
        sqlx::raw_sql(MIGRATION_V1).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO _migrations (version) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();

        let (applied,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, CURRENT_VERSION as i64);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables = vec![
            "vertices",
            "vertex_names",
            "edges",
            "merge_groups",
            "merge_index",
            "merge_state",
            "raw_records",
            "lookup_cache",
        ];

        for table in tables {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }
}
