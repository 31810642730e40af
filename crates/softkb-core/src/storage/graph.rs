//! SQLite-backed graph store
//!
//! Both graphs live in the same tables, partitioned by a `graph` column.
//! Insertion order is the autoincrement `seq` column, which every paged query
//! sorts on.

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use std::fmt;
use tracing::debug;

use crate::domain::claims::{Entity, EntityKind};
use crate::domain::relation::{Relation, RelationKind};
use crate::domain::store::{GraphStore, IndexField, Page};
use crate::error::{Error, Result};

/// Graph namespace inside the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphName {
    Staging,
    Kb,
}

impl GraphName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Kb => "kb",
        }
    }
}

impl fmt::Display for GraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQLite implementation of [`GraphStore`] for one graph
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
    graph: GraphName,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool, graph: GraphName) -> Self {
        Self { pool, graph }
    }

    pub fn staging(pool: SqlitePool) -> Self {
        Self::new(pool, GraphName::Staging)
    }

    pub fn kb(pool: SqlitePool) -> Self {
        Self::new(pool, GraphName::Kb)
    }

    pub fn graph(&self) -> GraphName {
        self.graph
    }

    async fn write_names(&self, tx: &mut Transaction<'_, Sqlite>, entity: &Entity) -> Result<()> {
        sqlx::query("DELETE FROM vertex_names WHERE graph = ? AND vertex_id = ?")
            .bind(self.graph.as_str())
            .bind(&entity.id)
            .execute(&mut **tx)
            .await?;

        let names = std::iter::once((entity.labels.as_str(), true))
            .chain(entity.aliases.iter().map(|alias| (alias.as_str(), false)))
            .filter(|(name, _)| !name.is_empty());

        for (name, is_label) in names {
            sqlx::query(
                r#"
                INSERT INTO vertex_names (graph, vertex_id, name, is_label)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(graph, vertex_id, name)
                DO UPDATE SET is_label = MAX(is_label, excluded.is_label)
                "#,
            )
            .bind(self.graph.as_str())
            .bind(&entity.id)
            .bind(name)
            .bind(is_label)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn fetch_vertices(
        &self,
        sql: &str,
        kind: EntityKind,
        value: &str,
    ) -> Result<Vec<Entity>> {
        let rows: Vec<BodyRow> = sqlx::query_as(sql)
            .bind(self.graph.as_str())
            .bind(kind.collection())
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(BodyRow::into_entity).collect()
    }
}

/// Row holding a JSON body
#[derive(Debug, FromRow)]
struct BodyRow {
    id: String,
    body: String,
}

impl BodyRow {
    fn into_entity(self) -> Result<Entity> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::Parse(format!("Invalid vertex body for {}: {}", self.id, e)))
    }

    fn into_relation(self) -> Result<Relation> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::Parse(format!("Invalid edge body for {}: {}", self.id, e)))
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Parse(format!("Failed to serialize record: {}", e)))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    // ========== Vertex Operations ==========

    async fn has_vertex(&self, id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM vertices WHERE graph = ? AND id = ?")
                .bind(self.graph.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn get_vertex(&self, id: &str) -> Result<Option<Entity>> {
        let row: Option<BodyRow> =
            sqlx::query_as("SELECT id, body FROM vertices WHERE graph = ? AND id = ?")
                .bind(self.graph.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(BodyRow::into_entity).transpose()
    }

    async fn insert_vertex(&self, entity: &Entity) -> Result<bool> {
        let body = to_body(entity)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO vertices (graph, id, collection, labels, index_doi, index_title_author,
                                  index_orcid, index_entity, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(graph, id) DO NOTHING
            "#,
        )
        .bind(self.graph.as_str())
        .bind(&entity.id)
        .bind(entity.kind.collection())
        .bind(&entity.labels)
        .bind(entity.index.index_doi.as_deref().map(str::to_lowercase))
        .bind(&entity.index.index_title_author)
        .bind(&entity.index.index_orcid)
        .bind(&entity.index.index_entity)
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(graph = %self.graph, entity_id = %entity.id, "Vertex already present");
            return Ok(false);
        }

        self.write_names(&mut tx, entity).await?;
        tx.commit().await?;

        debug!(graph = %self.graph, entity_id = %entity.id, "Inserted vertex");
        Ok(true)
    }

    async fn update_vertex(&self, entity: &Entity) -> Result<()> {
        let body = to_body(entity)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE vertices
            SET labels = ?, index_doi = ?, index_title_author = ?, index_orcid = ?,
                index_entity = ?, body = ?, updated_at = CURRENT_TIMESTAMP
            WHERE graph = ? AND id = ?
            "#,
        )
        .bind(&entity.labels)
        .bind(entity.index.index_doi.as_deref().map(str::to_lowercase))
        .bind(&entity.index.index_title_author)
        .bind(&entity.index.index_orcid)
        .bind(&entity.index.index_entity)
        .bind(&body)
        .bind(self.graph.as_str())
        .bind(&entity.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("vertex {} in {} graph", entity.id, self.graph)));
        }

        self.write_names(&mut tx, entity).await?;
        tx.commit().await?;

        debug!(graph = %self.graph, entity_id = %entity.id, "Updated vertex");
        Ok(())
    }

    async fn find_by_index(
        &self,
        kind: EntityKind,
        field: IndexField,
        value: &str,
    ) -> Result<Vec<Entity>> {
        let column = match field {
            IndexField::LabelOrAlias => {
                return self
                    .fetch_vertices(
                        r#"
                        SELECT v.id, v.body FROM vertices v
                        WHERE v.graph = ?1 AND v.collection = ?2
                          AND EXISTS (SELECT 1 FROM vertex_names n
                                      WHERE n.graph = v.graph AND n.vertex_id = v.id
                                        AND n.name = ?3)
                        ORDER BY v.seq
                        "#,
                        kind,
                        value,
                    )
                    .await;
            }
            IndexField::Doi => {
                return self
                    .fetch_vertices(
                        r#"
                        SELECT id, body FROM vertices
                        WHERE graph = ? AND collection = ? AND index_doi = ?
                        ORDER BY seq
                        "#,
                        kind,
                        &value.to_lowercase(),
                    )
                    .await;
            }
            IndexField::Label => "labels",
            IndexField::TitleAuthor => "index_title_author",
            IndexField::Orcid => "index_orcid",
            IndexField::Entity => "index_entity",
        };

        let sql = format!(
            "SELECT id, body FROM vertices WHERE graph = ? AND collection = ? AND {} = ? \
             ORDER BY seq",
            column
        );
        self.fetch_vertices(&sql, kind, value).await
    }

    async fn count_vertices(&self, kind: EntityKind) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM vertices WHERE graph = ? AND collection = ?")
                .bind(self.graph.as_str())
                .bind(kind.collection())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn page_vertices(
        &self,
        kind: EntityKind,
        offset: u64,
        limit: u32,
    ) -> Result<Page<Entity>> {
        let total = self.count_vertices(kind).await?;
        let rows: Vec<BodyRow> = sqlx::query_as(
            r#"
            SELECT id, body FROM vertices
            WHERE graph = ? AND collection = ?
            ORDER BY seq
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(self.graph.as_str())
        .bind(kind.collection())
        .bind(i64::from(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        let records = rows.into_iter().map(BodyRow::into_entity).collect::<Result<Vec<_>>>()?;
        Ok(Page { records, total })
    }

    // ========== Edge Operations ==========

    async fn has_edge(&self, id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM edges WHERE graph = ? AND id = ?")
            .bind(self.graph.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_edge(&self, id: &str) -> Result<Option<Relation>> {
        let row: Option<BodyRow> =
            sqlx::query_as("SELECT id, body FROM edges WHERE graph = ? AND id = ?")
                .bind(self.graph.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(BodyRow::into_relation).transpose()
    }

    async fn insert_edge(&self, relation: &Relation) -> Result<bool> {
        let body = to_body(relation)?;
        let result = sqlx::query(
            r#"
            INSERT INTO edges (graph, id, collection, from_id, to_id, index_software, body)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(graph, id) DO NOTHING
            "#,
        )
        .bind(self.graph.as_str())
        .bind(&relation.id)
        .bind(relation.kind.collection())
        .bind(&relation.from)
        .bind(&relation.to)
        .bind(&relation.index_software)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        debug!(graph = %self.graph, edge_id = %relation.id, inserted, "Insert edge");
        Ok(inserted)
    }

    async fn update_edge(&self, relation: &Relation) -> Result<()> {
        let body = to_body(relation)?;
        let result = sqlx::query(
            r#"
            UPDATE edges
            SET from_id = ?, to_id = ?, index_software = ?, body = ?, updated_at = CURRENT_TIMESTAMP
            WHERE graph = ? AND id = ?
            "#,
        )
        .bind(&relation.from)
        .bind(&relation.to)
        .bind(&relation.index_software)
        .bind(&body)
        .bind(self.graph.as_str())
        .bind(&relation.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("edge {} in {} graph", relation.id, self.graph)));
        }
        Ok(())
    }

    async fn count_edges(&self, kind: RelationKind) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM edges WHERE graph = ? AND collection = ?")
                .bind(self.graph.as_str())
                .bind(kind.collection())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn page_edges(
        &self,
        kind: RelationKind,
        offset: u64,
        limit: u32,
    ) -> Result<Page<Relation>> {
        let total = self.count_edges(kind).await?;
        let rows: Vec<BodyRow> = sqlx::query_as(
            r#"
            SELECT id, body FROM edges
            WHERE graph = ? AND collection = ?
            ORDER BY seq
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(self.graph.as_str())
        .bind(kind.collection())
        .bind(i64::from(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        let records = rows.into_iter().map(BodyRow::into_relation).collect::<Result<Vec<_>>>()?;
        Ok(Page { records, total })
    }

    async fn edges_to(&self, id: &str, offset: u64, limit: u32) -> Result<Page<Relation>> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM edges WHERE graph = ? AND to_id = ?")
                .bind(self.graph.as_str())
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<BodyRow> = sqlx::query_as(
            r#"
            SELECT id, body FROM edges
            WHERE graph = ? AND to_id = ?
            ORDER BY seq
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(self.graph.as_str())
        .bind(id)
        .bind(i64::from(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        let records = rows.into_iter().map(BodyRow::into_relation).collect::<Result<Vec<_>>>()?;
        Ok(Page {
            records,
            total: total.max(0) as u64,
        })
    }

    // ========== Maintenance ==========

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM edges WHERE graph = ?",
            "DELETE FROM vertex_names WHERE graph = ?",
            "DELETE FROM vertices WHERE graph = ?",
        ] {
            sqlx::query(sql).bind(self.graph.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(graph = %self.graph, "Cleared graph");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claims::{PropertyCode, SourceRef, Value};
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

    fn software(key: &str, label: &str) -> Entity {
        Entity::new(EntityKind::Software, key).with_label(label)
    }

    #[tokio::test]
    async fn test_insert_and_get_vertex() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        let mut entity = software("s1", "SPSS").with_alias("IBM SPSS");
        entity.push_value(PropertyCode::Version, Value::string("20.0"), &SourceRef::named("A"));

        assert!(store.insert_vertex(&entity).await.unwrap());
        assert!(!store.insert_vertex(&entity).await.unwrap());
        assert!(store.has_vertex("software/s1").await.unwrap());

        let loaded = store.get_vertex("software/s1").await.unwrap().unwrap();
        assert_eq!(loaded, entity);
        assert!(store.get_vertex("software/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_graphs_are_isolated() {
        let pool = setup_test_db().await;
        let staging = SqliteGraphStore::staging(pool.clone());
        let kb = SqliteGraphStore::kb(pool);

        staging.insert_vertex(&software("s1", "SPSS")).await.unwrap();
        assert!(!kb.has_vertex("software/s1").await.unwrap());

        kb.insert_vertex(&software("s1", "SPSS")).await.unwrap();
        staging.clear().await.unwrap();
        assert!(!staging.has_vertex("software/s1").await.unwrap());
        assert!(kb.has_vertex("software/s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_label_and_alias_indexes() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        store.insert_vertex(&software("s1", "SPSS")).await.unwrap();
        store
            .insert_vertex(&software("s2", "PASW").with_alias("SPSS"))
            .await
            .unwrap();
        store.insert_vertex(&software("s3", "Stata")).await.unwrap();

        let by_label = store
            .find_by_index(EntityKind::Software, IndexField::Label, "SPSS")
            .await
            .unwrap();
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].id, "software/s1");

        let by_name = store
            .find_by_index(EntityKind::Software, IndexField::LabelOrAlias, "SPSS")
            .await
            .unwrap();
        let ids: Vec<_> = by_name.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["software/s1", "software/s2"]);

        let persons = store
            .find_by_index(EntityKind::Person, IndexField::Label, "SPSS")
            .await
            .unwrap();
        assert!(persons.is_empty());
    }

    #[tokio::test]
    async fn test_doi_index_is_case_insensitive() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        let mut document = Entity::new(EntityKind::Document, "d1");
        document.index.index_doi = Some("10.1/X".to_string());
        store.insert_vertex(&document).await.unwrap();

        let found = store
            .find_by_index(EntityKind::Document, IndexField::Doi, "10.1/x")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let found = store
            .find_by_index(EntityKind::Document, IndexField::Doi, "10.1/X")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_update_vertex_refreshes_names() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        let entity = software("s1", "SPSS");
        store.insert_vertex(&entity).await.unwrap();

        let updated = entity.clone().with_alias("PASW");
        store.update_vertex(&updated).await.unwrap();

        let found = store
            .find_by_index(EntityKind::Software, IndexField::LabelOrAlias, "PASW")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let missing = software("s9", "x");
        assert!(matches!(store.update_vertex(&missing).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paging_follows_insertion_order() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        for key in ["c", "a", "b", "e", "d"] {
            store.insert_vertex(&software(key, key)).await.unwrap();
        }

        let first = store.page_vertices(EntityKind::Software, 0, 2).await.unwrap();
        let second = store.page_vertices(EntityKind::Software, 2, 2).await.unwrap();
        let third = store.page_vertices(EntityKind::Software, 4, 2).await.unwrap();

        assert_eq!(first.total, 5);
        assert_eq!(first.page_count(2), 3);
        let keys: Vec<_> = first
            .records
            .iter()
            .chain(&second.records)
            .chain(&third.records)
            .map(|e| e.key().to_string())
            .collect();
        assert_eq!(keys, vec!["c", "a", "b", "e", "d"]);
    }

    #[tokio::test]
    async fn test_edges() {
        let store = SqliteGraphStore::staging(setup_test_db().await);
        let mut edge =
            Relation::new(RelationKind::Citation, "d1_s1_0", "documents/d1", "software/s1");
        let mentions = SourceRef::named("mentions");
        edge.push_value(PropertyCode::QuotesWork, Value::string("SPSS"), &mentions);

        assert!(store.insert_edge(&edge).await.unwrap());
        assert!(!store.insert_edge(&edge).await.unwrap());
        assert!(store.has_edge("citations/d1_s1_0").await.unwrap());
        assert_eq!(store.get_edge("citations/d1_s1_0").await.unwrap().unwrap(), edge);

        let other = Relation::new(RelationKind::Actor, "p1_s1_aut", "persons/p1", "software/s1");
        store.insert_edge(&other).await.unwrap();

        assert_eq!(store.count_edges(RelationKind::Citation).await.unwrap(), 1);
        let incoming = store.edges_to("software/s1", 0, 10).await.unwrap();
        assert_eq!(incoming.total, 2);
        assert_eq!(incoming.records[0].id, "citations/d1_s1_0");

        let mut moved = edge.clone();
        moved.to = "software/s2".to_string();
        store.update_edge(&moved).await.unwrap();
        assert_eq!(store.edges_to("software/s1", 0, 10).await.unwrap().total, 1);
    }
}
