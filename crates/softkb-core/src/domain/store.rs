//! Storage collaborator traits
//!
//! The pipeline reads and writes graphs only through these traits. Every
//! bulk component is built on the paged query primitive: a page of records in
//! stable insertion order plus the total count, obtained without materializing
//! the other pages.

use async_trait::async_trait;

use crate::error::Result;

use super::claims::{Entity, EntityKind};
use super::merging::MergeGroups;
use super::relation::{Relation, RelationKind};

/// One page of a paged query
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Number of records matching the query across all pages
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            total: 0,
        }
    }

    /// Number of pages of `page_size` needed for `total` records
    pub fn page_count(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(page_size))
    }
}

/// Secondary-indexed fields of vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    /// Primary label, exact
    Label,
    /// Primary label or any alias, exact
    LabelOrAlias,
    /// Lower-cased DOI
    Doi,
    TitleAuthor,
    Orcid,
    /// Disambiguated external entity id
    Entity,
}

/// Vertex and edge store for one graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========== Vertex Operations ==========

    async fn has_vertex(&self, id: &str) -> Result<bool>;

    async fn get_vertex(&self, id: &str) -> Result<Option<Entity>>;

    /// Insert a vertex unless one with the same id exists
    ///
    /// Returns `true` when the vertex was written.
    async fn insert_vertex(&self, entity: &Entity) -> Result<bool>;

    /// Replace a vertex by id
    async fn update_vertex(&self, entity: &Entity) -> Result<()>;

    /// Vertices of a kind whose indexed field equals `value`, in insertion order
    async fn find_by_index(
        &self,
        kind: EntityKind,
        field: IndexField,
        value: &str,
    ) -> Result<Vec<Entity>>;

    async fn count_vertices(&self, kind: EntityKind) -> Result<u64>;

    async fn page_vertices(&self, kind: EntityKind, offset: u64, limit: u32)
    -> Result<Page<Entity>>;

    // ========== Edge Operations ==========

    async fn has_edge(&self, id: &str) -> Result<bool>;

    async fn get_edge(&self, id: &str) -> Result<Option<Relation>>;

    /// Insert an edge unless one with the same id exists
    async fn insert_edge(&self, relation: &Relation) -> Result<bool>;

    async fn update_edge(&self, relation: &Relation) -> Result<()>;

    async fn count_edges(&self, kind: RelationKind) -> Result<u64>;

    async fn page_edges(&self, kind: RelationKind, offset: u64, limit: u32)
    -> Result<Page<Relation>>;

    /// Edges of any kind pointing at `id`
    async fn edges_to(&self, id: &str, offset: u64, limit: u32) -> Result<Page<Relation>>;

    // ========== Maintenance ==========

    /// Remove every vertex and edge of the graph
    async fn clear(&self) -> Result<()>;
}

/// Persistence of merge groups between the merge and build phases
#[async_trait]
pub trait MergeStateStore: Send + Sync {
    /// Replace the persisted state with `groups`
    async fn save(&self, groups: &MergeGroups) -> Result<()>;

    async fn load(&self) -> Result<MergeGroups>;

    async fn reset(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count() {
        let page: Page<()> = Page {
            records: Vec::new(),
            total: 2001,
        };
        assert_eq!(page.page_count(1000), 3);
        assert_eq!(page.page_count(0), 0);
        assert_eq!(Page::<()>::empty().page_count(1000), 0);
    }
}
