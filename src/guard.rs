use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};

use crate::error::ClosureTableError;
use crate::store::ClosureStore;
use crate::traits::TreeNode;

/// Rejects parent assignments that would close a cycle.
///
/// Read-only. Run it on the same transaction as the mutation it protects, so a
/// concurrent re-parent of the subtree cannot slip in between.
pub struct CycleGuard<M>
where
    M: TreeNode,
{
    store: ClosureStore<M>,
}

impl<M: TreeNode> Clone for CycleGuard<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: TreeNode> Copy for CycleGuard<M> {}

impl<M: TreeNode> Default for CycleGuard<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> CycleGuard<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            store: ClosureStore::new(),
        }
    }

    /// Fails with `Cycle` when `proposed` is `node` itself or one of its
    /// descendants. A `None` parent (a root) is always valid.
    pub async fn validate_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
        proposed: Option<&M::Id>,
    ) -> Result<(), ClosureTableError> {
        let Some(parent) = proposed else {
            return Ok(());
        };

        if parent == node || self.store.exists(conn, node, parent, true).await? {
            tracing::warn!(node = ?node, parent = ?parent, "rejected cyclic parent assignment");
            return Err(ClosureTableError::cycle(node, parent));
        }

        Ok(())
    }

    /// Fails with `NodeNotFound` unless a node with `id` exists.
    pub async fn ensure_exists<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<(), ClosureTableError> {
        let count = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .count(conn)
            .await?;
        if count == 0 {
            return Err(ClosureTableError::not_found(id));
        }
        Ok(())
    }
}
