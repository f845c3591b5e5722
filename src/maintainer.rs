//! Incremental closure maintenance for single lifecycle events.
//!
//! The owning collaborator calls these entry points at fixed points of its own
//! mutation pipeline, all on one transaction per event:
//!
//! | event     | before the node row changes | after the node row changes |
//! |-----------|-----------------------------|----------------------------|
//! | create    |                             | [`on_node_created`]        |
//! | re-parent | [`before_save`]             | [`on_parent_changed`]      |
//! | delete    | [`on_node_deleting`]        | [`on_node_deleted`]        |
//!
//! `on_node_deleted` only touches the closure table, so it may also run before
//! the node row is removed (required when the closure table references the
//! node table without `ON DELETE CASCADE`).
//!
//! [`on_node_created`]: IncrementalMaintainer::on_node_created
//! [`before_save`]: IncrementalMaintainer::before_save
//! [`on_parent_changed`]: IncrementalMaintainer::on_parent_changed
//! [`on_node_deleting`]: IncrementalMaintainer::on_node_deleting
//! [`on_node_deleted`]: IncrementalMaintainer::on_node_deleted

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};

use crate::error::ClosureTableError;
use crate::guard::CycleGuard;
use crate::store::ClosureStore;
use crate::traits::TreeNode;

/// Row counts touched by a re-parent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Reattachment {
    pub detached: u64,
    pub attached: u64,
}

pub struct IncrementalMaintainer<M>
where
    M: TreeNode,
{
    store: ClosureStore<M>,
    guard: CycleGuard<M>,
}

impl<M: TreeNode> Clone for IncrementalMaintainer<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: TreeNode> Copy for IncrementalMaintainer<M> {}

impl<M: TreeNode> Default for IncrementalMaintainer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> IncrementalMaintainer<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            store: ClosureStore::new(),
            guard: CycleGuard::new(),
        }
    }

    /// Validate `parent` for `node` before the parent column is written.
    ///
    /// A node that is not saved yet (`node == None`) has no descendants, so
    /// only an existing node can be given an invalid parent.
    pub async fn before_save<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M::Id>,
        parent: Option<&M::Id>,
    ) -> Result<(), ClosureTableError> {
        match node {
            Some(node) => self.guard.validate_parent(conn, node, parent).await,
            None => Ok(()),
        }
    }

    /// Create the self row of a freshly inserted node and attach it under its
    /// parent. Returns the number of rows written.
    pub async fn on_node_created<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<u64, ClosureTableError> {
        let id = node.id();
        self.store.insert_self_row(conn, &id).await?;

        let attached = match node.parent_id() {
            Some(parent) => self.store.attach_subtree(conn, &id, &parent).await?,
            None => 0,
        };

        tracing::debug!(node = ?id, rows = attached + 1, "closures created");
        Ok(attached + 1)
    }

    /// Move the closures of `node`'s subtree from `old_parent` to `new_parent`.
    ///
    /// Rows internal to the subtree survive; only the links to outside
    /// ancestors are rewritten. Nothing happens when the parent is unchanged.
    pub async fn on_parent_changed<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
        old_parent: Option<&M::Id>,
        new_parent: Option<&M::Id>,
    ) -> Result<Reattachment, ClosureTableError> {
        if old_parent == new_parent {
            return Ok(Reattachment::default());
        }

        let detached = self.store.detach_subtree(conn, node).await?;
        let attached = match new_parent {
            Some(parent) => self.store.attach_subtree(conn, node, parent).await?,
            None => 0,
        };

        tracing::debug!(
            node = ?node,
            old_parent = ?old_parent,
            new_parent = ?new_parent,
            detached,
            attached,
            "closures reattached"
        );
        Ok(Reattachment { detached, attached })
    }

    /// Fails with `HasChildren` unless `node` is a leaf.
    pub async fn on_node_deleting<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
    ) -> Result<(), ClosureTableError> {
        let children = M::Entity::find()
            .filter(M::parent_column().eq(M::id_to_value(node)))
            .count(conn)
            .await?;

        if children > 0 {
            tracing::warn!(node = ?node, children, "rejected deletion of a node with children");
            return Err(ClosureTableError::has_children(node));
        }
        Ok(())
    }

    /// Remove every row in which `node` appears. Returns the number removed.
    pub async fn on_node_deleted<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
    ) -> Result<u64, ClosureTableError> {
        let deleted = self
            .store
            .delete_rows_touching(conn, std::slice::from_ref(node))
            .await?;
        tracing::debug!(node = ?node, deleted, "closures deleted");
        Ok(deleted)
    }

    /// Remove every row touching any node of a subtree (self, internal and
    /// attachment rows).
    pub async fn on_subtree_deleted<C: ConnectionTrait>(
        &self,
        conn: &C,
        subtree: &[M::Id],
    ) -> Result<u64, ClosureTableError> {
        let deleted = self.store.delete_rows_touching(conn, subtree).await?;
        tracing::debug!(nodes = subtree.len(), deleted, "subtree closures deleted");
        Ok(deleted)
    }
}
