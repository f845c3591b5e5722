use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    Select, TransactionTrait,
};
use tracing::Instrument;

use crate::config::{ClosureTableConfig, DeleteMode};
use crate::error::ClosureTableError;
use crate::guard::CycleGuard;
use crate::hooks::{NoHooks, TreeHooks};
use crate::integrity::{self, IntegrityReport};
use crate::lock::LockedTransaction;
use crate::maintainer::IncrementalMaintainer;
use crate::query::{RootedTree, Traversal, TreeQuery};
use crate::rebuild::{BulkRebuilder, RebuildReport};
use crate::store::ClosureStore;
use crate::traits::TreeNode;

/// Repository exposing the transactional tree operations for a given model.
///
/// Every mutation runs in its own transaction (a savepoint when `conn` is
/// already a transaction), holding the tree's advisory lock on PostgreSQL.
/// On error the transaction is rolled back and nothing is persisted.
pub struct ClosureTreeRepository<M>
where
    M: TreeNode,
{
    maintainer: IncrementalMaintainer<M>,
    guard: CycleGuard<M>,
    query: TreeQuery<M>,
    store: ClosureStore<M>,
    hooks: Arc<dyn TreeHooks<M>>,
}

impl<M: TreeNode> Clone for ClosureTreeRepository<M> {
    fn clone(&self) -> Self {
        Self {
            maintainer: self.maintainer,
            guard: self.guard,
            query: self.query,
            store: self.store,
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<M: TreeNode> Default for ClosureTreeRepository<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ClosureTreeRepository<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            maintainer: IncrementalMaintainer::new(),
            guard: CycleGuard::new(),
            query: TreeQuery::new(),
            store: ClosureStore::new(),
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: impl TreeHooks<M> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn config(&self) -> &'static ClosureTableConfig {
        M::closure_table_config()
    }

    /// Projections, for callers that already hold a connection or transaction.
    pub fn query(&self) -> &TreeQuery<M> {
        &self.query
    }

    /// Incremental entry points, for collaborators driving their own pipeline.
    pub fn maintainer(&self) -> &IncrementalMaintainer<M> {
        &self.maintainer
    }

    fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), ClosureTableError> {
        ClosureStore::<M>::ensure_supported(conn)
    }

    async fn begin<C>(&self, conn: &C) -> Result<LockedTransaction, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        Self::ensure_supported(conn)?;
        LockedTransaction::acquire(self.config().advisory_lock_strategy(), conn).await
    }

    async fn finish<T>(
        locked: LockedTransaction,
        result: Result<T, ClosureTableError>,
    ) -> Result<T, ClosureTableError> {
        match result {
            Ok(value) => {
                locked.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = locked.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Insert a node and create its closures. The parent is whatever the
    /// active model carries.
    pub async fn insert<C>(&self, conn: &C, active: M::ActiveModel) -> Result<M, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let locked = self.begin(conn).await?;
        let result = self
            .insert_on(locked.connection(), active)
            .instrument(tracing::debug_span!("closure_insert"))
            .await;
        Self::finish(locked, result).await
    }

    /// Insert a node under `parent` (a root when `None`).
    pub async fn insert_child<C>(
        &self,
        conn: &C,
        parent: Option<&M::Id>,
        mut active: M::ActiveModel,
    ) -> Result<M, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        M::set_parent(&mut active, parent.cloned());
        self.insert(conn, active).await
    }

    async fn insert_on(
        &self,
        txn: &DatabaseTransaction,
        active: M::ActiveModel,
    ) -> Result<M, ClosureTableError> {
        let model = active.insert(txn).await?;
        let id = model.id();

        if let Some(parent) = model.parent_id() {
            self.guard.ensure_exists(txn, &parent).await?;
            self.guard.validate_parent(txn, &id, Some(&parent)).await?;
        }

        self.maintainer.on_node_created(txn, &model).await?;
        self.hooks.after_insert(txn, &model).await?;
        tracing::debug!(node = ?id, parent = ?model.parent_id(), "node inserted");
        Ok(model)
    }

    /// Re-parent `node` (and its subtree) under `new_parent`, or make it a
    /// root. Fails with `Cycle` if `new_parent` is the node or lies below it.
    pub async fn move_to<C>(
        &self,
        conn: &C,
        node: &M,
        new_parent: Option<&M::Id>,
    ) -> Result<M, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let id = node.id();
        let locked = self.begin(conn).await?;
        let result = self
            .move_on(locked.connection(), &id, new_parent)
            .instrument(tracing::debug_span!("closure_move", node = ?id))
            .await;
        Self::finish(locked, result).await
    }

    async fn move_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
        new_parent: Option<&M::Id>,
    ) -> Result<M, ClosureTableError> {
        let current = self.query.find_existing(txn, id).await?;
        let old_parent = current.parent_id();
        if old_parent.as_ref() == new_parent {
            tracing::debug!(node = ?id, "parent unchanged");
            return Ok(current);
        }

        if let Some(parent) = new_parent {
            self.guard.ensure_exists(txn, parent).await?;
        }
        self.maintainer.before_save(txn, Some(id), new_parent).await?;

        let mut active = current.into_active_model();
        M::set_parent(&mut active, new_parent.cloned());
        let updated = active.update(txn).await?;

        self.maintainer
            .on_parent_changed(txn, id, old_parent.as_ref(), new_parent)
            .await?;
        self.hooks.after_move(txn, &updated, old_parent.as_ref()).await?;
        Ok(updated)
    }

    /// Delete a leaf. Fails with `HasChildren` otherwise.
    pub async fn delete_leaf<C>(&self, conn: &C, node: &M) -> Result<(), ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let id = node.id();
        let locked = self.begin(conn).await?;
        let result = self
            .delete_leaf_on(locked.connection(), &id)
            .instrument(tracing::debug_span!("closure_delete", node = ?id))
            .await;
        Self::finish(locked, result).await
    }

    async fn delete_leaf_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
    ) -> Result<(), ClosureTableError> {
        let current = self.query.find_existing(txn, id).await?;
        self.maintainer.on_node_deleting(txn, id).await?;
        self.hooks.before_delete(txn, &current).await?;

        self.maintainer.on_node_deleted(txn, id).await?;
        M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Delete `node` and everything below it. Returns the number of nodes
    /// removed.
    pub async fn delete_subtree<C>(&self, conn: &C, node: &M) -> Result<u64, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let id = node.id();
        let locked = self.begin(conn).await?;
        let result = self
            .delete_subtree_on(locked.connection(), &id)
            .instrument(tracing::debug_span!("closure_delete_subtree", node = ?id))
            .await;
        Self::finish(locked, result).await
    }

    async fn delete_subtree_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
    ) -> Result<u64, ClosureTableError> {
        let current = self.query.find_existing(txn, id).await?;
        self.hooks.before_delete(txn, &current).await?;

        let subtree = self.store.subtree_ids(txn, id).await?;
        self.maintainer.on_subtree_deleted(txn, &subtree).await?;

        let values = subtree.iter().map(M::id_to_value).collect::<Vec<_>>();
        let removed = M::Entity::delete_many()
            .filter(M::id_column().is_in(values))
            .exec(txn)
            .await?
            .rows_affected;

        tracing::debug!(node = ?id, removed, "subtree deleted");
        Ok(removed)
    }

    /// Delete `node` after re-attaching its children to its parent (children
    /// of a root become roots).
    pub async fn delete_node<C>(&self, conn: &C, node: &M) -> Result<(), ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let id = node.id();
        let locked = self.begin(conn).await?;
        let result = self
            .delete_node_on(locked.connection(), &id)
            .instrument(tracing::debug_span!("closure_delete_node", node = ?id))
            .await;
        Self::finish(locked, result).await
    }

    async fn delete_node_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
    ) -> Result<(), ClosureTableError> {
        let current = self.query.find_existing(txn, id).await?;
        let grandparent = current.parent_id();

        let children = self.query.children(id).all(txn).await?;
        for child in &children {
            self.move_on(txn, &child.id(), grandparent.as_ref()).await?;
        }
        tracing::debug!(node = ?id, promoted = children.len(), "children promoted");

        self.delete_leaf_on(txn, id).await
    }

    /// Delete `node` according to the configured [`DeleteMode`]. Returns the
    /// number of nodes removed.
    pub async fn destroy<C>(&self, conn: &C, node: &M) -> Result<u64, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        match self.config().delete_mode() {
            DeleteMode::Restrict => self.delete_leaf(conn, node).await.map(|_| 1),
            DeleteMode::PromoteChildren => self.delete_node(conn, node).await.map(|_| 1),
            DeleteMode::Subtree => self.delete_subtree(conn, node).await,
        }
    }

    /// Regenerate the whole closure table from the parent pointers.
    pub async fn rebuild<C>(&self, conn: &C) -> Result<RebuildReport, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let locked = self.begin(conn).await?;
        let result = BulkRebuilder::<M>::new().rebuild(locked.connection()).await;
        Self::finish(locked, result).await
    }

    /// Compare the closure table with the parent pointers.
    pub async fn verify<C>(&self, conn: &C) -> Result<IntegrityReport<M::Id>, ClosureTableError>
    where
        C: ConnectionTrait,
    {
        Self::ensure_supported(conn)?;
        integrity::verify::<M, C>(conn).await
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.find(conn, id).await
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Option<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        match model.parent_id() {
            Some(parent_id) => self.query.find(conn, &parent_id).await,
            None => Ok(None),
        }
    }

    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        Ok(self.query.children(&model.id()).all(conn).await?)
    }

    pub async fn roots<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        Ok(self.query.roots().all(conn).await?)
    }

    pub async fn leaves<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        Ok(self.query.leaves().all(conn).await?)
    }

    pub async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        Ok(self.query.siblings(model).all(conn).await?)
    }

    /// Ancestors of `model`, nearest first unless `traversal` says otherwise.
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        traversal: Traversal,
    ) -> Result<Vec<M>, ClosureTableError> {
        Ok(self
            .ancestors_with_depth(conn, model, traversal)
            .await?
            .into_iter()
            .map(|(node, _)| node)
            .collect())
    }

    pub async fn ancestors_with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        traversal: Traversal,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query
            .ancestors_with_depth(conn, &model.id(), traversal)
            .await
    }

    /// Descendants of `model`, nearest first unless `traversal` says otherwise.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        traversal: Traversal,
    ) -> Result<Vec<M>, ClosureTableError> {
        Ok(self
            .descendants_with_depth(conn, model, traversal)
            .await?
            .into_iter()
            .map(|(node, _)| node)
            .collect())
    }

    pub async fn descendants_with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        traversal: Traversal,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query
            .descendants_with_depth(conn, &model.id(), traversal)
            .await
    }

    /// Scope: nodes below `ancestor`, composable with further filters.
    pub fn descendants_of(&self, ancestor: &M::Id, traversal: Traversal) -> Select<M::Entity> {
        self.query.descendants_of(ancestor, traversal)
    }

    /// Scope: nodes above `descendant`, composable with further filters.
    pub fn ancestors_of(&self, descendant: &M::Id, traversal: Traversal) -> Select<M::Entity> {
        self.query.ancestors_of(descendant, traversal)
    }

    /// Scope: nodes with at least one child.
    pub fn with_children(&self) -> Select<M::Entity> {
        self.query.with_children()
    }

    /// Run `select`, pairing each node with its depth.
    pub async fn with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        select: Select<M::Entity>,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.with_depth(conn, select).await
    }

    /// Roots with their descendants, `max_depth` levels deep.
    pub async fn tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        max_depth: Option<i32>,
    ) -> Result<Vec<RootedTree<M>>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.tree(conn, max_depth).await
    }

    pub async fn depth_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<i32, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.depth_of(conn, &model.id()).await
    }

    pub async fn subtree_depth_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<i32, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.subtree_depth_of(conn, &model.id()).await
    }

    pub async fn tree_depth<C: ConnectionTrait>(&self, conn: &C) -> Result<i32, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.tree_depth(conn).await
    }

    /// Closest shared ancestor (a node counts as its own ancestor); `None`
    /// when the nodes live in different trees.
    pub async fn common_ancestor<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M,
        b: &M,
    ) -> Result<Option<M>, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.common_ancestor(conn, &a.id(), &b.id()).await
    }

    pub async fn has_common_ancestor<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M,
        b: &M,
    ) -> Result<bool, ClosureTableError> {
        Self::ensure_supported(conn)?;
        Ok(self
            .query
            .common_ancestor_id(conn, &a.id(), &b.id())
            .await?
            .is_some())
    }

    /// Fails with `NoCommonAncestor` when the nodes live in different trees.
    pub async fn distance_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M,
        b: &M,
    ) -> Result<i32, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.distance_between(conn, &a.id(), &b.id()).await
    }

    pub fn is_root(&self, model: &M) -> bool {
        model.parent_id().is_none()
    }

    pub async fn is_leaf<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<bool, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.is_leaf(conn, &model.id()).await
    }

    pub fn is_child_of(&self, model: &M, parent: &M) -> bool {
        model.parent_id().as_ref() == Some(&parent.id())
    }

    pub fn is_parent_of(&self, model: &M, child: &M) -> bool {
        self.is_child_of(child, model)
    }

    pub async fn has_children<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<bool, ClosureTableError> {
        Ok(!self.is_leaf(conn, model).await?)
    }

    pub fn is_sibling_of(&self, model: &M, other: &M) -> bool {
        model.id() != other.id() && model.parent_id() == other.parent_id()
    }

    pub async fn is_ancestor_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        other: &M,
    ) -> Result<bool, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.is_ancestor_of(conn, &model.id(), &other.id()).await
    }

    pub async fn is_descendant_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
        other: &M,
    ) -> Result<bool, ClosureTableError> {
        Self::ensure_supported(conn)?;
        self.query.is_ancestor_of(conn, &other.id(), &model.id()).await
    }
}
