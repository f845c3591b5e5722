use async_trait::async_trait;
use sea_orm::DatabaseTransaction;

use crate::error::ClosureTableError;
use crate::traits::TreeNode;

/// Callbacks run by [`ClosureTreeRepository`](crate::ClosureTreeRepository)
/// inside each structural mutation's transaction, after the closure rows
/// have been brought up to date.
///
/// This is where a sibling-ordering collaborator renumbers positions. An
/// error aborts the whole mutation.
#[async_trait]
pub trait TreeHooks<M>: Send + Sync
where
    M: TreeNode,
{
    async fn after_insert(
        &self,
        _txn: &DatabaseTransaction,
        _node: &M,
    ) -> Result<(), ClosureTableError> {
        Ok(())
    }

    async fn after_move(
        &self,
        _txn: &DatabaseTransaction,
        _node: &M,
        _old_parent: Option<&M::Id>,
    ) -> Result<(), ClosureTableError> {
        Ok(())
    }

    /// Runs before anything is removed; for subtree deletion only the
    /// subtree root is reported.
    async fn before_delete(
        &self,
        _txn: &DatabaseTransaction,
        _node: &M,
    ) -> Result<(), ClosureTableError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<M: TreeNode> TreeHooks<M> for NoHooks {}
