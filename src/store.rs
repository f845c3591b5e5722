//! Low-level statements against the closure table.
//!
//! Every method runs on whatever connection it is handed; callers that mutate
//! pass the open transaction so the statements commit or roll back together.

use std::marker::PhantomData;

use sea_orm::sea_query::{Alias, Expr, Query, SelectStatement};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::error::ClosureTableError;
use crate::traits::TreeNode;

/// One `(ancestor, descendant, depth)` tuple of the closure table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureRow<Id> {
    pub ancestor_id: Id,
    pub descendant_id: Id,
    pub depth: i32,
}

impl<Id> ClosureRow<Id> {
    pub fn new(ancestor_id: Id, descendant_id: Id, depth: i32) -> Self {
        Self {
            ancestor_id,
            descendant_id,
            depth,
        }
    }

    pub fn is_self_row(&self) -> bool {
        self.depth == 0
    }
}

pub struct ClosureStore<M>
where
    M: TreeNode,
{
    _marker: PhantomData<M>,
}

impl<M: TreeNode> Clone for ClosureStore<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: TreeNode> Copy for ClosureStore<M> {}

impl<M: TreeNode> Default for ClosureStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ClosureStore<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub(crate) fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), ClosureTableError> {
        match conn.get_database_backend() {
            DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
            _ => Err(ClosureTableError::UnsupportedBackend),
        }
    }

    fn table() -> M::ClosureEntity {
        M::ClosureEntity::default()
    }

    pub(crate) fn to_row(model: &M::ClosureModel) -> ClosureRow<M::Id> {
        ClosureRow::new(
            M::closure_model_ancestor(model),
            M::closure_model_descendant(model),
            M::closure_model_depth(model),
        )
    }

    /// Insert the `(id, id, 0)` row.
    pub async fn insert_self_row<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<(), ClosureTableError> {
        M::ClosureEntity::insert(M::closure_build_row(id.clone(), id.clone(), 0))
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    /// `INSERT INTO closures (ancestor, descendant, depth) <select>`; the select
    /// must project its columns in that order.
    pub(crate) async fn insert_from_select<C: ConnectionTrait>(
        &self,
        conn: &C,
        select: SelectStatement,
    ) -> Result<u64, ClosureTableError> {
        let insert = Query::insert()
            .into_table(Self::table())
            .columns([
                M::closure_ancestor_column(),
                M::closure_descendant_column(),
                M::closure_depth_column(),
            ])
            .select_from(select)?
            .to_owned();

        let statement = conn.get_database_backend().build(&insert);
        let result = conn.execute(statement).await?;
        Ok(result.rows_affected())
    }

    /// Connect `node` and everything below it to `parent` and all of the
    /// parent's ancestors.
    ///
    /// The new rows are every combination of the node's descending rows with
    /// the parent's ascending rows, at depth `d1 + d2 + 1`. The subtree's
    /// internal rows must already exist.
    pub async fn attach_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
        parent: &M::Id,
    ) -> Result<u64, ClosureTableError> {
        let below = Alias::new("below");
        let above = Alias::new("above");

        let select = Query::select()
            .expr(Expr::col((above.clone(), M::closure_ancestor_column())))
            .expr(Expr::col((below.clone(), M::closure_descendant_column())))
            .expr(
                Expr::col((below.clone(), M::closure_depth_column()))
                    .add(Expr::col((above.clone(), M::closure_depth_column())))
                    .add(1),
            )
            .from_as(Self::table(), below.clone())
            .from_as(Self::table(), above.clone())
            .and_where(Expr::col((below, M::closure_ancestor_column())).eq(M::id_to_value(node)))
            .and_where(
                Expr::col((above, M::closure_descendant_column())).eq(M::id_to_value(parent)),
            )
            .to_owned();

        let inserted = self.insert_from_select(conn, select).await?;
        tracing::debug!(node = ?node, parent = ?parent, inserted, "attached subtree");
        Ok(inserted)
    }

    /// Delete the rows linking `node`'s subtree to ancestors outside of it.
    ///
    /// A row `(x, d, depth)` with `d` inside the subtree is external exactly
    /// when `depth` exceeds the internal depth from `node` to `d`. Internal
    /// rows are kept.
    pub async fn detach_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M::Id,
    ) -> Result<u64, ClosureTableError> {
        let internal = Alias::new("internal");

        let internal_path = Query::select()
            .expr(Expr::val(1))
            .from_as(Self::table(), internal.clone())
            .and_where(
                Expr::col((internal.clone(), M::closure_ancestor_column()))
                    .eq(M::id_to_value(node)),
            )
            .and_where(
                Expr::col((internal.clone(), M::closure_descendant_column()))
                    .equals((Self::table(), M::closure_descendant_column())),
            )
            .and_where(
                Expr::col((Self::table(), M::closure_depth_column()))
                    .gt(Expr::col((internal, M::closure_depth_column()))),
            )
            .to_owned();

        let result = M::ClosureEntity::delete_many()
            .filter(Expr::exists(internal_path))
            .exec(conn)
            .await?;

        tracing::debug!(node = ?node, deleted = result.rows_affected, "detached subtree");
        Ok(result.rows_affected)
    }

    /// Delete every row in which any of `ids` is the ancestor or the descendant.
    pub async fn delete_rows_touching<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[M::Id],
    ) -> Result<u64, ClosureTableError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let values = ids.iter().map(M::id_to_value).collect::<Vec<_>>();
        let result = M::ClosureEntity::delete_many()
            .filter(
                Condition::any()
                    .add(M::closure_ancestor_column().is_in(values.clone()))
                    .add(M::closure_descendant_column().is_in(values)),
            )
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Remove every row of the table.
    pub async fn clear<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ClosureTableError> {
        let result = M::ClosureEntity::delete_many().exec(conn).await?;
        Ok(result.rows_affected)
    }

    /// Whether `(ancestor, descendant, depth)` exists; `strict` requires `depth > 0`.
    pub async fn exists<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &M::Id,
        descendant: &M::Id,
        strict: bool,
    ) -> Result<bool, ClosureTableError> {
        let mut query = M::ClosureEntity::find()
            .filter(M::closure_ancestor_column().eq(M::id_to_value(ancestor)))
            .filter(M::closure_descendant_column().eq(M::id_to_value(descendant)));
        if strict {
            query = query.filter(M::closure_depth_column().gt(0));
        }
        Ok(query.count(conn).await? > 0)
    }

    pub async fn count_rows<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ClosureTableError> {
        Ok(M::ClosureEntity::find().count(conn).await?)
    }

    /// Number of strict ancestors of `id`.
    pub async fn count_ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<u64, ClosureTableError> {
        let count = M::ClosureEntity::find()
            .filter(M::closure_descendant_column().eq(M::id_to_value(id)))
            .filter(M::closure_depth_column().gt(0))
            .count(conn)
            .await?;
        Ok(count)
    }

    /// `MAX(depth)` over the rows descending from `ancestor`, or over the whole
    /// table when `ancestor` is `None`. An empty selection yields 0.
    pub async fn max_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: Option<&M::Id>,
    ) -> Result<i32, ClosureTableError> {
        let mut query = M::ClosureEntity::find()
            .select_only()
            .column_as(M::closure_depth_column().max(), "max_depth");
        if let Some(ancestor) = ancestor {
            query = query.filter(M::closure_ancestor_column().eq(M::id_to_value(ancestor)));
        }

        let max: Option<Option<i32>> = query.into_tuple().one(conn).await?;
        Ok(max.flatten().unwrap_or(0))
    }

    /// Ids of `id` and all of its descendants, nearest first.
    pub async fn subtree_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ClosureTableError> {
        let rows = M::ClosureEntity::find()
            .filter(M::closure_ancestor_column().eq(M::id_to_value(id)))
            .order_by_asc(M::closure_depth_column())
            .all(conn)
            .await?;
        Ok(rows.iter().map(M::closure_model_descendant).collect())
    }

    /// Snapshot of the whole table.
    pub async fn rows<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<ClosureRow<M::Id>>, ClosureTableError> {
        let rows = M::ClosureEntity::find()
            .order_by_asc(M::closure_depth_column())
            .order_by_asc(M::closure_ancestor_column())
            .order_by_asc(M::closure_descendant_column())
            .all(conn)
            .await?;
        Ok(rows.iter().map(Self::to_row).collect())
    }
}
