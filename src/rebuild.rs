use sea_orm::sea_query::{Alias, Expr, JoinType, Query, SelectStatement};
use sea_orm::ConnectionTrait;

use crate::error::ClosureTableError;
use crate::store::ClosureStore;
use crate::traits::TreeNode;

/// Outcome of a full rebuild.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RebuildReport {
    /// Rows that were present before the rebuild.
    pub cleared: u64,
    /// Rows written, self rows included.
    pub inserted: u64,
    /// Deepest level produced; 0 for a forest of bare roots or an empty table.
    pub max_depth: i32,
}

/// Regenerates the closure table from the parent pointers, one depth level
/// per statement.
///
/// Level `d` joins every node to the rows ending at its parent at depth
/// `d - 1`, so the loop stops after `max_depth + 1` levels. It must not run
/// concurrently with incremental maintenance on the same table.
pub struct BulkRebuilder<M>
where
    M: TreeNode,
{
    store: ClosureStore<M>,
}

impl<M: TreeNode> Default for BulkRebuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> BulkRebuilder<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            store: ClosureStore::new(),
        }
    }

    #[tracing::instrument(
        name = "closure_rebuild",
        skip_all,
        fields(
            table = M::closure_table_config().closure_table(),
            parent = M::closure_table_config().parent_column(),
        )
    )]
    pub async fn rebuild<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<RebuildReport, ClosureTableError> {
        let cleared = self.store.clear(conn).await?;
        let nodes = self.insert_self_rows(conn).await?;
        tracing::info!(cleared, nodes, "self rows written");

        let mut inserted = nodes;
        let mut depth: i32 = 1;
        loop {
            // A level that reaches a node's own self row has walked a loop
            // in the parent pointers.
            if self.closes_loop(conn, depth).await? {
                tracing::warn!(depth, "parent pointers contain a cycle");
                return Err(ClosureTableError::invariant(format!(
                    "rebuild did not converge at level {depth}; the parent pointers contain a cycle"
                )));
            }

            let level = self
                .store
                .insert_from_select(conn, Self::level(depth))
                .await?;
            if level == 0 {
                break;
            }
            tracing::debug!(depth, rows = level, "level written");
            inserted += level;
            depth += 1;
        }

        let report = RebuildReport {
            cleared,
            inserted,
            max_depth: depth - 1,
        };
        tracing::info!(inserted, max_depth = report.max_depth, "closure table rebuilt");
        Ok(report)
    }

    async fn insert_self_rows<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ClosureTableError> {
        let select = Query::select()
            .column(M::id_column())
            .column(M::id_column())
            .expr(Expr::val(0i32))
            .from(M::Entity::default())
            .to_owned();
        self.store.insert_from_select(conn, select).await
    }

    /// Rows of level `depth`: every node joined to the rows ending at its
    /// parent one level up.
    fn level(depth: i32) -> SelectStatement {
        let nodes = Alias::new("nodes");
        let upper = Alias::new("upper");

        Query::select()
            .expr(Expr::col((upper.clone(), M::closure_ancestor_column())))
            .expr(Expr::col((nodes.clone(), M::id_column())))
            .expr(Expr::val(depth))
            .from_as(M::Entity::default(), nodes.clone())
            .join_as(
                JoinType::InnerJoin,
                M::ClosureEntity::default(),
                upper.clone(),
                Expr::col((nodes, M::parent_column()))
                    .equals((upper.clone(), M::closure_descendant_column())),
            )
            .and_where(Expr::col((upper, M::closure_depth_column())).eq(depth - 1))
            .to_owned()
    }

    async fn closes_loop<C: ConnectionTrait>(
        &self,
        conn: &C,
        depth: i32,
    ) -> Result<bool, ClosureTableError> {
        let select = Self::level(depth)
            .and_where(
                Expr::col((Alias::new("nodes"), M::id_column()))
                    .equals((Alias::new("upper"), M::closure_ancestor_column())),
            )
            .limit(1)
            .to_owned();

        let backend = conn.get_database_backend();
        Ok(conn.query_one(backend.build(&select)).await?.is_some())
    }
}
