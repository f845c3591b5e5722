//! Read-only projections over the closure table.

use std::collections::HashMap;

use sea_orm::sea_query::{Alias, Expr, Query, SelectStatement};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Select};

use crate::error::ClosureTableError;
use crate::store::ClosureStore;
use crate::traits::TreeNode;

/// Direction in which ancestor and descendant lists are ordered.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DepthOrder {
    /// Closest first (depth ascending). For ancestors the root comes last.
    #[default]
    Nearest,
    /// Farthest first (depth descending).
    Farthest,
}

/// Filters applied when walking up or down from a node.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Traversal {
    max_depth: Option<i32>,
    include_self: bool,
    order: DepthOrder,
}

impl Traversal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop `depth` edges away from the starting node.
    pub fn max_depth(mut self, depth: i32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Include the starting node itself (its depth-0 row).
    pub fn with_self(mut self) -> Self {
        self.include_self = true;
        self
    }

    pub fn order(mut self, order: DepthOrder) -> Self {
        self.order = order;
        self
    }

    pub fn includes_self(&self) -> bool {
        self.include_self
    }

    pub fn depth_limit(&self) -> Option<i32> {
        self.max_depth
    }
}

/// A root together with its descendants, nearest levels first.
#[derive(Clone, Debug)]
pub struct RootedTree<M> {
    pub root: M,
    pub descendants: Vec<(M, i32)>,
}

#[derive(Copy, Clone)]
enum Direction {
    Up,
    Down,
}

pub struct TreeQuery<M>
where
    M: TreeNode,
{
    store: ClosureStore<M>,
}

impl<M: TreeNode> Clone for TreeQuery<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: TreeNode> Copy for TreeQuery<M> {}

impl<M: TreeNode> Default for TreeQuery<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TreeQuery<M>
where
    M: TreeNode,
{
    pub fn new() -> Self {
        Self {
            store: ClosureStore::new(),
        }
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M>, ClosureTableError> {
        let model = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .one(conn)
            .await?;
        Ok(model)
    }

    pub(crate) async fn find_existing<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<M, ClosureTableError> {
        self.find(conn, id)
            .await?
            .ok_or_else(|| ClosureTableError::not_found(id))
    }

    /// Ancestors of `id` with their distance from it.
    pub async fn ancestors_with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        traversal: Traversal,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        self.walk(conn, Direction::Up, id, traversal).await
    }

    /// Descendants of `id` with their distance from it. Nodes at equal depth
    /// are ordered by id.
    pub async fn descendants_with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        traversal: Traversal,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        self.walk(conn, Direction::Down, id, traversal).await
    }

    async fn walk<C: ConnectionTrait>(
        &self,
        conn: &C,
        direction: Direction,
        id: &M::Id,
        traversal: Traversal,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        let (anchor, other) = match direction {
            Direction::Up => (M::closure_descendant_column(), M::closure_ancestor_column()),
            Direction::Down => (M::closure_ancestor_column(), M::closure_descendant_column()),
        };

        let mut query = M::ClosureEntity::find().filter(anchor.eq(M::id_to_value(id)));
        if !traversal.include_self {
            query = query.filter(M::closure_depth_column().gt(0));
        }
        if let Some(max_depth) = traversal.max_depth {
            query = query.filter(M::closure_depth_column().lte(max_depth));
        }
        query = match traversal.order {
            DepthOrder::Nearest => query.order_by_asc(M::closure_depth_column()),
            DepthOrder::Farthest => query.order_by_desc(M::closure_depth_column()),
        };
        let rows = query.order_by_asc(other).all(conn).await?;

        let pairs = rows
            .iter()
            .map(|row| match direction {
                Direction::Up => (M::closure_model_ancestor(row), M::closure_model_depth(row)),
                Direction::Down => (M::closure_model_descendant(row), M::closure_model_depth(row)),
            })
            .collect::<Vec<_>>();

        self.load_in_order(conn, pairs).await
    }

    async fn load_in_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        pairs: Vec<(M::Id, i32)>,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let values = pairs
            .iter()
            .map(|(id, _)| M::id_to_value(id))
            .collect::<Vec<_>>();
        let mut models = M::Entity::find()
            .filter(M::id_column().is_in(values))
            .all(conn)
            .await?
            .into_iter()
            .map(|model| (model.id(), model))
            .collect::<HashMap<_, _>>();

        let mut ordered = Vec::with_capacity(pairs.len());
        for (id, depth) in pairs {
            match models.remove(&id) {
                Some(model) => ordered.push((model, depth)),
                None => {
                    return Err(ClosureTableError::invariant(format!(
                        "closure row references missing node {id:?}"
                    )))
                }
            }
        }
        Ok(ordered)
    }

    /// Number of strict ancestors; 0 for a root.
    pub async fn depth_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<i32, ClosureTableError> {
        let count = self.store.count_ancestors(conn, id).await?;
        i32::try_from(count)
            .map_err(|_| ClosureTableError::invariant(format!("depth of {id:?} overflows i32")))
    }

    /// Height of the subtree rooted at `id`; 0 for a leaf.
    pub async fn subtree_depth_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<i32, ClosureTableError> {
        self.store.max_depth(conn, Some(id)).await
    }

    /// Deepest level of the whole forest; 0 when empty.
    pub async fn tree_depth<C: ConnectionTrait>(&self, conn: &C) -> Result<i32, ClosureTableError> {
        self.store.max_depth(conn, None).await
    }

    /// Closest node that is an ancestor of (or equal to) both `a` and `b`.
    pub async fn common_ancestor_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M::Id,
        b: &M::Id,
    ) -> Result<Option<M::Id>, ClosureTableError> {
        let other = Alias::new("other");
        let ancestors_of_b = Query::select()
            .column((other.clone(), M::closure_ancestor_column()))
            .from_as(M::ClosureEntity::default(), other.clone())
            .and_where(Expr::col((other, M::closure_descendant_column())).eq(M::id_to_value(b)))
            .to_owned();

        let row = M::ClosureEntity::find()
            .filter(M::closure_descendant_column().eq(M::id_to_value(a)))
            .filter(M::closure_ancestor_column().in_subquery(ancestors_of_b))
            .order_by_asc(M::closure_depth_column())
            .one(conn)
            .await?;
        Ok(row.as_ref().map(M::closure_model_ancestor))
    }

    pub async fn common_ancestor<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M::Id,
        b: &M::Id,
    ) -> Result<Option<M>, ClosureTableError> {
        match self.common_ancestor_id(conn, a, b).await? {
            Some(id) => self.find(conn, &id).await,
            None => Ok(None),
        }
    }

    /// Edges on the path between `a` and `b` through their common ancestor.
    pub async fn distance_between<C: ConnectionTrait>(
        &self,
        conn: &C,
        a: &M::Id,
        b: &M::Id,
    ) -> Result<i32, ClosureTableError> {
        let common = self
            .common_ancestor_id(conn, a, b)
            .await?
            .ok_or(ClosureTableError::NoCommonAncestor)?;

        let rows = M::ClosureEntity::find()
            .filter(M::closure_ancestor_column().eq(M::id_to_value(&common)))
            .filter(M::closure_descendant_column().is_in([M::id_to_value(a), M::id_to_value(b)]))
            .all(conn)
            .await?;
        Ok(rows.iter().map(M::closure_model_depth).sum())
    }

    pub async fn is_ancestor_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &M::Id,
        descendant: &M::Id,
    ) -> Result<bool, ClosureTableError> {
        self.store.exists(conn, ancestor, descendant, true).await
    }

    pub async fn is_leaf<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<bool, ClosureTableError> {
        let child = M::Entity::find()
            .filter(M::parent_column().eq(M::id_to_value(id)))
            .one(conn)
            .await?;
        Ok(child.is_none())
    }

    /// Nodes under `ancestor`, as a query that can be filtered further.
    pub fn descendants_of(&self, ancestor: &M::Id, traversal: Traversal) -> Select<M::Entity> {
        let ids = Self::closure_ids(
            M::closure_descendant_column(),
            M::closure_ancestor_column(),
            ancestor,
            traversal,
        );
        M::Entity::find().filter(M::id_column().in_subquery(ids))
    }

    /// Nodes above `descendant`, as a query that can be filtered further.
    pub fn ancestors_of(&self, descendant: &M::Id, traversal: Traversal) -> Select<M::Entity> {
        let ids = Self::closure_ids(
            M::closure_ancestor_column(),
            M::closure_descendant_column(),
            descendant,
            traversal,
        );
        M::Entity::find().filter(M::id_column().in_subquery(ids))
    }

    fn closure_ids(
        project: <M::ClosureEntity as EntityTrait>::Column,
        anchor: <M::ClosureEntity as EntityTrait>::Column,
        id: &M::Id,
        traversal: Traversal,
    ) -> SelectStatement {
        let scope = Alias::new("scope");
        let mut select = Query::select()
            .column((scope.clone(), project))
            .from_as(M::ClosureEntity::default(), scope.clone())
            .and_where(Expr::col((scope.clone(), anchor)).eq(M::id_to_value(id)))
            .to_owned();
        if !traversal.includes_self() {
            select.and_where(Expr::col((scope.clone(), M::closure_depth_column())).gt(0));
        }
        if let Some(max_depth) = traversal.depth_limit() {
            select.and_where(Expr::col((scope, M::closure_depth_column())).lte(max_depth));
        }
        select
    }

    pub fn roots(&self) -> Select<M::Entity> {
        M::Entity::find()
            .filter(M::parent_column().is_null())
            .order_by_asc(M::id_column())
    }

    /// Nodes without children.
    pub fn leaves(&self) -> Select<M::Entity> {
        let parents = Query::select()
            .column(M::closure_ancestor_column())
            .from(M::ClosureEntity::default())
            .and_where(Expr::col(M::closure_depth_column()).gt(0))
            .to_owned();
        M::Entity::find().filter(M::id_column().not_in_subquery(parents))
    }

    /// Nodes with at least one child.
    pub fn with_children(&self) -> Select<M::Entity> {
        let parents = Query::select()
            .column(M::closure_ancestor_column())
            .from(M::ClosureEntity::default())
            .and_where(Expr::col(M::closure_depth_column()).gt(0))
            .to_owned();
        M::Entity::find().filter(M::id_column().in_subquery(parents))
    }

    /// Runs `select` and pairs each node with its number of ancestors.
    pub async fn with_depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        select: Select<M::Entity>,
    ) -> Result<Vec<(M, i32)>, ClosureTableError> {
        let models = select.all(conn).await?;
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let ids = models
            .iter()
            .map(|model| M::id_to_value(&model.id()))
            .collect::<Vec<_>>();
        let rows = M::ClosureEntity::find()
            .filter(M::closure_descendant_column().is_in(ids))
            .filter(M::closure_depth_column().gt(0))
            .all(conn)
            .await?;

        let mut depths: HashMap<M::Id, i32> = HashMap::new();
        for row in &rows {
            *depths.entry(M::closure_model_descendant(row)).or_default() += 1;
        }
        Ok(models
            .into_iter()
            .map(|model| {
                let depth = depths.get(&model.id()).copied().unwrap_or(0);
                (model, depth)
            })
            .collect())
    }

    /// Every root with its descendants down to `max_depth` levels (all of
    /// them when `None`). Roots are ordered by id.
    pub async fn tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        max_depth: Option<i32>,
    ) -> Result<Vec<RootedTree<M>>, ClosureTableError> {
        let roots = self.roots().all(conn).await?;
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let root_ids = roots
            .iter()
            .map(|root| M::id_to_value(&root.id()))
            .collect::<Vec<_>>();
        let mut query = M::ClosureEntity::find()
            .filter(M::closure_ancestor_column().is_in(root_ids))
            .filter(M::closure_depth_column().gt(0));
        if let Some(max_depth) = max_depth {
            query = query.filter(M::closure_depth_column().lte(max_depth));
        }
        let rows = query
            .order_by_asc(M::closure_depth_column())
            .order_by_asc(M::closure_descendant_column())
            .all(conn)
            .await?;

        let owners = rows.iter().map(M::closure_model_ancestor).collect::<Vec<_>>();
        let pairs = rows
            .iter()
            .map(|row| (M::closure_model_descendant(row), M::closure_model_depth(row)))
            .collect::<Vec<_>>();
        let loaded = self.load_in_order(conn, pairs).await?;

        let mut grouped: HashMap<M::Id, Vec<(M, i32)>> = HashMap::new();
        for (owner, entry) in owners.into_iter().zip(loaded) {
            grouped.entry(owner).or_default().push(entry);
        }
        Ok(roots
            .into_iter()
            .map(|root| {
                let descendants = grouped.remove(&root.id()).unwrap_or_default();
                RootedTree { root, descendants }
            })
            .collect())
    }

    pub fn children(&self, id: &M::Id) -> Select<M::Entity> {
        M::Entity::find()
            .filter(M::parent_column().eq(M::id_to_value(id)))
            .order_by_asc(M::id_column())
    }

    /// Nodes sharing `node`'s parent (roots are siblings of roots), excluding `node`.
    pub fn siblings(&self, node: &M) -> Select<M::Entity> {
        let query = match node.parent_id() {
            Some(parent) => M::Entity::find().filter(M::parent_column().eq(M::id_to_value(&parent))),
            None => M::Entity::find().filter(M::parent_column().is_null()),
        };
        query
            .filter(M::id_column().ne(M::id_to_value(&node.id())))
            .order_by_asc(M::id_column())
    }
}
