use thiserror::Error;

/// Errors returned by the closure-table maintenance and query APIs.
#[derive(Debug, Error)]
pub enum ClosureTableError {
    #[error("closure-table supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    /// The proposed parent is the node itself or one of its descendants.
    #[error("node {node} cannot be attached under {parent}: the parent is the node itself or one of its descendants")]
    Cycle { node: String, parent: String },

    /// Plain deletion is reserved for leaves; use subtree or promote semantics.
    #[error("node {node} has children; delete the subtree or promote the children instead")]
    HasChildren { node: String },

    #[error("the nodes have no common ancestor")]
    NoCommonAncestor,

    #[error("node {id} does not exist")]
    NodeNotFound { id: String },

    /// Store-level failure. The surrounding transaction is always rolled back.
    #[error("transaction failed: {0}")]
    Transaction(#[from] sea_orm::DbErr),

    #[error("query builder error: {0}")]
    QueryBuilder(#[from] sea_orm::sea_query::error::Error),

    #[error("closure-table invariant violation: {0}")]
    Invariant(String),
}

impl ClosureTableError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub(crate) fn cycle(node: &impl std::fmt::Debug, parent: &impl std::fmt::Debug) -> Self {
        Self::Cycle {
            node: format!("{node:?}"),
            parent: format!("{parent:?}"),
        }
    }

    pub(crate) fn has_children(node: &impl std::fmt::Debug) -> Self {
        Self::HasChildren {
            node: format!("{node:?}"),
        }
    }

    pub(crate) fn not_found(id: &impl std::fmt::Debug) -> Self {
        Self::NodeNotFound {
            id: format!("{id:?}"),
        }
    }

    /// Structural errors fail identically on retry; only store errors may not.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. } | Self::HasChildren { .. } | Self::NoCommonAncestor
        )
    }
}
