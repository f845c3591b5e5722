//! Closure-table hierarchy maintenance for SeaORM entities.
//!
//! A node table carries a nullable parent pointer; a companion closure table
//! stores one `(ancestor, descendant, depth)` row per ancestor relation,
//! self rows included. [`ClosureTreeRepository`] keeps the two in step under
//! create, re-parent and delete, answers hierarchy queries from the closure
//! table alone, and can regenerate it from the parent pointers.
//!
//! PostgreSQL and SQLite are supported. On PostgreSQL, structural mutations
//! serialize on a per-tree advisory lock.

extern crate self as closure_table;

pub mod config;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod integrity;
pub mod lock;
pub mod maintainer;
pub mod query;
pub mod rebuild;
pub mod repository;
pub mod schema;
pub mod store;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{AdvisoryLockStrategy, ClosureTableConfig, ClosureTableOptions, DeleteMode};
    pub use crate::error::ClosureTableError;
    pub use crate::hooks::TreeHooks;
    pub use crate::query::{DepthOrder, Traversal};
    pub use crate::repository::ClosureTreeRepository;
    pub use crate::traits::TreeNode;
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

pub use closure_table_macros::TreeNode as TreeNodeDerive;
#[doc(hidden)]
pub use closure_table_macros::TreeNode;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ClosureTableConfig, ClosureTableOptions, DeleteMode,
};
pub use error::ClosureTableError;
pub use guard::CycleGuard;
pub use hooks::{NoHooks, TreeHooks};
pub use integrity::{verify, IntegrityReport};
pub use lock::LockedTransaction;
pub use maintainer::{IncrementalMaintainer, Reattachment};
pub use query::{DepthOrder, RootedTree, Traversal, TreeQuery};
pub use rebuild::{BulkRebuilder, RebuildReport};
pub use repository::ClosureTreeRepository;
pub use schema::closure_table_statements;
pub use store::{ClosureRow, ClosureStore};
pub use traits::TreeNode;
