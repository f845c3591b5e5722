use sea_orm::sea_query::Index;
use sea_orm::{DbBackend, EntityName, Schema, Statement};

use crate::traits::TreeNode;

/// DDL for `M`'s closure table.
///
/// The table itself comes from the closure entity, whose composite primary
/// key provides the `(ancestor_id, descendant_id)` uniqueness. Added on top:
/// a unique index on `(descendant_id, depth)` (one ancestor per level) and an
/// index on `depth`.
pub fn closure_table_statements<M: TreeNode>(backend: DbBackend) -> Vec<Statement> {
    let table = M::ClosureEntity::default();
    let table_name = table.table_name().to_owned();

    let create = Schema::new(backend)
        .create_table_from_entity(table)
        .if_not_exists()
        .to_owned();

    let per_level = Index::create()
        .name(format!("ux_{table_name}_descendant_depth"))
        .table(M::ClosureEntity::default())
        .col(M::closure_descendant_column())
        .col(M::closure_depth_column())
        .unique()
        .if_not_exists()
        .to_owned();

    let by_depth = Index::create()
        .name(format!("ix_{table_name}_depth"))
        .table(M::ClosureEntity::default())
        .col(M::closure_depth_column())
        .if_not_exists()
        .to_owned();

    vec![
        backend.build(&create),
        backend.build(&per_level),
        backend.build(&by_depth),
    ]
}
