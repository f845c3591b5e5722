mod common;

use std::collections::HashSet;

use closure_table::{ClosureStore, ClosureTableError, DepthOrder, Traversal};
use common::{add, chain, closure_rows, names, reload, setup, Repo};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn chain_builds_every_ancestor_pair() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    let (a, b, c, d) = (t.a.id, t.b.id, t.c.id, t.d.id);
    assert_eq!(
        closure_rows(&db).await?,
        vec![
            (a, a, 0),
            (a, b, 1),
            (a, c, 2),
            (a, d, 3),
            (b, b, 0),
            (b, c, 1),
            (b, d, 2),
            (c, c, 0),
            (c, d, 1),
            (d, d, 0),
        ]
    );

    assert_eq!(repo.distance_between(&db, &t.a, &t.d).await?, 3);
    assert_eq!(repo.distance_between(&db, &t.c, &t.c).await?, 0);
    assert_eq!(repo.subtree_depth_of(&db, &t.a).await?, 3);
    assert_eq!(repo.subtree_depth_of(&db, &t.d).await?, 0);
    assert_eq!(repo.depth_of(&db, &t.d).await?, 3);
    assert_eq!(repo.depth_of(&db, &t.a).await?, 0);
    assert_eq!(repo.tree_depth(&db).await?, 3);

    let common = repo.common_ancestor(&db, &t.b, &t.d).await?;
    assert_eq!(common.map(|node| node.name), Some("b".to_owned()));
    Ok(())
}

#[tokio::test]
async fn ancestors_and_descendants_follow_depth() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    let ancestors = repo.ancestors(&db, &t.d, Traversal::new()).await?;
    assert_eq!(names(&ancestors), vec!["c", "b", "a"]);

    let farthest = repo
        .ancestors(&db, &t.d, Traversal::new().order(DepthOrder::Farthest))
        .await?;
    assert_eq!(names(&farthest), vec!["a", "b", "c"]);

    let descendants = repo
        .descendants_with_depth(&db, &t.b, Traversal::new().with_self())
        .await?;
    let pairs = descendants
        .iter()
        .map(|(node, depth)| (node.name.as_str(), *depth))
        .collect::<Vec<_>>();
    assert_eq!(pairs, vec![("b", 0), ("c", 1), ("d", 2)]);

    let near = repo
        .descendants(&db, &t.a, Traversal::new().max_depth(2))
        .await?;
    assert_eq!(names(&near), vec!["b", "c"]);
    Ok(())
}

#[tokio::test]
async fn moving_a_subtree_rewrites_only_external_links() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let x = add(&repo, &db, "x", None).await?;

    let moved = repo.move_to(&db, &t.c, Some(&x.id)).await?;
    assert_eq!(moved.parent_id, Some(x.id));

    let ancestors = repo.ancestors(&db, &t.d, Traversal::new()).await?;
    assert_eq!(names(&ancestors), vec!["c", "x"]);
    assert_eq!(repo.depth_of(&db, &t.d).await?, 2);
    let untouched = repo.ancestors(&db, &t.b, Traversal::new()).await?;
    assert_eq!(names(&untouched), vec!["a"]);
    assert!(repo.is_ancestor_of(&db, &x, &t.d).await?);
    assert!(!repo.is_ancestor_of(&db, &t.a, &t.d).await?);

    assert!(matches!(
        repo.distance_between(&db, &t.a, &t.d).await,
        Err(ClosureTableError::NoCommonAncestor)
    ));
    assert!(!repo.has_common_ancestor(&db, &t.b, &t.c).await?);
    assert!(repo.verify(&db).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn moving_to_root_detaches_from_every_ancestor() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    let c = repo.move_to(&db, &t.c, None).await?;
    assert!(repo.is_root(&c));
    assert_eq!(repo.depth_of(&db, &t.d).await?, 1);
    assert_eq!(names(&repo.roots(&db).await?), vec!["a", "c"]);
    assert!(repo.verify(&db).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn cyclic_moves_are_rejected_without_changes() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let before = closure_rows(&db).await?;

    let below = repo.move_to(&db, &t.b, Some(&t.d.id)).await;
    assert!(matches!(below, Err(ClosureTableError::Cycle { .. })));

    let itself = repo.move_to(&db, &t.b, Some(&t.b.id)).await;
    assert!(matches!(itself, Err(ClosureTableError::Cycle { .. })));
    assert!(itself.is_err_and(|err| err.is_structural()));

    assert_eq!(closure_rows(&db).await?, before);
    assert_eq!(reload(&db, &t.b).await?.parent_id, Some(t.a.id));
    Ok(())
}

#[tokio::test]
async fn moving_to_the_same_parent_changes_nothing() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let before = closure_rows(&db).await?;

    repo.move_to(&db, &t.c, Some(&t.b.id)).await?;
    assert_eq!(closure_rows(&db).await?, before);
    Ok(())
}

#[tokio::test]
async fn moving_to_a_missing_parent_fails() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let before = closure_rows(&db).await?;

    let result = repo.move_to(&db, &t.c, Some(&999)).await;
    assert!(matches!(result, Err(ClosureTableError::NodeNotFound { .. })));
    assert_eq!(closure_rows(&db).await?, before);
    Ok(())
}

#[tokio::test]
async fn leaf_deletion_drops_its_rows() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    repo.delete_leaf(&db, &t.d).await?;
    assert_eq!(ClosureStore::<common::Node>::new().count_rows(&db).await?, 6);
    assert!(repo.find(&db, &t.d.id).await?.is_none());
    assert!(repo.is_leaf(&db, &reload(&db, &t.c).await?).await?);
    Ok(())
}

#[tokio::test]
async fn deleting_a_node_with_children_is_refused() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    let result = repo.delete_leaf(&db, &t.b).await;
    assert!(matches!(result, Err(ClosureTableError::HasChildren { .. })));

    // Restrict is the default delete mode.
    let result = repo.destroy(&db, &t.b).await;
    assert!(matches!(result, Err(ClosureTableError::HasChildren { .. })));

    assert_eq!(closure_rows(&db).await?.len(), 10);
    assert!(repo.find(&db, &t.b.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn subtree_deletion_removes_nodes_and_rows() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    assert_eq!(repo.delete_subtree(&db, &t.b).await?, 3);
    assert_eq!(closure_rows(&db).await?, vec![(t.a.id, t.a.id, 0)]);
    for gone in [&t.b, &t.c, &t.d] {
        assert!(repo.find(&db, &gone.id).await?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn promoting_children_keeps_the_rest_of_the_tree() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    repo.delete_node(&db, &t.b).await?;

    let c = reload(&db, &t.c).await?;
    assert_eq!(c.parent_id, Some(t.a.id));
    assert_eq!(repo.depth_of(&db, &t.d).await?, 2);
    let (a, c, d) = (t.a.id, t.c.id, t.d.id);
    assert_eq!(
        closure_rows(&db).await?,
        vec![(a, a, 0), (a, c, 1), (a, d, 2), (c, c, 0), (c, d, 1), (d, d, 0)]
    );
    Ok(())
}

#[tokio::test]
async fn promoting_children_of_a_root_makes_them_roots() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let a = add(&repo, &db, "a", None).await?;
    add(&repo, &db, "b", Some(&a)).await?;
    add(&repo, &db, "c", Some(&a)).await?;

    repo.delete_node(&db, &a).await?;
    assert_eq!(names(&repo.roots(&db).await?), vec!["b", "c"]);
    assert_eq!(closure_rows(&db).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn inserting_under_a_missing_parent_persists_nothing() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let ghost = common::Node {
        id: 42,
        parent_id: None,
        name: "ghost".to_owned(),
    };

    let result = add(&repo, &db, "orphan", Some(&ghost)).await;
    assert!(matches!(result, Err(ClosureTableError::NodeNotFound { .. })));
    assert!(repo.roots(&db).await?.is_empty());
    assert!(closure_rows(&db).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn rebuild_matches_incremental_maintenance() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let x = add(&repo, &db, "x", None).await?;
    let y = add(&repo, &db, "y", Some(&x)).await?;
    add(&repo, &db, "z", Some(&t.b)).await?;
    repo.move_to(&db, &t.c, Some(&y.id)).await?;
    repo.delete_node(&db, &y).await?;

    let incremental = closure_rows(&db).await?.into_iter().collect::<HashSet<_>>();
    let report = repo.rebuild(&db).await?;
    let rebuilt = closure_rows(&db).await?.into_iter().collect::<HashSet<_>>();

    assert_eq!(rebuilt, incremental);
    assert_eq!(report.cleared, incremental.len() as u64);
    assert_eq!(report.inserted, incremental.len() as u64);
    assert_eq!(report.max_depth, 2);
    Ok(())
}

#[tokio::test]
async fn rebuild_repairs_a_corrupted_table() -> TestResult {
    use common::entity::node_closure;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;

    node_closure::Entity::delete_many()
        .filter(node_closure::Column::AncestorId.eq(t.a.id))
        .filter(node_closure::Column::DescendantId.eq(t.d.id))
        .exec(&db)
        .await?;

    let report = repo.verify(&db).await?;
    assert!(!report.is_consistent());
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].ancestor_id, t.a.id);
    assert_eq!(report.missing[0].depth, 3);
    assert!(!report.missing[0].is_self_row());
    assert!(report.unexpected.is_empty());

    repo.rebuild(&db).await?;
    assert!(repo.verify(&db).await?.is_consistent());
    assert_eq!(closure_rows(&db).await?.len(), 10);
    Ok(())
}

#[tokio::test]
async fn rebuilding_an_empty_table_is_a_no_op() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();

    let report = repo.rebuild(&db).await?;
    assert_eq!(report.inserted, 0);
    assert_eq!(report.max_depth, 0);
    assert_eq!(repo.tree_depth(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn structural_predicates() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let root = add(&repo, &db, "root", None).await?;
    let left = add(&repo, &db, "left", Some(&root)).await?;
    let right = add(&repo, &db, "right", Some(&root)).await?;
    let leaf = add(&repo, &db, "leaf", Some(&left)).await?;

    assert!(repo.is_root(&root));
    assert!(!repo.is_root(&left));
    assert!(repo.is_child_of(&left, &root));
    assert!(!repo.is_child_of(&leaf, &root));
    assert!(repo.is_sibling_of(&left, &right));
    assert!(!repo.is_sibling_of(&left, &left));
    assert!(repo.is_descendant_of(&db, &leaf, &root).await?);
    assert!(!repo.is_descendant_of(&db, &root, &leaf).await?);
    assert!(!repo.is_ancestor_of(&db, &leaf, &leaf).await?);
    assert!(repo.is_leaf(&db, &right).await?);
    assert!(!repo.is_leaf(&db, &left).await?);

    assert_eq!(names(&repo.children(&db, &root).await?), vec!["left", "right"]);
    assert_eq!(names(&repo.siblings(&db, &left).await?), vec!["right"]);
    let parent = repo.parent(&db, &leaf).await?;
    assert_eq!(parent.map(|node| node.name), Some("left".to_owned()));
    assert!(repo.parent(&db, &root).await?.is_none());

    let mut leaves = names(&repo.leaves(&db).await?)
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    leaves.sort();
    assert_eq!(leaves, vec!["leaf", "right"]);
    Ok(())
}

#[tokio::test]
async fn rebuild_reports_a_loop_in_the_parent_pointers() -> TestResult {
    use common::entity::node::{Column, Entity};
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    let db = setup().await?;
    let repo = Repo::new();
    let a = add(&repo, &db, "a", None).await?;
    let b = add(&repo, &db, "b", Some(&a)).await?;
    let c = add(&repo, &db, "c", Some(&b)).await?;
    let before = closure_rows(&db).await?;

    Entity::update_many()
        .col_expr(Column::ParentId, Expr::value(b.id))
        .filter(Column::Id.eq(a.id))
        .exec(&db)
        .await?;

    let result = repo.rebuild(&db).await;
    assert!(matches!(result, Err(ClosureTableError::Invariant(_))));
    assert_eq!(closure_rows(&db).await?, before);

    let report = repo.verify(&db).await?;
    let mut cycles = report.cycles.clone();
    cycles.sort_unstable();
    // c hangs below the loop, so its ancestor chain never ends either.
    assert_eq!(cycles, vec![a.id, b.id, c.id]);
    Ok(())
}

#[tokio::test]
async fn rebuild_reports_a_node_that_is_its_own_parent() -> TestResult {
    use common::entity::node::{Column, Entity};
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    let db = setup().await?;
    let repo = Repo::new();
    let a = add(&repo, &db, "a", None).await?;

    Entity::update_many()
        .col_expr(Column::ParentId, Expr::value(a.id))
        .filter(Column::Id.eq(a.id))
        .exec(&db)
        .await?;

    let result = repo.rebuild(&db).await;
    assert!(matches!(result, Err(ClosureTableError::Invariant(_))));
    Ok(())
}

#[tokio::test]
async fn repeating_a_move_yields_the_same_rows() -> TestResult {
    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let x = add(&repo, &db, "x", None).await?;

    repo.move_to(&db, &t.c, Some(&x.id)).await?;
    let once = closure_rows(&db).await?;
    repo.move_to(&db, &reload(&db, &t.c).await?, Some(&x.id)).await?;
    assert_eq!(closure_rows(&db).await?, once);

    assert!(once.contains(&(x.id, t.d.id, 2)));
    assert!(!once.iter().any(|&(anc, desc, _)| anc == t.a.id && desc == t.d.id));
    Ok(())
}

#[tokio::test]
async fn reattaching_twice_through_the_maintainer_is_idempotent() -> TestResult {
    use common::entity::node::{Column, Entity};
    use sea_orm::sea_query::Expr;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};

    let db = setup().await?;
    let repo = Repo::new();
    let t = chain(&repo, &db).await?;
    let x = add(&repo, &db, "x", None).await?;
    let maintainer = repo.maintainer();

    let txn = db.begin().await?;
    maintainer.before_save(&txn, Some(&t.c.id), Some(&x.id)).await?;
    Entity::update_many()
        .col_expr(Column::ParentId, Expr::value(x.id))
        .filter(Column::Id.eq(t.c.id))
        .exec(&txn)
        .await?;

    let first = maintainer
        .on_parent_changed(&txn, &t.c.id, Some(&t.b.id), Some(&x.id))
        .await?;
    let once = closure_rows(&txn).await?;
    let second = maintainer
        .on_parent_changed(&txn, &t.c.id, Some(&t.b.id), Some(&x.id))
        .await?;
    assert_eq!(closure_rows(&txn).await?, once);

    // c and d each lose their links to a and b.
    assert_eq!(first.detached, 4);
    assert_eq!(first.attached, 2);
    assert_eq!(second.detached, 2);
    assert_eq!(second.attached, 2);
    txn.commit().await?;

    assert!(repo.verify(&db).await?.is_consistent());
    Ok(())
}
