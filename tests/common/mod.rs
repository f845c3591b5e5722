#![allow(dead_code)]

use closure_table::{closure_table_statements, ClosureTreeRepository};
use sea_orm::{
    ActiveValue::Set, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, QueryOrder, Schema,
};

pub mod entity {
    pub mod node {
        use closure_table::TreeNodeDerive as TreeNode;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, TreeNode)]
        #[sea_orm(table_name = "nodes")]
        #[tree_node(closure_module = "crate::common::entity::node_closure")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub parent_id: Option<i32>,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod node_closure {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "nodes_closures")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub ancestor_id: i32,
            #[sea_orm(primary_key, auto_increment = false)]
            pub descendant_id: i32,
            pub depth: i32,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

pub use entity::node::Model as Node;

pub type Repo = ClosureTreeRepository<Node>;

/// Fresh in-memory database holding both tables. One pooled connection keeps
/// every statement on the same in-memory database.
pub async fn setup() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    let backend = DbBackend::Sqlite;
    let create_nodes = Schema::new(backend)
        .create_table_from_entity(entity::node::Entity)
        .to_owned();
    db.execute(backend.build(&create_nodes)).await?;

    for statement in closure_table_statements::<Node>(backend) {
        db.execute(statement).await?;
    }
    Ok(db)
}

pub async fn add(
    repo: &Repo,
    db: &DatabaseConnection,
    name: &str,
    parent: Option<&Node>,
) -> Result<Node, closure_table::ClosureTableError> {
    let active = entity::node::ActiveModel {
        name: Set(name.to_owned()),
        ..Default::default()
    };
    repo.insert_child(db, parent.map(|node| node.id).as_ref(), active)
        .await
}

/// `a -> b -> c -> d`
pub struct Chain {
    pub a: Node,
    pub b: Node,
    pub c: Node,
    pub d: Node,
}

pub async fn chain(repo: &Repo, db: &DatabaseConnection) -> Result<Chain, Box<dyn std::error::Error>> {
    let a = add(repo, db, "a", None).await?;
    let b = add(repo, db, "b", Some(&a)).await?;
    let c = add(repo, db, "c", Some(&b)).await?;
    let d = add(repo, db, "d", Some(&c)).await?;
    Ok(Chain { a, b, c, d })
}

/// Every closure row as `(ancestor, descendant, depth)`, sorted.
pub async fn closure_rows<C: ConnectionTrait>(db: &C) -> Result<Vec<(i32, i32, i32)>, DbErr> {
    use entity::node_closure::{Column, Entity};

    Ok(Entity::find()
        .order_by_asc(Column::AncestorId)
        .order_by_asc(Column::DescendantId)
        .all(db)
        .await?
        .into_iter()
        .map(|row| (row.ancestor_id, row.descendant_id, row.depth))
        .collect())
}

pub fn names(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|node| node.name.as_str()).collect()
}

pub async fn reload(db: &DatabaseConnection, node: &Node) -> Result<Node, DbErr> {
    entity::node::Entity::find_by_id(node.id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("node {}", node.id)))
}
