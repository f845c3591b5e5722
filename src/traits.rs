use std::fmt::Debug;
use std::hash::Hash;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::config::ClosureTableConfig;

/// Trait implemented by SeaORM `Model` types whose rows form a forest
/// maintained through a closure table.
///
/// Implementations are normally provided by the `#[derive(TreeNode)]` macro.
pub trait TreeNode:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    type ClosureEntity: EntityTrait<Model = Self::ClosureModel>;
    type ClosureModel: Clone
        + Send
        + Sync
        + 'static
        + FromQueryResult
        + IntoActiveModel<Self::ClosureActiveModel>;
    type ClosureActiveModel: ActiveModelTrait<Entity = Self::ClosureEntity>
        + ActiveModelBehavior
        + Send;

    fn closure_table_config() -> &'static ClosureTableConfig;

    fn id(&self) -> Self::Id;
    fn parent_id(&self) -> Option<Self::Id>;
    fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>);
    fn id_to_value(id: &Self::Id) -> Value;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn parent_column() -> <Self::Entity as EntityTrait>::Column;

    fn closure_ancestor_column() -> <Self::ClosureEntity as EntityTrait>::Column;
    fn closure_descendant_column() -> <Self::ClosureEntity as EntityTrait>::Column;
    fn closure_depth_column() -> <Self::ClosureEntity as EntityTrait>::Column;

    fn closure_model_ancestor(model: &Self::ClosureModel) -> Self::Id;
    fn closure_model_descendant(model: &Self::ClosureModel) -> Self::Id;
    fn closure_model_depth(model: &Self::ClosureModel) -> i32;
    fn closure_build_row(
        ancestor: Self::Id,
        descendant: Self::Id,
        depth: i32,
    ) -> Self::ClosureActiveModel;
}
