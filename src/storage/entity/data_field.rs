use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 字段目录；同一字段在不同 region/universe/delay 下各占一行
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_fields")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub field_id: String,
    pub description: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub category_id: String,
    pub category_name: String,
    pub subcategory_id: String,
    pub subcategory_name: String,
    pub region: String,
    pub universe: String,
    pub delay: i32,
    pub field_type: String, // VECTOR or MATRIX
    pub coverage: f64,
    pub user_count: i64,
    pub alpha_count: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
