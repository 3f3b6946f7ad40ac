use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "alpha_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub expression: String,
    pub settings: String, // JSON
    pub alpha_type: String,
    pub template_id: Option<String>,
    pub template: Option<String>,
    pub params: Option<String>, // JSON object
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
