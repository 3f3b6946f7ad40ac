use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// alpha 来自哪个模板、哪组参数
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "alpha_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub alpha_id: String,
    pub template_id: String,
    pub template: Option<String>,
    pub params: Option<String>, // JSON object
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
