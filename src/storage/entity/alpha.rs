use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alphas")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub alpha_id: String,
    pub alpha_type: String,
    pub expression: String,

    // 回测参数
    pub instrument_type: Option<String>,
    pub region: Option<String>,
    pub universe: Option<String>,
    pub delay: Option<i32>,
    pub decay: Option<i32>,
    pub neutralization: Option<String>,
    pub truncation: Option<f64>,
    pub pasteurization: Option<String>,
    pub unit_handling: Option<String>,
    pub nan_handling: Option<String>,
    pub max_trade: Option<String>,
    pub language: Option<String>,
    pub visualization: Option<bool>,

    pub status: String, // PENDING/WAITING/ERROR/EXPIRED/PASS/FAIL/ACTIVE/SUBMITTED

    // IS 指标
    pub sharpe: Option<f64>,
    pub fitness: Option<f64>,
    pub turnover: Option<f64>,
    pub drawdown: Option<f64>,
    pub long_count: Option<f64>,
    pub short_count: Option<f64>,
    pub returns: Option<f64>,
    pub margin: Option<f64>,
    pub pnl: Option<f64>,
    pub concentrated_weight: Option<f64>,
    pub self_correlation: Option<f64>,
    pub sub_universe_sharpe: Option<f64>,

    pub date_created: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 记录中保存的回测参数
    pub fn settings(&self) -> crate::simulate::model::SimulationSettings {
        crate::simulate::model::SimulationSettings {
            instrument_type: self.instrument_type.clone(),
            region: self.region.clone(),
            universe: self.universe.clone(),
            delay: self.delay,
            decay: self.decay,
            neutralization: self.neutralization.clone(),
            truncation: self.truncation,
            pasteurization: self.pasteurization.clone(),
            unit_handling: self.unit_handling.clone(),
            nan_handling: self.nan_handling.clone(),
            max_trade: self.max_trade.clone(),
            language: self.language.clone(),
            visualization: self.visualization,
        }
    }
}
