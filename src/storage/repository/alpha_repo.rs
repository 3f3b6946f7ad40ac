use crate::check::CheckStatus;
use crate::remote::{AlphaMetrics, AlphaRecord};
use crate::simulate::model::{AlphaType, SimulationSettings};
use crate::storage::entity::alpha::{
    self, ActiveModel as AlphaActiveModel, Entity as Alpha, Model as AlphaModel,
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect,
};

/// 对 alphas 表的一次部分更新；None 的字段不会覆盖已有值
#[derive(Debug, Clone, Default)]
pub struct AlphaPatch {
    pub alpha_id: String,
    pub alpha_type: Option<AlphaType>,
    pub expression: Option<String>,
    pub settings: Option<SimulationSettings>,
    pub status: Option<CheckStatus>,
    pub metrics: AlphaMetrics,
    pub date_created: Option<String>,
}

impl AlphaPatch {
    pub fn new(alpha_id: impl Into<String>) -> Self {
        Self {
            alpha_id: alpha_id.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CheckStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// 从平台记录构造；平台状态 ACTIVE 记为 Active，其余视为 Pending
    pub fn from_record(record: &AlphaRecord) -> Self {
        let status = match record.platform_status.as_deref() {
            Some("ACTIVE") => CheckStatus::Active,
            _ => CheckStatus::Pending,
        };
        Self {
            alpha_id: record.alpha_id.clone(),
            alpha_type: Some(record.alpha_type),
            expression: Some(record.expression.clone()).filter(|e| !e.is_empty()),
            settings: Some(record.settings.clone()),
            status: Some(status),
            metrics: record.metrics.clone(),
            date_created: record.date_created.clone(),
        }
    }
}

macro_rules! patch_column {
    ($am:ident, $cols:ident, $field:ident, $col:ident, $val:expr) => {
        if let Some(v) = $val {
            $am.$field = Set(Some(v));
            $cols.push(alpha::Column::$col);
        }
    };
}

pub struct AlphaRepository;

impl AlphaRepository {
    /// 按 alpha_id upsert（INSERT ... ON CONFLICT DO UPDATE，单条语句保证原子）
    pub async fn upsert<C: ConnectionTrait>(db: &C, patch: &AlphaPatch) -> Result<(), DbErr> {
        Self::upsert_with(db, patch, true).await
    }

    /// `refresh_status = false` 时状态只在插入时写入，已有记录的状态保持不变
    pub async fn upsert_with<C: ConnectionTrait>(
        db: &C,
        patch: &AlphaPatch,
        refresh_status: bool,
    ) -> Result<(), DbErr> {
        let now = Utc::now().timestamp();
        let mut am = AlphaActiveModel {
            alpha_id: Set(patch.alpha_id.clone()),
            alpha_type: Set(patch.alpha_type.unwrap_or_default().as_str().to_string()),
            expression: Set(patch.expression.clone().unwrap_or_default()),
            status: Set(patch
                .status
                .unwrap_or(CheckStatus::Pending)
                .as_str()
                .to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let mut cols = vec![alpha::Column::UpdatedAt];
        if patch.alpha_type.is_some() {
            cols.push(alpha::Column::AlphaType);
        }
        if patch.expression.is_some() {
            cols.push(alpha::Column::Expression);
        }
        if patch.status.is_some() && refresh_status {
            cols.push(alpha::Column::Status);
        }

        if let Some(s) = &patch.settings {
            patch_column!(am, cols, instrument_type, InstrumentType, s.instrument_type.clone());
            patch_column!(am, cols, region, Region, s.region.clone());
            patch_column!(am, cols, universe, Universe, s.universe.clone());
            patch_column!(am, cols, delay, Delay, s.delay);
            patch_column!(am, cols, decay, Decay, s.decay);
            patch_column!(am, cols, neutralization, Neutralization, s.neutralization.clone());
            patch_column!(am, cols, truncation, Truncation, s.truncation);
            patch_column!(am, cols, pasteurization, Pasteurization, s.pasteurization.clone());
            patch_column!(am, cols, unit_handling, UnitHandling, s.unit_handling.clone());
            patch_column!(am, cols, nan_handling, NanHandling, s.nan_handling.clone());
            patch_column!(am, cols, max_trade, MaxTrade, s.max_trade.clone());
            patch_column!(am, cols, language, Language, s.language.clone());
            patch_column!(am, cols, visualization, Visualization, s.visualization);
        }

        let m = &patch.metrics;
        patch_column!(am, cols, sharpe, Sharpe, m.sharpe);
        patch_column!(am, cols, fitness, Fitness, m.fitness);
        patch_column!(am, cols, turnover, Turnover, m.turnover);
        patch_column!(am, cols, drawdown, Drawdown, m.drawdown);
        patch_column!(am, cols, long_count, LongCount, m.long_count);
        patch_column!(am, cols, short_count, ShortCount, m.short_count);
        patch_column!(am, cols, returns, Returns, m.returns);
        patch_column!(am, cols, margin, Margin, m.margin);
        patch_column!(am, cols, pnl, Pnl, m.pnl);
        patch_column!(am, cols, concentrated_weight, ConcentratedWeight, m.concentrated_weight);
        patch_column!(am, cols, self_correlation, SelfCorrelation, m.self_correlation);
        patch_column!(am, cols, sub_universe_sharpe, SubUniverseSharpe, m.sub_universe_sharpe);
        patch_column!(am, cols, date_created, DateCreated, patch.date_created.clone());

        Alpha::insert(am)
            .on_conflict(
                OnConflict::column(alpha::Column::AlphaId)
                    .update_columns(cols)
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    pub async fn get<C: ConnectionTrait>(db: &C, alpha_id: &str) -> Result<Option<AlphaModel>, DbErr> {
        Alpha::find_by_id(alpha_id.to_string()).one(db).await
    }

    pub async fn set_status<C: ConnectionTrait>(
        db: &C,
        alpha_id: &str,
        status: CheckStatus,
    ) -> Result<u64, DbErr> {
        let res = Alpha::update_many()
            .col_expr(alpha::Column::Status, Expr::value(status.as_str()))
            .col_expr(alpha::Column::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(alpha::Column::AlphaId.eq(alpha_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// 指定状态的记录，按创建时间升序
    pub async fn list_by_status<C: ConnectionTrait>(
        db: &C,
        statuses: &[CheckStatus],
        limit: Option<u64>,
    ) -> Result<Vec<AlphaModel>, DbErr> {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let mut query = Alpha::find()
            .filter(alpha::Column::Status.is_in(names))
            .order_by_asc(alpha::Column::CreatedAt)
            .order_by_asc(alpha::Column::AlphaId);
        if let Some(l) = limit {
            query = query.limit(l);
        }
        query.all(db).await
    }

    /// 通过检查的记录，按给定列排序（空值排最后）
    pub async fn list_pass_ordered<C: ConnectionTrait>(
        db: &C,
        column: alpha::Column,
        order: Order,
    ) -> Result<Vec<AlphaModel>, DbErr> {
        Alpha::find()
            .filter(alpha::Column::Status.eq(CheckStatus::Pass.as_str()))
            .order_by(Expr::col(column).is_null(), Order::Asc)
            .order_by(column, order)
            .order_by_asc(alpha::Column::AlphaId)
            .all(db)
            .await
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, alpha_id: &str) -> Result<u64, DbErr> {
        let res = Alpha::delete_by_id(alpha_id.to_string()).exec(db).await?;
        Ok(res.rows_affected)
    }

    pub async fn count_by_status<C: ConnectionTrait>(
        db: &C,
        status: CheckStatus,
    ) -> Result<u64, DbErr> {
        use sea_orm::PaginatorTrait;
        Alpha::find()
            .filter(alpha::Column::Status.eq(status.as_str()))
            .count(db)
            .await
    }
}
