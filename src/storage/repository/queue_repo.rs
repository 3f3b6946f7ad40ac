use crate::simulate::model::{AlphaType, JobCandidate, QueuedCandidate, SimulationSettings};
use crate::storage::entity::queue_item::{
    self, ActiveModel as QueueActiveModel, Entity as QueueItem, Model as QueueModel,
};
use chrono::Utc;
use log::warn;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 批量入队方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueMode {
    /// 先删除同模板的已有行
    Replace,
    Append,
}

static CLAIM_SEQ: AtomicU64 = AtomicU64::new(0);

/// 每次 claim 唯一的标记
fn claim_token(worker: &str) -> String {
    format!(
        "{}:{}:{}:{:08x}",
        worker,
        std::process::id(),
        CLAIM_SEQ.fetch_add(1, Ordering::SeqCst),
        rand::random::<u32>()
    )
}

fn to_active(c: &JobCandidate, now: i64) -> Result<QueueActiveModel, DbErr> {
    let settings =
        serde_json::to_string(&c.settings).map_err(|e| DbErr::Custom(e.to_string()))?;
    let params = c
        .generation_params
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DbErr::Custom(e.to_string()))?;
    Ok(QueueActiveModel {
        expression: Set(c.expression.clone()),
        settings: Set(settings),
        alpha_type: Set(c.alpha_type.as_str().to_string()),
        template_id: Set(c.template_id.clone()),
        template: Set(c.template_source.clone()),
        params: Set(params),
        claimed_by: Set(None),
        claimed_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    })
}

/// 队列行 -> 候选；损坏的行返回错误信息
pub fn candidate_from_row(row: &QueueModel) -> Result<QueuedCandidate, String> {
    let settings: SimulationSettings = serde_json::from_str(&row.settings)
        .map_err(|e| format!("settings 解析失败: {}", e))?;
    let alpha_type = AlphaType::parse(&row.alpha_type)
        .ok_or_else(|| format!("未知的 alpha 类型: {}", row.alpha_type))?;
    let generation_params = match &row.params {
        Some(p) if !p.trim().is_empty() => Some(
            serde_json::from_str::<BTreeMap<String, String>>(p)
                .map_err(|e| format!("params 解析失败: {}", e))?,
        ),
        _ => None,
    };
    if row.expression.trim().is_empty() {
        return Err("表达式为空".to_string());
    }
    Ok(QueuedCandidate {
        id: row.id,
        candidate: JobCandidate {
            expression: row.expression.clone(),
            settings,
            alpha_type,
            template_id: row.template_id.clone(),
            template_source: row.template.clone(),
            generation_params,
        },
    })
}

pub struct QueueRepository;

impl QueueRepository {
    pub async fn enqueue<C: ConnectionTrait>(db: &C, candidate: &JobCandidate) -> Result<i32, DbErr> {
        let now = Utc::now().timestamp();
        let model = to_active(candidate, now)?.insert(db).await?;
        Ok(model.id)
    }

    /// 批量入队；Replace 模式在同一事务内先删除同模板的旧行
    ///
    /// 返回 (删除行数, 插入行数)
    pub async fn enqueue_batch(
        db: &DatabaseConnection,
        candidates: &[JobCandidate],
        template_id: &str,
        mode: EnqueueMode,
    ) -> Result<(u64, usize), DbErr> {
        let now = Utc::now().timestamp();
        let txn = db.begin().await?;

        let removed = match mode {
            EnqueueMode::Replace => Self::delete_by_template(&txn, template_id).await?,
            EnqueueMode::Append => 0,
        };

        // SQLite 单条语句的参数个数有限，分块插入
        for chunk in candidates.chunks(100) {
            let models = chunk
                .iter()
                .map(|c| to_active(c, now))
                .collect::<Result<Vec<_>, _>>()?;
            QueueItem::insert_many(models).exec_without_returning(&txn).await?;
        }

        txn.commit().await?;
        Ok((removed, candidates.len()))
    }

    /// 认领一批候选（按入队顺序）
    ///
    /// 只有未被认领、或认领已超过 `lease` 的行可以被认领。认领通过带条件的
    /// UPDATE 写入唯一标记，再按标记读回，同一行不会交给两个调用方。
    pub async fn dequeue_batch<C: ConnectionTrait>(
        db: &C,
        max_count: u64,
        template_filter: Option<&str>,
        worker: &str,
        lease: Duration,
    ) -> Result<Vec<QueuedCandidate>, DbErr> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now().timestamp();
        let stale_before = now - lease.as_secs() as i64;
        let claimable = Condition::any()
            .add(queue_item::Column::ClaimedAt.is_null())
            .add(queue_item::Column::ClaimedAt.lt(stale_before));

        let mut query = QueueItem::find()
            .select_only()
            .column(queue_item::Column::Id)
            .filter(claimable.clone())
            .order_by_asc(queue_item::Column::Id)
            .limit(max_count);
        if let Some(t) = template_filter {
            query = query.filter(queue_item::Column::TemplateId.eq(t));
        }
        let ids: Vec<i32> = query.into_tuple().all(db).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let token = claim_token(worker);
        QueueItem::update_many()
            .col_expr(queue_item::Column::ClaimedBy, Expr::value(token.clone()))
            .col_expr(queue_item::Column::ClaimedAt, Expr::value(now))
            .filter(queue_item::Column::Id.is_in(ids))
            .filter(claimable)
            .exec(db)
            .await?;

        let rows = QueueItem::find()
            .filter(queue_item::Column::ClaimedBy.eq(token))
            .order_by_asc(queue_item::Column::Id)
            .all(db)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match candidate_from_row(&row) {
                Ok(c) => out.push(c),
                Err(reason) => {
                    warn!("✗ 队列行 [{}] 无法解析，已移除: {}", row.id, reason);
                    Self::delete(db, row.id).await?;
                }
            }
        }
        Ok(out)
    }

    /// 放弃认领，行留在队列中等待下一轮
    pub async fn release<C: ConnectionTrait>(db: &C, id: i32) -> Result<u64, DbErr> {
        let res = QueueItem::update_many()
            .col_expr(queue_item::Column::ClaimedBy, Expr::value(Option::<String>::None))
            .col_expr(queue_item::Column::ClaimedAt, Expr::value(Option::<i64>::None))
            .filter(queue_item::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: i32) -> Result<u64, DbErr> {
        let res = QueueItem::delete_by_id(id).exec(db).await?;
        Ok(res.rows_affected)
    }

    pub async fn delete_by_template<C: ConnectionTrait>(
        db: &C,
        template_id: &str,
    ) -> Result<u64, DbErr> {
        let res = QueueItem::delete_many()
            .filter(queue_item::Column::TemplateId.eq(template_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn count<C: ConnectionTrait>(db: &C, template_filter: Option<&str>) -> Result<u64, DbErr> {
        let mut query = QueueItem::find();
        if let Some(t) = template_filter {
            query = query.filter(queue_item::Column::TemplateId.eq(t));
        }
        query.count(db).await
    }

    /// 启动时清除所有认领（上次进程崩溃时留下的行重新可见）
    pub async fn recover<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
        let res = QueueItem::update_many()
            .col_expr(queue_item::Column::ClaimedBy, Expr::value(Option::<String>::None))
            .col_expr(queue_item::Column::ClaimedAt, Expr::value(Option::<i64>::None))
            .filter(queue_item::Column::ClaimedAt.is_not_null())
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn list<C: ConnectionTrait>(
        db: &C,
        template_filter: Option<&str>,
    ) -> Result<Vec<QueueModel>, DbErr> {
        let mut query = QueueItem::find().order_by_asc(queue_item::Column::Id);
        if let Some(t) = template_filter {
            query = query.filter(queue_item::Column::TemplateId.eq(t));
        }
        query.all(db).await
    }
}
