use super::CheckStatus;
use crate::remote::{AlphaMetrics, CallError, CheckReply, RemoteJobClient, Resilient};
use crate::storage::repository::{AlphaPatch, AlphaRepository};
use async_trait::async_trait;
use log::{debug, error, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// 对单个 alpha 发起一次检查，返回这一次观察到的状态
#[async_trait]
pub trait CheckProbe: Send + Sync {
    async fn probe(&self, alpha_id: &str) -> CheckStatus;
}

/// 检查结论：出现 ALREADY_SUBMITTED 记为 Active，任一项 FAIL 记为 Fail，否则 Pass
pub fn verdict(reply: &CheckReply) -> CheckStatus {
    if reply.checks.iter().any(|c| c.name == "ALREADY_SUBMITTED") {
        return CheckStatus::Active;
    }
    if reply.checks.iter().any(|c| c.result.eq_ignore_ascii_case("FAIL")) {
        CheckStatus::Fail
    } else {
        CheckStatus::Pass
    }
}

/// 把检查项里的数值写到对应的指标上，没有出现的保持原值
pub fn apply_check_values(metrics: &mut AlphaMetrics, reply: &CheckReply) {
    let slots: [(&str, &mut Option<f64>); 6] = [
        ("LOW_SHARPE", &mut metrics.sharpe),
        ("LOW_FITNESS", &mut metrics.fitness),
        ("LOW_TURNOVER", &mut metrics.turnover),
        ("LOW_SUB_UNIVERSE_SHARPE", &mut metrics.sub_universe_sharpe),
        ("CONCENTRATED_WEIGHT", &mut metrics.concentrated_weight),
        ("SELF_CORRELATION", &mut metrics.self_correlation),
    ];
    for (name, slot) in slots {
        if let Some(v) = reply.value_of(name) {
            *slot = Some(v);
        }
    }
}

/// 调用平台检查接口的探针，结果写回 alphas 表
pub struct RemoteCheckProbe {
    client: Arc<dyn RemoteJobClient>,
    resilient: Resilient,
    db: DatabaseConnection,
}

impl RemoteCheckProbe {
    pub fn new(client: Arc<dyn RemoteJobClient>, resilient: Resilient, db: DatabaseConnection) -> Self {
        Self {
            client,
            resilient,
            db,
        }
    }

    async fn record_verdict(&self, alpha_id: &str, reply: &CheckReply) -> CheckStatus {
        let status = verdict(reply);

        // 检查接口不带 IS 指标，再取一次 alpha 详情
        let mut patch = match self
            .resilient
            .call("获取 alpha 详情", || self.client.fetch_result(alpha_id))
            .await
        {
            Ok(record) => AlphaPatch::from_record(&record),
            Err(e) => {
                warn!("⚠ [{}] 获取详情失败，只记录检查值: {}", alpha_id, e);
                AlphaPatch::new(alpha_id)
            }
        };
        apply_check_values(&mut patch.metrics, reply);
        patch.status = Some(status);

        if let Err(e) = AlphaRepository::upsert(&self.db, &patch).await {
            error!("✗ [{}] 保存检查结果失败: {}", alpha_id, e);
            return CheckStatus::Error;
        }
        status
    }

    async fn record_transient(&self, alpha_id: &str, status: CheckStatus) -> CheckStatus {
        if let Err(e) = AlphaRepository::set_status(&self.db, alpha_id, status).await {
            warn!("⚠ [{}] 更新状态失败: {}", alpha_id, e);
        }
        status
    }
}

#[async_trait]
impl CheckProbe for RemoteCheckProbe {
    async fn probe(&self, alpha_id: &str) -> CheckStatus {
        let seen = self.resilient.session().generation();
        match self.client.run_check(alpha_id).await {
            Ok(reply) if reply.ready => self.record_verdict(alpha_id, &reply).await,
            Ok(_) => {
                debug!("[{}] 检查结果尚未就绪", alpha_id);
                self.record_transient(alpha_id, CheckStatus::Pending).await
            }
            Err(CallError::RateLimited) => self.record_transient(alpha_id, CheckStatus::Waiting).await,
            Err(CallError::Unauthorized) => {
                warn!("⚠ [{}] 检查时会话过期，续期", alpha_id);
                self.resilient.session().renew(seen).await;
                self.record_transient(alpha_id, CheckStatus::Expired).await
            }
            Err(e) => {
                warn!("✗ [{}] 检查失败: {}", alpha_id, e);
                self.record_transient(alpha_id, CheckStatus::Error).await
            }
        }
    }
}
