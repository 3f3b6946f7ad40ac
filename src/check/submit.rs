use super::scheduler::CheckScheduler;
use super::CheckStatus;
use crate::remote::{CallError, RemoteJobClient, Resilient};
use crate::storage::entity::alpha;
use crate::storage::repository::AlphaRepository;
use anyhow::{Context, Result};
use log::{info, warn};
use sea_orm::{DatabaseConnection, Order};
use std::sync::Arc;

/// 403 响应体里的检查项是否为 ALREADY_SUBMITTED
fn already_submitted(body: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(v) => v
            .pointer("/is/checks")
            .and_then(|c| c.as_array())
            .is_some_and(|checks| {
                checks
                    .iter()
                    .any(|c| c.get("name").and_then(|n| n.as_str()) == Some("ALREADY_SUBMITTED"))
            }),
        Err(_) => body.contains("ALREADY_SUBMITTED"),
    }
}

/// 最终提交：先检查，通过后再提交
pub struct Submitter {
    client: Arc<dyn RemoteJobClient>,
    resilient: Resilient,
    scheduler: Arc<CheckScheduler>,
    db: DatabaseConnection,
}

impl Submitter {
    pub fn new(
        client: Arc<dyn RemoteJobClient>,
        resilient: Resilient,
        scheduler: Arc<CheckScheduler>,
        db: DatabaseConnection,
    ) -> Self {
        Self {
            client,
            resilient,
            scheduler,
            db,
        }
    }

    /// 返回提交后的状态；未通过检查时返回检查结论，不发起提交
    pub async fn submit_one(&self, alpha_id: &str) -> Result<CheckStatus> {
        let checked = self.scheduler.check_one(alpha_id).await;
        if checked != CheckStatus::Pass {
            warn!("⚠ [{}] 检查结论为 {}，跳过提交", alpha_id, checked);
            return Ok(checked);
        }

        info!("▶ [{}] 提交中...", alpha_id);
        let status = match self
            .resilient
            .call("最终提交", || self.client.submit_final(alpha_id))
            .await
        {
            Ok(()) => CheckStatus::Submitted,
            Err(CallError::Status { code: 403, body }) if already_submitted(&body) => {
                CheckStatus::Active
            }
            Err(CallError::Status { code: 400 | 403, body }) => {
                warn!("✗ [{}] 提交被拒绝: {}", alpha_id, body);
                CheckStatus::Fail
            }
            Err(e) => {
                return Err(e).with_context(|| format!("提交 alpha {} 失败", alpha_id));
            }
        };

        AlphaRepository::set_status(&self.db, alpha_id, status)
            .await
            .with_context(|| format!("保存 alpha {} 的提交状态失败", alpha_id))?;
        match status {
            CheckStatus::Submitted => info!("✓ [{}] 提交成功", alpha_id),
            other => info!("[{}] 提交结果: {}", alpha_id, other),
        }
        Ok(status)
    }

    /// 按排序依次提交 Pass 记录，直到成功 `count` 个
    pub async fn submit_best(
        &self,
        count: usize,
        column: alpha::Column,
        order: Order,
    ) -> Result<Vec<(String, CheckStatus)>> {
        let candidates = AlphaRepository::list_pass_ordered(&self.db, column, order)
            .await
            .context("读取待提交 alpha 失败")?;
        info!("▶ 共 {} 个 PASS 记录，目标提交 {} 个", candidates.len(), count);

        let mut results = Vec::new();
        let mut submitted = 0usize;
        for row in candidates {
            if submitted >= count {
                break;
            }
            let status = match self.submit_one(&row.alpha_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("✗ {:#}", e);
                    continue;
                }
            };
            if status == CheckStatus::Submitted {
                submitted += 1;
            }
            results.push((row.alpha_id, status));
        }
        if submitted < count {
            warn!("⚠ 只成功提交了 {}/{} 个", submitted, count);
        }
        Ok(results)
    }
}
