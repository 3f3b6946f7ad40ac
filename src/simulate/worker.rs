use super::model::{Outcome, QueuedCandidate, SimulationError, SimulationErrorType};
use super::stats::PoolStats;
use crate::check::{CheckScheduler, CheckStatus, RetentionDecision, RetentionPolicy};
use crate::remote::{CallError, Progress, RemoteJobClient, Resilient, SubmitAccepted};
use crate::storage::repository::{AlphaPatch, AlphaRepository, TemplateRepository};
use log::{debug, error, info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Submit,
    Poll,
    Fetch,
}

/// 远程调用错误分型：提交阶段的 4xx 是表达式问题，其余 4xx 视为程序问题
fn classify(stage: Stage, err: CallError) -> SimulationError {
    match err {
        CallError::Status { code, body } if (400..500).contains(&code) => {
            if stage == Stage::Submit {
                SimulationError::alpha(format!("表达式不合法 ({}): {}", code, body))
            } else {
                SimulationError::internal(format!("{:?} 阶段返回 {}: {}", stage, code, body))
            }
        }
        CallError::Status { code, body } => {
            SimulationError::infra(format!("平台服务波动 ({}): {}", code, body))
        }
        CallError::Decode(msg) => SimulationError::internal(format!("响应结构异常: {}", msg)),
        other => SimulationError::infra(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub poll_interval: Duration,
    /// 表达式被拒绝时是否直接从队列移除
    pub drop_invalid: bool,
    pub retention: RetentionPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            drop_invalid: true,
            retention: RetentionPolicy::default(),
        }
    }
}

/// 单个候选的完整流程：提交 -> 轮询 -> 入库 -> 检查 -> 去留
pub struct Lifecycle {
    client: Arc<dyn RemoteJobClient>,
    resilient: Resilient,
    scheduler: Arc<CheckScheduler>,
    db: DatabaseConnection,
    stats: Arc<PoolStats>,
    config: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(
        client: Arc<dyn RemoteJobClient>,
        resilient: Resilient,
        scheduler: Arc<CheckScheduler>,
        db: DatabaseConnection,
        stats: Arc<PoolStats>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            client,
            resilient,
            scheduler,
            db,
            stats,
            config,
        }
    }

    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    pub async fn process(&self, job: &QueuedCandidate) -> Outcome {
        match self.run(job).await {
            Ok(outcome) => outcome,
            Err(err) => self.outcome_for(job, err),
        }
    }

    fn outcome_for(&self, job: &QueuedCandidate, err: SimulationError) -> Outcome {
        let reason = err.to_string();
        match err.error_type {
            SimulationErrorType::Infra => {
                warn!("⚠ [{}] 留在队列等待下一轮: {}", job.id, reason);
                Outcome::Requeued { reason }
            }
            SimulationErrorType::Alpha if !self.config.drop_invalid => {
                warn!("⚠ [{}] 表达式被拒绝，保留在队列: {}", job.id, reason);
                Outcome::Requeued { reason }
            }
            SimulationErrorType::Alpha => {
                warn!("✗ [{}] 丢弃: {}", job.id, reason);
                Outcome::Dropped { reason }
            }
            SimulationErrorType::Internal => {
                error!("✗ [{}] 内部错误，丢弃: {}", job.id, reason);
                Outcome::Dropped { reason }
            }
        }
    }

    async fn run(&self, job: &QueuedCandidate) -> Result<Outcome, SimulationError> {
        let candidate = &job.candidate;

        // 1. 提交
        let handle = self
            .resilient
            .call("提交回测", || self.client.submit(candidate))
            .await
            .map_err(|e| classify(Stage::Submit, e))?;
        self.stats.record_submitted();
        info!("▶ [{}] 已提交 {}: {}", job.id, handle.progress_id, candidate.expression);

        // 2. 轮询直到结束
        let alpha_id = match self.poll_until_done(job, &handle).await? {
            Ok(alpha_id) => alpha_id,
            Err(outcome) => return Ok(outcome),
        };

        // 3. 入库（待检查）
        let record = self
            .resilient
            .call("获取 alpha 详情", || self.client.fetch_result(&alpha_id))
            .await
            .map_err(|e| classify(Stage::Fetch, e))?;
        let mut patch = AlphaPatch::from_record(&record).with_status(CheckStatus::Pending);
        if patch.expression.is_none() {
            patch.expression = Some(candidate.expression.clone());
        }
        patch.settings = Some(match patch.settings.take() {
            Some(remote) => candidate.settings.merged_with(&remote),
            None => candidate.settings.clone(),
        });
        AlphaRepository::upsert(&self.db, &patch)
            .await
            .map_err(|e| SimulationError::internal(format!("保存 alpha 失败: {}", e)))?;

        if let Some(template_id) = &candidate.template_id {
            if let Err(e) = TemplateRepository::upsert(
                &self.db,
                &alpha_id,
                template_id,
                candidate.template_source.as_deref(),
                candidate.generation_params.as_ref(),
            )
            .await
            {
                warn!("⚠ [{}] 保存模板来源失败: {}", alpha_id, e);
            }
        }

        // 4. 检查
        let status = self.scheduler.check_one(&alpha_id).await;

        // 5. 去留
        let row = AlphaRepository::get(&self.db, &alpha_id)
            .await
            .map_err(|e| SimulationError::internal(format!("读取 alpha 失败: {}", e)))?;
        let (sharpe, fitness) = row
            .map(|r| (r.sharpe, r.fitness))
            .unwrap_or((record.metrics.sharpe, record.metrics.fitness));
        let retained = match self.config.retention.decide(status, sharpe, fitness) {
            RetentionDecision::Retain => true,
            RetentionDecision::Discard => {
                AlphaRepository::delete(&self.db, &alpha_id)
                    .await
                    .map_err(|e| SimulationError::internal(format!("删除 alpha 失败: {}", e)))?;
                false
            }
        };

        info!(
            "✓ [{}] {} {} sharpe={:?} fitness={:?} {}",
            job.id,
            alpha_id,
            status,
            sharpe,
            fitness,
            if retained { "保留" } else { "丢弃" }
        );
        Ok(Outcome::Completed {
            alpha_id,
            status,
            retained,
            sharpe,
            fitness,
        })
    }

    /// 外层 Err 是调用失败，内层 Err 是已经确定的结果（模拟失败/取消）
    async fn poll_until_done(
        &self,
        job: &QueuedCandidate,
        handle: &SubmitAccepted,
    ) -> Result<Result<String, Outcome>, SimulationError> {
        let mut polls = 0u32;
        loop {
            polls += 1;
            let progress = self
                .resilient
                .call("轮询回测", || self.client.poll_progress(handle))
                .await
                .map_err(|e| classify(Stage::Poll, e))?;

            match progress {
                Progress::Running {
                    progress,
                    retry_after,
                } => {
                    if polls % 10 == 0 {
                        info!(
                            "... [{}] 运行中 {} (已轮询 {} 次)",
                            job.id,
                            progress
                                .map(|p| format!("{:.0}%", p * 100.0))
                                .unwrap_or_default(),
                            polls
                        );
                    }
                    let wait = self
                        .config
                        .poll_interval
                        .max(retry_after.unwrap_or_default());
                    self.resilient.clock().sleep(wait).await;
                }
                Progress::Finished(done) => {
                    let message = done.message.unwrap_or_else(|| "未知引擎错误".to_string());
                    return match done.status.as_str() {
                        "COMPLETE" | "WARNING" => {
                            debug!("[{}] 模拟完成: {}", job.id, done.status);
                            done.alpha_id
                                .map(Ok)
                                .ok_or_else(|| SimulationError::internal("模拟完成但未返回 alpha ID"))
                        }
                        "CANCELLED" => {
                            warn!("⚠ [{}] 任务被外部取消", job.id);
                            Ok(Err(Outcome::Requeued {
                                reason: "任务被外部取消".to_string(),
                            }))
                        }
                        other => {
                            warn!("✗ [{}] 回测失败 {}: {}", job.id, other, message);
                            Ok(Err(Outcome::Dropped {
                                reason: format!("回测失败 {}: {}", other, message),
                            }))
                        }
                    };
                }
            }
        }
    }
}
