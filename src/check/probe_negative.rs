use super::retention::{negate_final_line, RetentionPolicy};
use super::CheckStatus;
use crate::simulate::model::{AlphaType, JobCandidate, Outcome, SimulationSettings};
use crate::simulate::worker::Lifecycle;
use crate::storage::entity::alpha;
use crate::storage::repository::queue_repo::candidate_from_row;
use crate::storage::repository::{AlphaRepository, QueueRepository};
use anyhow::{Context, Result};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const NEGATED_TEMPLATE: &str = "negated";
const SOURCE_PARAM: &str = "source_alpha";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub candidates: usize,
    pub completed: usize,
    pub originals_removed: usize,
    pub left_in_queue: usize,
}

fn negated_candidate(row: &alpha::Model, defaults: &SimulationSettings) -> JobCandidate {
    let mut candidate = JobCandidate::new(
        negate_final_line(&row.expression),
        defaults.merged_with(&row.settings()),
    );
    candidate.alpha_type = AlphaType::parse(&row.alpha_type).unwrap_or_default();
    candidate.template_id = Some(NEGATED_TEMPLATE.to_string());
    candidate.template_source = Some(row.expression.clone());
    candidate.generation_params = Some(BTreeMap::from([(
        SOURCE_PARAM.to_string(),
        row.alpha_id.clone(),
    )]));
    candidate
}

/// 反向探测：强负向的 Fail 记录取反后重新回测，成功后删除原记录
pub struct NegativeProbe {
    db: DatabaseConnection,
    lifecycle: Arc<Lifecycle>,
    retention: RetentionPolicy,
    defaults: SimulationSettings,
    claim_lease: Duration,
}

impl NegativeProbe {
    pub fn new(
        db: DatabaseConnection,
        lifecycle: Arc<Lifecycle>,
        retention: RetentionPolicy,
        defaults: SimulationSettings,
        claim_lease: Duration,
    ) -> Self {
        Self {
            db,
            lifecycle,
            retention,
            defaults,
            claim_lease,
        }
    }

    /// 队列里已有反向候选的原记录 ID
    async fn queued_sources(&self) -> Result<HashSet<String>> {
        let rows = QueueRepository::list(&self.db, Some(NEGATED_TEMPLATE))
            .await
            .context("读取反向候选队列失败")?;
        Ok(rows
            .iter()
            .filter_map(|row| candidate_from_row(row).ok())
            .filter_map(|job| job.candidate.generation_params?.remove(SOURCE_PARAM))
            .collect())
    }

    pub async fn run(&self, limit: Option<usize>) -> Result<ProbeReport> {
        let rows = AlphaRepository::list_by_status(&self.db, &[CheckStatus::Fail], None)
            .await
            .context("读取 FAIL 记录失败")?;
        let targets: Vec<_> = rows
            .into_iter()
            .filter(|r| self.retention.is_strongly_negative(r.sharpe, r.fitness))
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let mut report = ProbeReport {
            candidates: targets.len(),
            ..ProbeReport::default()
        };
        if targets.is_empty() {
            info!("没有需要反向探测的记录");
            return Ok(report);
        }
        info!("▶ 反向探测 {} 个记录", targets.len());

        let queued = self.queued_sources().await?;
        for row in targets.iter().filter(|r| !queued.contains(&r.alpha_id)) {
            QueueRepository::enqueue(&self.db, &negated_candidate(row, &self.defaults))
                .await
                .with_context(|| format!("反向候选入队失败 ({})", row.alpha_id))?;
        }
        if !queued.is_empty() {
            info!("{} 个反向候选已在队列中，不重复入队", queued.len());
        }
        let batch_size = QueueRepository::count(&self.db, Some(NEGATED_TEMPLATE))
            .await
            .context("统计反向候选失败")?
            .max(1);

        loop {
            let batch = QueueRepository::dequeue_batch(
                &self.db,
                batch_size,
                Some(NEGATED_TEMPLATE),
                "probe-negative",
                self.claim_lease,
            )
            .await
            .context("认领反向候选失败")?;
            if batch.is_empty() {
                break;
            }

            let mut progressed = false;
            for job in batch {
                let outcome = self.lifecycle.process(&job).await;
                self.lifecycle.stats().record(&outcome);
                if !outcome.removes_from_queue() {
                    QueueRepository::release(&self.db, job.id).await?;
                    report.left_in_queue += 1;
                    continue;
                }
                progressed = true;
                QueueRepository::delete(&self.db, job.id).await?;

                let Outcome::Completed { alpha_id, status, .. } = &outcome else {
                    continue;
                };
                report.completed += 1;
                let source = job
                    .candidate
                    .generation_params
                    .as_ref()
                    .and_then(|p| p.get(SOURCE_PARAM));
                if let Some(source) = source {
                    AlphaRepository::delete(&self.db, source).await?;
                    report.originals_removed += 1;
                    info!("✓ {} 取反后为 {} ({})，已删除原记录", source, alpha_id, status);
                }
            }
            if !progressed {
                warn!("⚠ 本轮反向候选都未完成，保留在队列中");
                break;
            }
            report.left_in_queue = 0;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckScheduler, RemoteCheckProbe};
    use crate::remote::{AlphaMetrics, CallError};
    use crate::simulate::stats::PoolStats;
    use crate::simulate::worker::LifecycleConfig;
    use crate::storage::repository::AlphaPatch;
    use crate::testing::{alpha_id_for, memory_db, test_resilient, ManualClock, ScriptedClient};

    async fn seed(db: &DatabaseConnection, id: &str, expression: &str, sharpe: f64, fitness: f64) {
        let patch = AlphaPatch {
            expression: Some(expression.into()),
            settings: Some(SimulationSettings {
                region: Some("CHN".into()),
                ..SimulationSettings::empty()
            }),
            metrics: AlphaMetrics {
                sharpe: Some(sharpe),
                fitness: Some(fitness),
                ..AlphaMetrics::default()
            },
            ..AlphaPatch::new(id).with_status(CheckStatus::Fail)
        };
        AlphaRepository::upsert(db, &patch).await.unwrap();
    }

    #[test]
    fn negated_candidate_keeps_settings_and_source() {
        let row = alpha::Model {
            alpha_id: "A1".into(),
            alpha_type: "REGULAR".into(),
            expression: "x = rank(close);\nx".into(),
            instrument_type: None,
            region: Some("CHN".into()),
            universe: None,
            delay: None,
            decay: Some(3),
            neutralization: None,
            truncation: None,
            pasteurization: None,
            unit_handling: None,
            nan_handling: None,
            max_trade: None,
            language: None,
            visualization: None,
            status: "FAIL".into(),
            sharpe: Some(-1.4),
            fitness: Some(-0.8),
            turnover: None,
            drawdown: None,
            long_count: None,
            short_count: None,
            returns: None,
            margin: None,
            pnl: None,
            concentrated_weight: None,
            self_correlation: None,
            sub_universe_sharpe: None,
            date_created: None,
            created_at: 0,
            updated_at: 0,
        };
        let c = negated_candidate(&row, &SimulationSettings::default());
        assert_eq!(c.expression, "x = rank(close);\n-(x)");
        assert_eq!(c.settings.region.as_deref(), Some("CHN"));
        assert_eq!(c.settings.decay, Some(3));
        assert_eq!(c.settings.universe.as_deref(), Some("TOP3000"));
        assert_eq!(c.generation_params.unwrap()[SOURCE_PARAM], "A1");
    }

    fn runner(client: Arc<ScriptedClient>, db: &DatabaseConnection) -> NegativeProbe {
        let clock = Arc::new(ManualClock::new());
        let (resilient, _) = test_resilient(clock.clone());
        let probe = Arc::new(RemoteCheckProbe::new(client.clone(), resilient.clone(), db.clone()));
        let scheduler = Arc::new(CheckScheduler::new(probe, clock, Duration::from_secs(30)));
        let lifecycle = Arc::new(Lifecycle::new(
            client,
            resilient,
            scheduler,
            db.clone(),
            Arc::new(PoolStats::new()),
            LifecycleConfig::default(),
        ));
        NegativeProbe::new(
            db.clone(),
            lifecycle,
            RetentionPolicy::default(),
            SimulationSettings::default(),
            Duration::from_secs(7200),
        )
    }

    #[tokio::test]
    async fn resubmits_strong_negatives_and_drops_originals() {
        let client = Arc::new(ScriptedClient::new());
        let db = memory_db().await;
        seed(&db, "NEG", "rank(close)", -1.5, -0.9).await;
        seed(&db, "WEAK", "rank(open)", -0.2, -0.1).await;

        let report = runner(client, &db).run(None).await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.originals_removed, 1);
        assert!(AlphaRepository::get(&db, "NEG").await.unwrap().is_none());
        assert!(AlphaRepository::get(&db, "WEAK").await.unwrap().is_some());
        let flipped = AlphaRepository::get(&db, &alpha_id_for("-(rank(close))"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flipped.status, "PASS");
        assert_eq!(QueueRepository::count(&db, Some(NEGATED_TEMPLATE)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rerun_does_not_enqueue_the_same_source_twice() {
        let client = Arc::new(ScriptedClient::new());
        client.script_submit(
            "-(rank(close))",
            vec![
                CallError::from_status(503, "busy".into()),
                CallError::from_status(503, "busy".into()),
            ],
        );
        let db = memory_db().await;
        let runner = runner(client.clone(), &db);
        seed(&db, "NEG", "rank(close)", -1.5, -0.9).await;

        let first = runner.run(None).await.unwrap();
        assert_eq!(first.left_in_queue, 1);
        assert_eq!(QueueRepository::count(&db, Some(NEGATED_TEMPLATE)).await.unwrap(), 1);

        let second = runner.run(None).await.unwrap();
        assert_eq!(second.left_in_queue, 1);
        assert_eq!(QueueRepository::count(&db, Some(NEGATED_TEMPLATE)).await.unwrap(), 1);
        assert!(AlphaRepository::get(&db, "NEG").await.unwrap().is_some());

        // 平台恢复后，遗留的候选被处理，原记录删除
        let third = runner.run(None).await.unwrap();
        assert_eq!(third.originals_removed, 1);
        assert_eq!(QueueRepository::count(&db, Some(NEGATED_TEMPLATE)).await.unwrap(), 0);
        assert!(AlphaRepository::get(&db, "NEG").await.unwrap().is_none());
    }
}
