use super::model::{Outcome, QueuedCandidate};
use super::stats::StatsSnapshot;
use super::worker::Lifecycle;
use crate::clock::Clock;
use crate::session::SessionManager;
use crate::storage::repository::QueueRepository;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub parallelism: usize,
    pub batch_size: u64,
    pub template_filter: Option<String>,
    pub shuffle: bool,
    /// 队列取空（或一整轮都没有进展）后返回，而不是继续等待
    pub once: bool,
    pub idle_wait: Duration,
    pub claim_lease: Duration,
    /// 设置后启动汇报任务，按间隔打印统计
    pub report_interval: Option<Duration>,
    pub worker_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            parallelism: 3,
            batch_size: 100,
            template_filter: None,
            shuffle: false,
            once: false,
            idle_wait: Duration::from_secs(60),
            claim_lease: Duration::from_secs(7200),
            report_interval: None,
            worker_name: format!("pool-{}", std::process::id()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PassSummary {
    removed: usize,
    released: usize,
}

/// 固定并发的工作池
///
/// 单个消费者从队列认领一批，再在池内扇出；每个候选一个 tokio 任务。
pub struct WorkerPool {
    lifecycle: Arc<Lifecycle>,
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    db: DatabaseConnection,
    config: PoolConfig,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        session: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
        db: DatabaseConnection,
        config: PoolConfig,
    ) -> Self {
        Self {
            lifecycle,
            session,
            clock,
            db,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 置位后不再认领新批次，未开始的候选放回队列，进行中的跑完当前流程
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub async fn run(&self) -> Result<StatsSnapshot> {
        info!(
            "▶ 工作池启动: 并发 {}，批大小 {}，模板 {}",
            self.config.parallelism,
            self.config.batch_size,
            self.config.template_filter.as_deref().unwrap_or("全部")
        );
        let reporter = self.config.report_interval.map(|every| self.spawn_reporter(every));

        let result = self.run_passes().await;

        if let Some(handle) = reporter {
            handle.abort();
        }
        let snapshot = self.lifecycle.stats().snapshot();
        info!(
            "✓ 工作池结束: 提交 {}，完成 {}（PASS {} / FAIL {}），保留 {}，丢弃 {}，移除 {}，重排 {}",
            snapshot.submitted,
            snapshot.completed,
            snapshot.pass,
            snapshot.fail,
            snapshot.retained,
            snapshot.discarded,
            snapshot.dropped,
            snapshot.requeued
        );
        result.map(|_| snapshot)
    }

    async fn run_passes(&self) -> Result<()> {
        loop {
            if self.stopped() {
                info!("收到停止信号，工作池退出");
                return Ok(());
            }
            self.session.ensure_fresh().await;

            let batch = QueueRepository::dequeue_batch(
                &self.db,
                self.config.batch_size,
                self.config.template_filter.as_deref(),
                &self.config.worker_name,
                self.config.claim_lease,
            )
            .await
            .context("从队列认领候选失败")?;

            if batch.is_empty() {
                if self.config.once {
                    info!("队列已空");
                    return Ok(());
                }
                info!("队列为空，{}s 后重试", self.config.idle_wait.as_secs());
                self.sleep_unless_stopped(self.config.idle_wait).await;
                continue;
            }

            let summary = self.run_batch(batch).await;
            if self.config.once && summary.removed == 0 && summary.released > 0 {
                warn!("⚠ 本轮没有任何候选完成，停止（{} 个留在队列）", summary.released);
                return Ok(());
            }
        }
    }

    async fn run_batch(&self, mut batch: Vec<QueuedCandidate>) -> PassSummary {
        if self.config.shuffle {
            batch.shuffle(&mut rand::thread_rng());
        }
        info!("▶ 本轮认领 {} 个候选", batch.len());

        let mut tasks = stream::iter(batch)
            .map(|job| {
                let lifecycle = self.lifecycle.clone();
                let stop = self.stop.clone();
                tokio::spawn(async move {
                    if stop.load(Ordering::SeqCst) {
                        return (job, None);
                    }
                    let outcome = lifecycle.process(&job).await;
                    (job, Some(outcome))
                })
            })
            .buffer_unordered(self.config.parallelism.max(1));

        let mut summary = PassSummary::default();
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((job, outcome)) => {
                    if self.settle(&job, outcome.as_ref()).await {
                        summary.removed += 1;
                    } else {
                        summary.released += 1;
                    }
                }
                // 认领会在租约到期或下次启动 recover 时释放
                Err(e) => error!("✗ 候选任务异常退出: {}", e),
            }
        }
        summary
    }

    /// 返回候选是否已从队列移除
    async fn settle(&self, job: &QueuedCandidate, outcome: Option<&Outcome>) -> bool {
        let Some(outcome) = outcome else {
            if let Err(e) = QueueRepository::release(&self.db, job.id).await {
                warn!("⚠ [{}] 释放认领失败: {}", job.id, e);
            }
            return false;
        };
        self.lifecycle.stats().record(outcome);

        if outcome.removes_from_queue() {
            if let Err(e) = QueueRepository::delete(&self.db, job.id).await {
                warn!("⚠ [{}] 删除队列行失败: {}", job.id, e);
            }
            true
        } else {
            if let Err(e) = QueueRepository::release(&self.db, job.id).await {
                warn!("⚠ [{}] 释放认领失败: {}", job.id, e);
            }
            false
        }
    }

    async fn sleep_unless_stopped(&self, total: Duration) {
        let step = Duration::from_secs(1);
        let mut left = total;
        while !left.is_zero() && !self.stopped() {
            let d = left.min(step);
            self.clock.sleep(d).await;
            left = left.saturating_sub(d);
        }
    }

    fn spawn_reporter(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            loop {
                clock.sleep(every).await;
                let s = lifecycle.stats().snapshot();
                info!(
                    "[统计] 提交 {} | 完成 {} | PASS {} ({:.1}%) | 保留 {} | 移除 {} | 重排 {} | 平均 sharpe {} fitness {}",
                    s.submitted,
                    s.completed,
                    s.pass,
                    s.pass_rate() * 100.0,
                    s.retained,
                    s.dropped,
                    s.requeued,
                    s.mean_sharpe.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".into()),
                    s.mean_fitness.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".into()),
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckScheduler, RemoteCheckProbe};
    use crate::remote::CallError;
    use crate::simulate::model::{JobCandidate, SimulationSettings};
    use crate::simulate::stats::PoolStats;
    use crate::simulate::worker::LifecycleConfig;
    use crate::storage::repository::{AlphaRepository, EnqueueMode};
    use crate::testing::{
        alpha_id_for, memory_db, test_resilient, CountingAuth, ManualClock, ScriptedClient,
    };
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct Fixture {
        pool: WorkerPool,
        client: Arc<ScriptedClient>,
        db: DatabaseConnection,
        auth: Arc<CountingAuth>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(client: ScriptedClient, config: PoolConfig) -> Fixture {
        let client = Arc::new(client);
        let db = memory_db().await;
        let clock = Arc::new(ManualClock::new());
        let (resilient, auth) = test_resilient(clock.clone());
        let probe = Arc::new(RemoteCheckProbe::new(client.clone(), resilient.clone(), db.clone()));
        let scheduler = Arc::new(CheckScheduler::new(probe, clock.clone(), Duration::from_secs(30)));
        let session = resilient.session().clone();
        let lifecycle = Arc::new(Lifecycle::new(
            client.clone(),
            resilient,
            scheduler,
            db.clone(),
            Arc::new(PoolStats::new()),
            LifecycleConfig::default(),
        ));
        Fixture {
            pool: WorkerPool::new(lifecycle, session, clock.clone(), db.clone(), config),
            client,
            db,
            auth,
            clock,
        }
    }

    async fn enqueue(db: &DatabaseConnection, template_id: &str, expressions: &[&str]) {
        let candidates: Vec<JobCandidate> = expressions
            .iter()
            .map(|e| {
                let mut c = JobCandidate::new(*e, SimulationSettings::default());
                c.template_id = Some(template_id.to_string());
                c
            })
            .collect();
        QueueRepository::enqueue_batch(db, &candidates, template_id, EnqueueMode::Append)
            .await
            .unwrap();
    }

    fn once(parallelism: usize) -> PoolConfig {
        PoolConfig {
            parallelism,
            once: true,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn drains_queue_with_bounded_concurrency() {
        let client = ScriptedClient::new();
        client.script_submit(
            "bad(",
            vec![CallError::Status {
                code: 400,
                body: "syntax".into(),
            }],
        );
        client.script_simulation("boom", "ERROR");
        client.script_submit(
            "flaky",
            vec![CallError::Status {
                code: 502,
                body: "gateway".into(),
            }],
        );
        let f = fixture(client, once(3)).await;
        enqueue(
            &f.db,
            "t1",
            &["rank(close)", "rank(open)", "bad(", "boom", "flaky", "rank(high)", "rank(low)"],
        )
        .await;

        let stats = f.pool.run().await.unwrap();

        assert_eq!(QueueRepository::count(&f.db, None).await.unwrap(), 0);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.pass, 5);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.requeued, 1);
        let peak = f.client.max_in_flight.load(AtomicOrdering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak in flight {}", peak);
        assert!(AlphaRepository::get(&f.db, &alpha_id_for("flaky"))
            .await
            .unwrap()
            .is_some());
        // 启动前没有会话，首轮 ensure_fresh 完成认证
        assert!(f.auth.calls() >= 1);
    }

    #[tokio::test]
    async fn template_filter_limits_the_pass() {
        let f = fixture(
            ScriptedClient::new(),
            PoolConfig {
                template_filter: Some("t2".into()),
                ..once(2)
            },
        )
        .await;
        enqueue(&f.db, "t1", &["rank(close)"]).await;
        enqueue(&f.db, "t2", &["rank(open)", "rank(vwap)"]).await;

        let stats = f.pool.run().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(QueueRepository::count(&f.db, Some("t1")).await.unwrap(), 1);
        assert_eq!(QueueRepository::count(&f.db, Some("t2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_flag_leaves_candidates_queued() {
        let f = fixture(ScriptedClient::new(), once(2)).await;
        enqueue(&f.db, "t1", &["rank(close)", "rank(open)"]).await;
        f.pool.stop_handle().store(true, AtomicOrdering::SeqCst);

        let stats = f.pool.run().await.unwrap();
        assert_eq!(stats.submitted, 0);
        assert_eq!(QueueRepository::count(&f.db, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn once_mode_gives_up_when_nothing_progresses() {
        let client = ScriptedClient::new();
        client.script_submit(
            "down",
            (0..50)
                .map(|_| CallError::Status {
                    code: 500,
                    body: "down".into(),
                })
                .collect(),
        );
        let f = fixture(client, once(1)).await;
        enqueue(&f.db, "t1", &["down"]).await;

        let stats = f.pool.run().await.unwrap();
        assert_eq!(stats.requeued, 1);
        assert_eq!(QueueRepository::count(&f.db, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_session_is_renewed_once_before_the_next_pass() {
        let f = fixture(ScriptedClient::new(), once(2)).await;
        enqueue(&f.db, "t1", &["rank(close)"]).await;
        f.pool.run().await.unwrap();
        let before = f.auth.calls();
        assert_eq!(before, 1);

        // TTL 内再跑一轮，不重新认证
        enqueue(&f.db, "t1", &["rank(open)"]).await;
        f.pool.run().await.unwrap();
        assert_eq!(f.auth.calls(), before);

        f.clock.advance(Duration::from_secs(3601));
        enqueue(&f.db, "t1", &["rank(high)", "rank(low)"]).await;
        let stats = f.pool.run().await.unwrap();

        assert_eq!(f.auth.calls(), before + 1);
        assert_eq!(stats.completed, 4);
        assert_eq!(QueueRepository::count(&f.db, None).await.unwrap(), 0);
    }
}
