pub mod app_command;

pub use app_command::{AppCommand, SubmitTarget, USAGE};

use crate::check::{
    refresh_existing, CheckProbe, CheckScheduler, CheckStatus, NegativeProbe, RemoteCheckProbe,
    RetentionDecision, Submitter,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::generate::{DbFieldCatalog, FieldSyncService, GeneratorService, TemplateStore};
use crate::remote::{CandidateFilter, FieldScope, RemoteJobClient, Resilient, WqbClient};
use crate::session::{SessionManager, WQBSession};
use crate::simulate::{Lifecycle, LifecycleConfig, PoolConfig, PoolStats, StatsSnapshot, WorkerPool};
use crate::storage::repository::filter::{parse_alpha_order, parse_order_direction};
use crate::storage::repository::AlphaRepository;
use anyhow::{Context, Result};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// 需要登录平台的命令共用的组件
#[derive(Clone)]
pub struct Platform {
    client: Arc<dyn RemoteJobClient>,
    resilient: Resilient,
}

impl Platform {
    pub fn new(client: Arc<dyn RemoteJobClient>, resilient: Resilient) -> Self {
        Self { client, resilient }
    }

    /// 创建会话并完成首次认证；认证失败直接返回错误
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let (email, password) = config.credentials()?;
        let wqb = Arc::new(WQBSession::new(email, password).context("创建 HTTP 会话失败")?);
        info!("已创建 {}", wqb);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let session = Arc::new(SessionManager::new(
            wqb.clone(),
            clock.clone(),
            config.session_ttl,
        )
        .with_retry_delay(config.rate_limit_backoff));
        session.start().await.context("登录失败")?;

        let client: Arc<dyn RemoteJobClient> = Arc::new(WqbClient::new(wqb));
        let resilient = Resilient::new(session, clock, config.retry_policy());
        Ok(Self::new(client, resilient))
    }

    fn session(&self) -> &Arc<SessionManager> {
        self.resilient.session()
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.resilient.clock()
    }

    fn scheduler(&self, config: &AppConfig, db: &DatabaseConnection) -> Arc<CheckScheduler> {
        let probe: Arc<dyn CheckProbe> = Arc::new(RemoteCheckProbe::new(
            self.client.clone(),
            self.resilient.clone(),
            db.clone(),
        ));
        Arc::new(CheckScheduler::new(
            probe,
            self.clock().clone(),
            config.check_base_wait,
        ))
    }

    fn lifecycle(&self, config: &AppConfig, db: &DatabaseConnection) -> Arc<Lifecycle> {
        Arc::new(Lifecycle::new(
            self.client.clone(),
            self.resilient.clone(),
            self.scheduler(config, db),
            db.clone(),
            Arc::new(PoolStats::new()),
            LifecycleConfig {
                poll_interval: config.poll_interval,
                drop_invalid: config.drop_invalid,
                retention: config.retention(),
            },
        ))
    }
}

/// 执行一条命令；平台命令在这里登录
pub async fn dispatch(cmd: AppCommand, config: &AppConfig, db: DatabaseConnection) -> Result<()> {
    if !cmd.needs_session() {
        return run_local(cmd, config, db).await;
    }
    let platform = Platform::connect(config).await?;
    run_remote(cmd, config, db, &platform).await
}

async fn run_local(cmd: AppCommand, config: &AppConfig, db: DatabaseConnection) -> Result<()> {
    match cmd {
        AppCommand::Queue { template_id, mode } => {
            let service = GeneratorService::new(
                db.clone(),
                TemplateStore::new(&config.template_dir),
                Arc::new(DbFieldCatalog::new(db)),
                config.default_settings()?,
            );
            let result = service.populate_queue(template_id.as_deref(), mode).await?;
            info!(
                "✓ 入队完成: 模板 {}，移除 {}，新增 {}",
                result.templates, result.removed, result.inserted
            );
            Ok(())
        }
        AppCommand::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        other => anyhow::bail!("命令 {:?} 需要登录平台", other),
    }
}

pub async fn run_remote(
    cmd: AppCommand,
    config: &AppConfig,
    db: DatabaseConnection,
    platform: &Platform,
) -> Result<()> {
    match cmd {
        AppCommand::Simulate {
            template,
            parallelism,
            shuffle,
            stats,
            once,
        } => {
            let pool = WorkerPool::new(
                platform.lifecycle(config, &db),
                platform.session().clone(),
                platform.clock().clone(),
                db,
                PoolConfig {
                    parallelism: parallelism.unwrap_or(config.parallelism),
                    batch_size: config.batch_size,
                    template_filter: template,
                    shuffle,
                    once,
                    idle_wait: config.idle_wait,
                    claim_lease: config.claim_lease,
                    report_interval: stats.then_some(REPORT_INTERVAL),
                    ..PoolConfig::default()
                },
            );
            let stop = pool.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("⚠ 收到 Ctrl-C，等待进行中的任务结束");
                    stop.store(true, Ordering::SeqCst);
                }
            });
            let snapshot = pool.run().await?;
            log_snapshot(&snapshot);
            Ok(())
        }
        AppCommand::Check { alpha_id } => check(config, &db, platform, alpha_id).await,
        AppCommand::Submit {
            target,
            order,
            direction,
        } => {
            let submitter = Submitter::new(
                platform.client.clone(),
                platform.resilient.clone(),
                platform.scheduler(config, &db),
                db,
            );
            match target {
                SubmitTarget::One(id) => {
                    let status = submitter.submit_one(&id).await?;
                    info!("{} -> {}", id, status);
                }
                SubmitTarget::Best(count) => {
                    let column = parse_alpha_order(&order)?;
                    let direction = parse_order_direction(&direction)?;
                    let results = submitter.submit_best(count, column, direction).await?;
                    for (id, status) in &results {
                        info!("{} -> {}", id, status);
                    }
                }
            }
            Ok(())
        }
        AppCommand::FieldsSync {
            region,
            universe,
            delay,
        } => {
            let defaults = config.default_settings()?;
            let scope = FieldScope::new(
                region.or(defaults.region).unwrap_or_else(|| "USA".to_string()),
                universe
                    .or(defaults.universe)
                    .unwrap_or_else(|| "TOP3000".to_string()),
                delay.or(defaults.delay).unwrap_or(1),
            );
            FieldSyncService::new(platform.client.clone(), platform.resilient.clone(), db)
                .sync_scope(&scope)
                .await?;
            Ok(())
        }
        AppCommand::Refresh {
            date_from,
            date_to,
            status,
        } => {
            let filter = CandidateFilter {
                date_from,
                date_to,
                status,
                ..CandidateFilter::default()
            };
            let report =
                refresh_existing(platform.client.clone(), &platform.resilient, &db, &filter).await?;
            info!(
                "✓ 同步完成: 拉取 {}，写入 {}，跳过 {}",
                report.fetched, report.upserted, report.skipped
            );
            Ok(())
        }
        AppCommand::Probe { limit } => {
            let lifecycle = platform.lifecycle(config, &db);
            let stats = lifecycle.stats().clone();
            let report = NegativeProbe::new(
                db,
                lifecycle,
                config.retention(),
                config.default_settings()?,
                config.claim_lease,
            )
            .run(limit)
            .await?;
            info!(
                "✓ 反向探测: 候选 {}，完成 {}，删除原记录 {}，仍在队列 {}",
                report.candidates, report.completed, report.originals_removed, report.left_in_queue
            );
            log_snapshot(&stats.snapshot());
            Ok(())
        }
        local @ (AppCommand::Queue { .. } | AppCommand::Help) => run_local(local, config, db).await,
    }
}

/// 检查积压的记录（或单个记录），并按保留策略清理 Fail
async fn check(
    config: &AppConfig,
    db: &DatabaseConnection,
    platform: &Platform,
    alpha_id: Option<String>,
) -> Result<()> {
    let scheduler = platform.scheduler(config, db);
    let results = match alpha_id {
        Some(id) => {
            let status = scheduler.check_one(&id).await;
            vec![(id, status)]
        }
        None => {
            let backlog = AlphaRepository::list_by_status(
                db,
                &[
                    CheckStatus::Pending,
                    CheckStatus::Waiting,
                    CheckStatus::Error,
                    CheckStatus::Expired,
                ],
                None,
            )
            .await
            .context("读取待检查记录失败")?;
            if backlog.is_empty() {
                info!("没有待检查的记录");
                return Ok(());
            }
            info!("▶ 检查 {} 个记录，窗口 {}", backlog.len(), config.check_window);
            let ids = backlog.into_iter().map(|r| r.alpha_id).collect();
            scheduler.sweep(ids, config.check_window).await.results
        }
    };

    let retention = config.retention();
    let mut discarded = 0usize;
    for (id, status) in &results {
        if *status != CheckStatus::Fail {
            continue;
        }
        let Some(row) = AlphaRepository::get(db, id).await? else {
            continue;
        };
        if retention.decide(*status, row.sharpe, row.fitness) == RetentionDecision::Discard {
            AlphaRepository::delete(db, id).await?;
            discarded += 1;
        }
    }
    let count = |s: CheckStatus| results.iter().filter(|(_, st)| *st == s).count();
    info!(
        "✓ 检查完成: PASS {}，FAIL {}（丢弃 {}），ACTIVE {}",
        count(CheckStatus::Pass),
        count(CheckStatus::Fail),
        discarded,
        count(CheckStatus::Active)
    );
    let pending = AlphaRepository::count_by_status(db, CheckStatus::Pending).await?;
    if pending > 0 {
        info!("仍有 {} 个记录等待检查结果", pending);
    }
    Ok(())
}

fn log_snapshot(s: &StatsSnapshot) {
    info!(
        "统计: 提交 {}，完成 {}，PASS {} ({:.1}%)，FAIL {}，ACTIVE {}，保留 {}，丢弃 {}，移除 {}，重排 {}，均值 sharpe={:?} fitness={:?}",
        s.submitted,
        s.completed,
        s.pass,
        s.pass_rate() * 100.0,
        s.fail,
        s.active,
        s.retained,
        s.discarded,
        s.dropped,
        s.requeued,
        s.mean_sharpe,
        s.mean_fitness
    );
}
