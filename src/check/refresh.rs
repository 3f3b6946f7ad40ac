use crate::remote::{AlphaRecord, CandidateFilter, Pagination, RemoteJobClient, Resilient};
use crate::storage::repository::{AlphaPatch, AlphaRepository};
use anyhow::{Context, Result};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub fetched: usize,
    pub upserted: usize,
    pub skipped: usize,
}

fn validate(record: &AlphaRecord) -> Result<(), &'static str> {
    if record.alpha_id.trim().is_empty() {
        return Err("缺少 alpha id");
    }
    if record.expression.trim().is_empty() {
        return Err("缺少表达式");
    }
    Ok(())
}

/// 把平台上已有的 alpha 同步到本地
///
/// 已存在的记录只更新表达式、参数和指标，本地状态不被覆盖。
pub async fn refresh_existing(
    client: Arc<dyn RemoteJobClient>,
    resilient: &Resilient,
    db: &DatabaseConnection,
    filter: &CandidateFilter,
) -> Result<RefreshReport> {
    let mut report = RefreshReport::default();
    let mut page = Pagination::new(PAGE_SIZE, 0);

    loop {
        let batch = resilient
            .call("拉取 alpha 列表", || client.list_candidates(filter, page))
            .await
            .with_context(|| format!("拉取 alpha 列表失败 (offset={})", page.offset))?;
        let fetched = batch.results.len();
        if fetched == 0 {
            break;
        }
        report.fetched += fetched;

        for record in &batch.results {
            if let Err(reason) = validate(record) {
                warn!("⚠ 跳过无效记录 [{}]: {}", record.alpha_id, reason);
                report.skipped += 1;
                continue;
            }
            AlphaRepository::upsert_with(db, &AlphaPatch::from_record(record), false)
                .await
                .with_context(|| format!("保存 alpha {} 失败", record.alpha_id))?;
            report.upserted += 1;
        }
        info!("已同步 {}/{}", report.fetched, batch.count);

        page = page.next(fetched);
        if page.offset >= batch.count {
            break;
        }
    }

    info!(
        "✓ 同步完成: 拉取 {}，写入 {}，跳过 {}",
        report.fetched, report.upserted, report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::remote::AlphaMetrics;
    use crate::simulate::model::{AlphaType, SimulationSettings};
    use crate::testing::{memory_db, test_resilient, ManualClock, ScriptedClient};

    fn record(id: &str, expression: &str, platform_status: &str) -> AlphaRecord {
        AlphaRecord {
            alpha_id: id.into(),
            alpha_type: AlphaType::Regular,
            expression: expression.into(),
            settings: SimulationSettings::default(),
            platform_status: Some(platform_status.into()),
            metrics: AlphaMetrics {
                sharpe: Some(1.4),
                ..AlphaMetrics::default()
            },
            date_created: Some("2024-05-01T00:00:00Z".into()),
        }
    }

    #[tokio::test]
    async fn pages_through_and_keeps_local_status() {
        let client = Arc::new(ScriptedClient::new());
        {
            let mut c = client.candidates.lock().unwrap();
            for i in 0..230 {
                c.push(record(&format!("R{}", i), "rank(close)", "UNSUBMITTED"));
            }
            c.push(record("LIVE", "rank(open)", "ACTIVE"));
            c.push(record("", "rank(open)", "UNSUBMITTED"));
        }
        let db = memory_db().await;
        AlphaRepository::upsert(&db, &AlphaPatch::new("R0").with_status(CheckStatus::Pass))
            .await
            .unwrap();
        let (resilient, _) = test_resilient(Arc::new(ManualClock::new()));

        let report = refresh_existing(client, &resilient, &db, &CandidateFilter::default())
            .await
            .unwrap();
        assert_eq!(report.fetched, 232);
        assert_eq!(report.upserted, 231);
        assert_eq!(report.skipped, 1);

        let r0 = AlphaRepository::get(&db, "R0").await.unwrap().unwrap();
        assert_eq!(r0.status, "PASS");
        assert_eq!(r0.sharpe, Some(1.4));
        let live = AlphaRepository::get(&db, "LIVE").await.unwrap().unwrap();
        assert_eq!(live.status, "ACTIVE");
        let r5 = AlphaRepository::get(&db, "R5").await.unwrap().unwrap();
        assert_eq!(r5.status, "PENDING");
    }
}
