use crate::remote::{FieldScope, Pagination, RemoteJobClient, Resilient};
use crate::storage::repository::DataFieldRepository;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PAGE_SIZE: usize = 50;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub fetched: usize,
    pub upserted: usize,
    pub skipped: usize,
}

/// 把平台的字段目录同步到 data_fields 表
pub struct FieldSyncService {
    client: Arc<dyn RemoteJobClient>,
    resilient: Resilient,
    db: DatabaseConnection,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FieldSyncService {
    pub fn new(client: Arc<dyn RemoteJobClient>, resilient: Resilient, db: DatabaseConnection) -> Self {
        Self {
            client,
            resilient,
            db,
            running: AtomicBool::new(false),
        }
    }

    pub async fn sync_scope(&self, scope: &FieldScope) -> Result<SyncResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("字段同步已在进行中");
        }
        let _guard = RunningGuard(&self.running);

        info!(
            "▶ 同步字段目录: region={} universe={} delay={}",
            scope.region, scope.universe, scope.delay
        );
        let mut result = SyncResult::default();
        let mut page = Pagination::new(PAGE_SIZE, 0);
        loop {
            let batch = self
                .resilient
                .call("拉取字段目录", || self.client.list_field_catalog(scope, page))
                .await
                .with_context(|| format!("拉取字段目录失败 (offset={})", page.offset))?;
            let fetched = batch.results.len();
            if fetched == 0 {
                break;
            }
            result.fetched += fetched;

            let (valid, invalid): (Vec<_>, Vec<_>) = batch
                .results
                .into_iter()
                .partition(|f| !f.field_id.trim().is_empty());
            if !invalid.is_empty() {
                warn!("⚠ 跳过 {} 条缺少 id 的字段", invalid.len());
                result.skipped += invalid.len();
            }
            result.upserted += DataFieldRepository::upsert_batch(&self.db, &valid)
                .await
                .context("写入字段目录失败")?;
            info!("字段同步: {}/{}", result.fetched, batch.count);

            page = page.next(fetched);
            if page.offset >= batch.count {
                break;
            }
        }
        info!(
            "✓ 字段同步完成: 拉取 {}，写入 {}，跳过 {}",
            result.fetched, result.upserted, result.skipped
        );
        Ok(result)
    }
}
