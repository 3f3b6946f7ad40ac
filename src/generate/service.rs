use super::expander::{expand, FieldCatalog};
use super::template::{Template, TemplateStore};
use crate::simulate::model::SimulationSettings;
use crate::storage::repository::{EnqueueMode, QueueRepository};
use anyhow::{Context, Result};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PopulateResult {
    pub templates: usize,
    pub removed: u64,
    pub inserted: usize,
}

/// 模板展开并写入队列
pub struct GeneratorService {
    db: DatabaseConnection,
    store: TemplateStore,
    catalog: Arc<dyn FieldCatalog>,
    defaults: SimulationSettings,
}

impl GeneratorService {
    pub fn new(
        db: DatabaseConnection,
        store: TemplateStore,
        catalog: Arc<dyn FieldCatalog>,
        defaults: SimulationSettings,
    ) -> Self {
        Self {
            db,
            store,
            catalog,
            defaults,
        }
    }

    /// `template_id` 为 None 时处理目录下全部模板
    pub async fn populate_queue(
        &self,
        template_id: Option<&str>,
        mode: EnqueueMode,
    ) -> Result<PopulateResult> {
        let templates = match template_id {
            Some(id) => vec![self.store.load(id)?],
            None => self.store.load_all()?,
        };
        if templates.is_empty() {
            warn!("⚠ {} 下没有模板", self.store.dir().display());
        }

        let mut result = PopulateResult::default();
        for template in &templates {
            let (removed, inserted) = self.populate_one(template, mode).await?;
            result.templates += 1;
            result.removed += removed;
            result.inserted += inserted;
        }
        Ok(result)
    }

    pub async fn populate_one(&self, template: &Template, mode: EnqueueMode) -> Result<(u64, usize)> {
        let candidates = expand(template, &self.defaults, self.catalog.as_ref())
            .await
            .with_context(|| format!("展开模板 {} 失败", template.id))?;
        let (removed, inserted) =
            QueueRepository::enqueue_batch(&self.db, &candidates, &template.id, mode)
                .await
                .with_context(|| format!("模板 {} 写入队列失败", template.id))?;
        info!(
            "✓ 模板 {}: 移除旧候选 {}，新增 {}（{:?}）",
            template.id, removed, inserted, mode
        );
        Ok((removed, inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::expander::DbFieldCatalog;
    use crate::simulate::model::JobCandidate;
    use crate::testing::memory_db;

    fn service(db: DatabaseConnection) -> GeneratorService {
        GeneratorService::new(
            db.clone(),
            TemplateStore::new("does-not-exist"),
            Arc::new(DbFieldCatalog::new(db)),
            SimulationSettings::default(),
        )
    }

    #[tokio::test]
    async fn replace_mode_swaps_out_prior_items() {
        let db = memory_db().await;
        let mut prior = JobCandidate::new("rank(volume)", SimulationSettings::default());
        prior.template_id = Some("t1".into());
        QueueRepository::enqueue(&db, &prior).await.unwrap();

        let svc = service(db.clone());
        let t = Template::new("t1", "rank({field})").with_literal("field", &["close", "open"]);
        let (removed, inserted) = svc.populate_one(&t, EnqueueMode::Replace).await.unwrap();
        assert_eq!((removed, inserted), (1, 2));

        let rows = QueueRepository::list(&db, Some("t1")).await.unwrap();
        let exprs: Vec<&str> = rows.iter().map(|r| r.expression.as_str()).collect();
        assert_eq!(exprs, vec!["rank(close)", "rank(open)"]);
    }

    #[tokio::test]
    async fn append_mode_keeps_prior_items() {
        let db = memory_db().await;
        let svc = service(db.clone());
        let t = Template::new("t1", "rank({field})").with_literal("field", &["close", "open"]);
        svc.populate_one(&t, EnqueueMode::Append).await.unwrap();
        svc.populate_one(&t, EnqueueMode::Append).await.unwrap();
        assert_eq!(QueueRepository::count(&db, Some("t1")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn missing_template_directory_is_an_error() {
        let db = memory_db().await;
        assert!(service(db).populate_queue(None, EnqueueMode::Append).await.is_err());
    }
}
