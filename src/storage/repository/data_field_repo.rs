use super::filter::CatalogFilter;
use crate::remote::FieldRecord;
use crate::storage::entity::data_field::{
    self, ActiveModel as DataFieldActiveModel, Entity as DataField,
};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use std::collections::HashSet;

pub struct DataFieldRepository;

impl DataFieldRepository {
    /// 按 (field_id, region, universe, delay) upsert
    pub async fn upsert_batch<C: ConnectionTrait>(
        db: &C,
        entries: &[FieldRecord],
    ) -> Result<usize, DbErr> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp();

        // 同一批次里重复的作用域只保留最后一条
        let mut seen = HashSet::new();
        let mut models = Vec::with_capacity(entries.len());
        for e in entries.iter().rev() {
            let key = (e.field_id.as_str(), e.region.as_str(), e.universe.as_str(), e.delay);
            if !seen.insert(key) {
                continue;
            }
            models.push(DataFieldActiveModel {
                field_id: Set(e.field_id.clone()),
                description: Set(e.description.clone()),
                dataset_id: Set(e.dataset_id.clone()),
                dataset_name: Set(e.dataset_name.clone()),
                category_id: Set(e.category_id.clone()),
                category_name: Set(e.category_name.clone()),
                subcategory_id: Set(e.subcategory_id.clone()),
                subcategory_name: Set(e.subcategory_name.clone()),
                region: Set(e.region.clone()),
                universe: Set(e.universe.clone()),
                delay: Set(e.delay),
                field_type: Set(e.field_type.clone()),
                coverage: Set(e.coverage),
                user_count: Set(e.user_count),
                alpha_count: Set(e.alpha_count),
                updated_at: Set(now),
                ..Default::default()
            });
        }
        let written = models.len();

        DataField::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    data_field::Column::FieldId,
                    data_field::Column::Region,
                    data_field::Column::Universe,
                    data_field::Column::Delay,
                ])
                .update_columns([
                    data_field::Column::Description,
                    data_field::Column::DatasetId,
                    data_field::Column::DatasetName,
                    data_field::Column::CategoryId,
                    data_field::Column::CategoryName,
                    data_field::Column::SubcategoryId,
                    data_field::Column::SubcategoryName,
                    data_field::Column::FieldType,
                    data_field::Column::Coverage,
                    data_field::Column::UserCount,
                    data_field::Column::AlphaCount,
                    data_field::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(written)
    }

    /// 按过滤条件解析出字段 ID 列表（保持排序，去重）
    pub async fn resolve<C: ConnectionTrait>(
        db: &C,
        filter: &CatalogFilter,
    ) -> Result<Vec<String>, DbErr> {
        let mut query = DataField::find();
        for p in &filter.predicates {
            query = query.filter(p.to_expr());
        }
        for (col, order) in &filter.order_by {
            query = query.order_by(*col, order.clone());
        }
        let rows = query
            .order_by_asc(data_field::Column::Id)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(db)
            .await?;

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .map(|r| r.field_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    pub async fn count<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
        DataField::find().count(db).await
    }
}
