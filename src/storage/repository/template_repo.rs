use crate::storage::entity::alpha_template::{
    ActiveModel as AlphaTemplateActiveModel, Column as AlphaTemplateColumn,
    Entity as AlphaTemplate, Model as AlphaTemplateModel,
};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Set};
use std::collections::BTreeMap;

/// alpha 与生成它的模板/参数的对应关系
pub struct TemplateRepository;

impl TemplateRepository {
    pub async fn upsert<C: ConnectionTrait>(
        db: &C,
        alpha_id: &str,
        template_id: &str,
        template: Option<&str>,
        params: Option<&BTreeMap<String, String>>,
    ) -> Result<(), DbErr> {
        let params = params
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbErr::Custom(e.to_string()))?;
        let am = AlphaTemplateActiveModel {
            alpha_id: Set(alpha_id.to_string()),
            template_id: Set(template_id.to_string()),
            template: Set(template.map(|t| t.to_string())),
            params: Set(params),
            created_at: Set(Utc::now().timestamp()),
        };
        AlphaTemplate::insert(am)
            .on_conflict(
                OnConflict::column(AlphaTemplateColumn::AlphaId)
                    .update_columns([
                        AlphaTemplateColumn::TemplateId,
                        AlphaTemplateColumn::Template,
                        AlphaTemplateColumn::Params,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    pub async fn get<C: ConnectionTrait>(
        db: &C,
        alpha_id: &str,
    ) -> Result<Option<AlphaTemplateModel>, DbErr> {
        AlphaTemplate::find_by_id(alpha_id.to_string()).one(db).await
    }
}
