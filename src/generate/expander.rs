use super::parser::{is_inline_filter, placeholders, substitute, validate_expression};
use super::template::{ParamSpec, Template};
use crate::simulate::model::{JobCandidate, SimulationSettings};
use crate::storage::repository::{CatalogFilter, DataFieldRepository, FilterError};
use async_trait::async_trait;
use log::{info, warn};
use sea_orm::DatabaseConnection;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("placeholder {{{0}}} has no parameter definition")]
    MissingParameter(String),
    #[error("placeholder {{{placeholder}}}: {source}")]
    Filter {
        placeholder: String,
        #[source]
        source: FilterError,
    },
    #[error("field catalog lookup failed: {0}")]
    Catalog(String),
}

/// 字段目录：按过滤条件给出字段 ID 列表
#[async_trait]
pub trait FieldCatalog: Send + Sync {
    async fn resolve(&self, filter: &CatalogFilter) -> Result<Vec<String>, ExpandError>;
}

/// 基于本地 data_fields 表的目录
pub struct DbFieldCatalog {
    db: DatabaseConnection,
}

impl DbFieldCatalog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FieldCatalog for DbFieldCatalog {
    async fn resolve(&self, filter: &CatalogFilter) -> Result<Vec<String>, ExpandError> {
        DataFieldRepository::resolve(&self.db, filter)
            .await
            .map_err(|e| ExpandError::Catalog(e.to_string()))
    }
}

fn filter_error(placeholder: &str) -> impl Fn(FilterError) -> ExpandError + '_ {
    move |source| ExpandError::Filter {
        placeholder: placeholder.to_string(),
        source,
    }
}

async fn resolve_domain(
    template: &Template,
    placeholder: &str,
    catalog: &dyn FieldCatalog,
) -> Result<Vec<String>, ExpandError> {
    if let Some(spec) = template.parameters.get(placeholder) {
        return match spec {
            ParamSpec::Literal(values) => Ok(values.clone()),
            ParamSpec::DataField {
                filter,
                order_by,
                limit,
                offset,
            } => {
                let mut f = CatalogFilter::from_where(filter).map_err(filter_error(placeholder))?;
                if let Some(order) = order_by {
                    f = f.with_order(order).map_err(filter_error(placeholder))?;
                }
                catalog.resolve(&f.with_page(*limit, *offset)).await
            }
        };
    }
    if is_inline_filter(placeholder) {
        let f = CatalogFilter::from_inline(placeholder).map_err(filter_error(placeholder))?;
        return catalog.resolve(&f).await;
    }
    Err(ExpandError::MissingParameter(placeholder.to_string()))
}

/// 笛卡尔积，第一个占位符在最外层
fn cartesian(domains: &[(String, Vec<String>)]) -> Vec<BTreeMap<String, String>> {
    let mut combos = vec![BTreeMap::new()];
    for (name, values) in domains {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values {
                let mut c = combo.clone();
                c.insert(name.clone(), v.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}

/// 把模板展开为候选
///
/// 任一占位符的取值为空时返回空列表；替换后不合法的表达式记录警告后跳过。
pub async fn expand(
    template: &Template,
    defaults: &SimulationSettings,
    catalog: &dyn FieldCatalog,
) -> Result<Vec<JobCandidate>, ExpandError> {
    let names = placeholders(&template.expression);
    let mut domains = Vec::with_capacity(names.len());
    for name in names {
        let values = resolve_domain(template, &name, catalog).await?;
        if values.is_empty() {
            warn!("⚠ 模板 {} 的占位符 {{{}}} 没有可用取值，跳过", template.id, name);
            return Ok(Vec::new());
        }
        domains.push((name, values));
    }

    let settings = match &template.settings {
        Some(over) => defaults.merged_with(over),
        None => defaults.clone(),
    };

    let mut out = Vec::new();
    for params in cartesian(&domains) {
        let expression = substitute(&template.expression, |name| params.get(name).cloned())
            .trim()
            .to_string();
        if let Err(reason) = validate_expression(&expression) {
            warn!("⚠ 模板 {} 生成的表达式无效，跳过: {}", template.id, reason);
            continue;
        }
        out.push(JobCandidate {
            expression,
            settings: settings.clone(),
            alpha_type: template.alpha_type,
            template_id: Some(template.id.clone()),
            template_source: Some(template.expression.clone()),
            generation_params: (!params.is_empty()).then_some(params),
        });
    }
    info!("模板 {} 展开得到 {} 个候选", template.id, out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::FieldRecord;
    use crate::testing::memory_db;
    use serde_json::json;

    struct StaticCatalog(Vec<String>);

    #[async_trait]
    impl FieldCatalog for StaticCatalog {
        async fn resolve(&self, _filter: &CatalogFilter) -> Result<Vec<String>, ExpandError> {
            Ok(self.0.clone())
        }
    }

    fn no_fields() -> StaticCatalog {
        StaticCatalog(Vec::new())
    }

    #[tokio::test]
    async fn produces_full_product_in_declaration_order() {
        let t = Template::new("t", "ts_mean({field}, {window}) / {field}")
            .with_literal("window", &["5", "20", "60"])
            .with_literal("field", &["close", "open"]);
        let out = expand(&t, &SimulationSettings::default(), &no_fields()).await.unwrap();

        assert_eq!(out.len(), 6);
        let exprs: Vec<&str> = out.iter().map(|c| c.expression.as_str()).collect();
        assert_eq!(
            exprs,
            vec![
                "ts_mean(close, 5) / close",
                "ts_mean(close, 20) / close",
                "ts_mean(close, 60) / close",
                "ts_mean(open, 5) / open",
                "ts_mean(open, 20) / open",
                "ts_mean(open, 60) / open",
            ]
        );
        for c in &out {
            assert!(!c.expression.contains('{'));
            assert_eq!(c.template_id.as_deref(), Some("t"));
            assert_eq!(c.generation_params.as_ref().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn empty_domain_yields_nothing() {
        let t = Template::new("t", "rank({a}) * {b}")
            .with_literal("a", &["close"])
            .with_literal("b", &[]);
        assert!(expand(&t, &SimulationSettings::default(), &no_fields())
            .await
            .unwrap()
            .is_empty());

        let inline = Template::new("t", "rank({dataset_id=missing})");
        assert!(expand(&inline, &SimulationSettings::default(), &no_fields())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_parameter_is_an_error() {
        let t = Template::new("t", "rank({field})");
        let err = expand(&t, &SimulationSettings::default(), &no_fields()).await.unwrap_err();
        assert!(matches!(err, ExpandError::MissingParameter(name) if name == "field"));
    }

    #[tokio::test]
    async fn template_without_placeholders_is_one_candidate() {
        let t = Template::new("t", "rank(close)");
        let out = expand(&t, &SimulationSettings::default(), &no_fields()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].generation_params, None);
    }

    #[tokio::test]
    async fn template_settings_override_defaults() {
        let mut t = Template::new("t", "rank({f})").with_literal("f", &["close"]);
        t.settings = Some(SimulationSettings {
            region: Some("CHN".into()),
            ..SimulationSettings::empty()
        });
        let out = expand(&t, &SimulationSettings::default(), &no_fields()).await.unwrap();
        assert_eq!(out[0].settings.region.as_deref(), Some("CHN"));
        assert_eq!(out[0].settings.universe.as_deref(), Some("TOP3000"));
    }

    #[tokio::test]
    async fn catalog_parameters_resolve_against_the_store() {
        let db = memory_db().await;
        let field = |id: &str, dataset: &str, users: i64| FieldRecord {
            field_id: id.into(),
            dataset_id: dataset.into(),
            region: "USA".into(),
            universe: "TOP3000".into(),
            delay: 1,
            field_type: "MATRIX".into(),
            user_count: users,
            ..FieldRecord::default()
        };
        DataFieldRepository::upsert_batch(
            &db,
            &[field("assets", "fundamental6", 10), field("debt", "fundamental6", 30), field("close", "pv1", 99)],
        )
        .await
        .unwrap();

        let mut t = Template::new("t", "rank({f}) + {dataset_id=pv1}");
        t.parameters.insert(
            "f".into(),
            ParamSpec::DataField {
                filter: json!({"dataset_id": "fundamental6"}).as_object().unwrap().clone(),
                order_by: Some("user_count desc".into()),
                limit: None,
                offset: None,
            },
        );
        let catalog = DbFieldCatalog::new(db);
        let out = expand(&t, &SimulationSettings::default(), &catalog).await.unwrap();
        let exprs: Vec<&str> = out.iter().map(|c| c.expression.as_str()).collect();
        assert_eq!(exprs, vec!["rank(debt) + close", "rank(assets) + close"]);
    }

    #[tokio::test]
    async fn bad_filter_key_is_reported() {
        let t = Template::new("t", "rank({bogus=1})");
        let err = expand(&t, &SimulationSettings::default(), &no_fields()).await.unwrap_err();
        assert!(matches!(err, ExpandError::Filter { .. }));
    }
}
