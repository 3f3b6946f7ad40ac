use crate::storage::entity::{alpha, data_field};
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{ColumnTrait, Order};
use serde_json::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("未知的过滤字段: {0}")]
    UnknownKey(String),
    #[error("字段 {key} 的取值不合法: {value}")]
    BadValue { key: String, value: String },
    #[error("未知的排序字段: {0}")]
    UnknownOrder(String),
}

/// 单个等值条件
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    FieldId(String),
    DatasetId(String),
    CategoryId(String),
    SubcategoryId(String),
    Region(String),
    Universe(String),
    Delay(i32),
    FieldType(String),
}

impl FieldPredicate {
    /// 从 `key=value` 构造；key 与本地字段目录的列对应
    pub fn parse(key: &str, value: &Value) -> Result<Self, FilterError> {
        let key = key.trim();
        let text = || -> Result<String, FilterError> {
            match value {
                Value::String(s) => Ok(s.trim().to_string()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(FilterError::BadValue {
                    key: key.to_string(),
                    value: other.to_string(),
                }),
            }
        };
        Ok(match key {
            "field_id" | "field_name" | "id" => FieldPredicate::FieldId(text()?),
            "dataset_id" | "dataset" => FieldPredicate::DatasetId(text()?),
            "category_id" | "category" => FieldPredicate::CategoryId(text()?),
            "subcategory_id" | "subcategory" => FieldPredicate::SubcategoryId(text()?),
            "region" => FieldPredicate::Region(text()?),
            "universe" => FieldPredicate::Universe(text()?),
            "type" | "field_type" => FieldPredicate::FieldType(text()?),
            "delay" => {
                let raw = text()?;
                let delay = raw.parse::<i32>().map_err(|_| FilterError::BadValue {
                    key: key.to_string(),
                    value: raw.clone(),
                })?;
                FieldPredicate::Delay(delay)
            }
            other => return Err(FilterError::UnknownKey(other.to_string())),
        })
    }

    pub fn to_expr(&self) -> SimpleExpr {
        use data_field::Column;
        match self {
            FieldPredicate::FieldId(v) => Column::FieldId.eq(v.clone()),
            FieldPredicate::DatasetId(v) => Column::DatasetId.eq(v.clone()),
            FieldPredicate::CategoryId(v) => Column::CategoryId.eq(v.clone()),
            FieldPredicate::SubcategoryId(v) => Column::SubcategoryId.eq(v.clone()),
            FieldPredicate::Region(v) => Column::Region.eq(v.clone()),
            FieldPredicate::Universe(v) => Column::Universe.eq(v.clone()),
            FieldPredicate::Delay(v) => Column::Delay.eq(*v),
            FieldPredicate::FieldType(v) => Column::FieldType.eq(v.clone()),
        }
    }
}

/// 字段目录查询：一组等值条件 + 排序 + 分页
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    pub predicates: Vec<FieldPredicate>,
    pub order_by: Vec<(data_field::Column, Order)>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: 1000,
            offset: 0,
        }
    }
}

impl CatalogFilter {
    /// 从 JSON 对象 `{"region": "USA", "type": "MATRIX"}` 构造
    pub fn from_where(where_: &serde_json::Map<String, Value>) -> Result<Self, FilterError> {
        let mut predicates = Vec::with_capacity(where_.len());
        for (k, v) in where_ {
            predicates.push(FieldPredicate::parse(k, v)?);
        }
        Ok(Self {
            predicates,
            ..Self::default()
        })
    }

    /// 解析内联占位符 `dataset_id=fundamental6,type=MATRIX`
    pub fn from_inline(spec: &str) -> Result<Self, FilterError> {
        let mut predicates = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').ok_or_else(|| FilterError::BadValue {
                key: part.to_string(),
                value: String::new(),
            })?;
            predicates.push(FieldPredicate::parse(k, &Value::String(v.to_string()))?);
        }
        Ok(Self {
            predicates,
            ..Self::default()
        })
    }

    pub fn with_order(mut self, order_by: &str) -> Result<Self, FilterError> {
        self.order_by = parse_field_order(order_by)?;
        Ok(self)
    }

    pub fn with_page(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        if let Some(l) = limit {
            self.limit = l;
        }
        if let Some(o) = offset {
            self.offset = o;
        }
        self
    }
}

fn parse_direction(raw: Option<&str>, whole: &str) -> Result<Order, FilterError> {
    match raw.map(|d| d.to_ascii_lowercase()) {
        None => Ok(Order::Asc),
        Some(d) if d == "asc" => Ok(Order::Asc),
        Some(d) if d == "desc" => Ok(Order::Desc),
        Some(_) => Err(FilterError::UnknownOrder(whole.to_string())),
    }
}

/// `"user_count desc, coverage"` -> [(UserCount, Desc), (Coverage, Asc)]
pub fn parse_field_order(raw: &str) -> Result<Vec<(data_field::Column, Order)>, FilterError> {
    use data_field::Column;
    let mut out = Vec::new();
    for clause in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let mut parts = clause.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let col = match name {
            "field_id" | "field_name" => Column::FieldId,
            "dataset_id" => Column::DatasetId,
            "category_id" => Column::CategoryId,
            "subcategory_id" => Column::SubcategoryId,
            "region" => Column::Region,
            "universe" => Column::Universe,
            "delay" => Column::Delay,
            "type" | "field_type" => Column::FieldType,
            "coverage" => Column::Coverage,
            "user_count" => Column::UserCount,
            "alpha_count" => Column::AlphaCount,
            _ => return Err(FilterError::UnknownOrder(clause.to_string())),
        };
        let order = parse_direction(parts.next(), clause)?;
        if parts.next().is_some() {
            return Err(FilterError::UnknownOrder(clause.to_string()));
        }
        out.push((col, order));
    }
    Ok(out)
}

/// alphas 表的排序列（用于挑选提交顺序）
pub fn parse_alpha_order(column: &str) -> Result<alpha::Column, FilterError> {
    use alpha::Column;
    Ok(match column.trim() {
        "sharpe" => Column::Sharpe,
        "fitness" => Column::Fitness,
        "turnover" => Column::Turnover,
        "returns" => Column::Returns,
        "margin" => Column::Margin,
        "drawdown" => Column::Drawdown,
        "self_correlation" => Column::SelfCorrelation,
        "created_at" => Column::CreatedAt,
        "date_created" => Column::DateCreated,
        other => return Err(FilterError::UnknownOrder(other.to_string())),
    })
}

pub fn parse_order_direction(raw: &str) -> Result<Order, FilterError> {
    parse_direction(Some(raw.trim()), raw)
}
