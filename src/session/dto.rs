use crate::simulate::model::SimulationSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /simulations 请求体
#[derive(Debug, Serialize)]
pub struct SimulationRequest<'a> {
    #[serde(rename = "type")]
    pub alpha_type: &'a str,
    pub settings: &'a SimulationSettings,
    pub regular: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationResponse {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub alpha: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlphaDetailResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub alpha_type: Option<String>,
    pub status: Option<String>,
    pub settings: Option<SimulationSettings>,
    pub regular: Option<Value>,
    pub is: Option<IsMetrics>,
    #[serde(rename = "dateCreated")]
    pub date_created: Option<String>,
}

impl AlphaDetailResponse {
    /// `regular` 在详情里是 {"code": ...}，在模拟结果里是字符串
    pub fn expression(&self) -> Option<String> {
        match self.regular.as_ref()? {
            Value::String(s) => Some(s.clone()),
            other => other
                .get("code")
                .and_then(|c| c.as_str())
                .map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsMetrics {
    pub sharpe: Option<f64>,
    pub fitness: Option<f64>,
    pub turnover: Option<f64>,
    pub drawdown: Option<f64>,
    pub long_count: Option<f64>,
    pub short_count: Option<f64>,
    pub returns: Option<f64>,
    pub margin: Option<f64>,
    pub pnl: Option<f64>,
    #[serde(default)]
    pub checks: Vec<CheckDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckDto {
    pub name: String,
    pub result: Option<String>,
    pub value: Option<Value>,
}

/// GET /alphas/{id}/check 响应体
#[derive(Debug, Deserialize)]
pub struct CheckResponse {
    pub is: Option<IsMetrics>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct PagedResponse<T> {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub results: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamedRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFieldResponse {
    pub id: String,
    pub description: Option<String>,
    pub dataset: Option<NamedRef>,
    pub category: Option<NamedRef>,
    pub subcategory: Option<NamedRef>,
    pub region: Option<String>,
    pub delay: Option<i32>,
    pub universe: Option<String>,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub coverage: Option<f64>,
    pub user_count: Option<i64>,
    pub alpha_count: Option<i64>,
}
