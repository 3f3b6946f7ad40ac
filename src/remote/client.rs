use crate::simulate::model::{AlphaType, JobCandidate, SimulationSettings};
use async_trait::async_trait;
use std::time::Duration;

/// 远程调用错误
///
/// 401 / 429 / 网络错误由 `Resilient` 内部消化，其余状态码交给调用方。
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("认证过期 (401)")]
    Unauthorized,
    #[error("触发频率限制 (429)")]
    RateLimited,
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("网络请求失败: {0}")]
    Transport(String),
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl CallError {
    pub fn from_status(code: u16, body: String) -> Self {
        match code {
            401 => CallError::Unauthorized,
            429 => CallError::RateLimited,
            _ => CallError::Status { code, body },
        }
    }

    #[cfg(test)]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Unauthorized => Some(401),
            CallError::RateLimited => Some(429),
            CallError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CallError::Decode(e.to_string())
        } else {
            CallError::Transport(e.to_string())
        }
    }
}

/// 提交成功后的进度句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitAccepted {
    pub progress_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    /// COMPLETE / WARNING / ERROR / FAIL / CANCELLED
    pub status: String,
    pub alpha_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Running {
        progress: Option<f64>,
        retry_after: Option<Duration>,
    },
    Finished(SimulationOutcome),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlphaMetrics {
    pub sharpe: Option<f64>,
    pub fitness: Option<f64>,
    pub turnover: Option<f64>,
    pub drawdown: Option<f64>,
    pub long_count: Option<f64>,
    pub short_count: Option<f64>,
    pub returns: Option<f64>,
    pub margin: Option<f64>,
    pub pnl: Option<f64>,
    pub concentrated_weight: Option<f64>,
    pub self_correlation: Option<f64>,
    pub sub_universe_sharpe: Option<f64>,
}

/// 平台上的一条 alpha
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaRecord {
    pub alpha_id: String,
    pub alpha_type: AlphaType,
    pub expression: String,
    pub settings: SimulationSettings,
    /// 平台侧状态：UNSUBMITTED / ACTIVE / ...
    pub platform_status: Option<String>,
    pub metrics: AlphaMetrics,
    pub date_created: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckItem {
    pub name: String,
    /// PASS / FAIL / WARNING / PENDING
    pub result: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReply {
    pub ready: bool,
    pub checks: Vec<CheckItem>,
}

impl CheckReply {
    pub fn not_ready() -> Self {
        Self::default()
    }

    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.checks
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub count: usize,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn next(self, fetched: usize) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + fetched,
        }
    }
}

/// `list_candidates` 的过滤条件，转换为平台的查询参数
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFilter {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub status: Option<String>,
    pub sharpe_above: Option<f64>,
    pub fitness_above: Option<f64>,
    pub turnover_above: Option<f64>,
    pub turnover_below: Option<f64>,
    pub hidden: bool,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            status: None,
            sharpe_above: Some(1.25),
            fitness_above: Some(1.0),
            turnover_above: Some(0.01),
            turnover_below: Some(0.7),
            hidden: false,
        }
    }
}

impl CandidateFilter {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut q = Vec::new();
        let mut push = |k: &str, v: String| q.push((k.to_string(), v));
        if let Some(d) = &self.date_from {
            push("dateCreated>=", d.clone());
        }
        if let Some(d) = &self.date_to {
            push("dateCreated<", d.clone());
        }
        if let Some(s) = &self.status {
            push("status", s.clone());
        }
        if let Some(v) = self.sharpe_above {
            push("is.sharpe>", v.to_string());
        }
        if let Some(v) = self.fitness_above {
            push("is.fitness>", v.to_string());
        }
        if let Some(v) = self.turnover_above {
            push("is.turnover>", v.to_string());
        }
        if let Some(v) = self.turnover_below {
            push("is.turnover<", v.to_string());
        }
        push("hidden", self.hidden.to_string());
        push("order", "-dateCreated".to_string());
        q
    }
}

/// 字段目录的作用域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldScope {
    pub instrument_type: String,
    pub region: String,
    pub universe: String,
    pub delay: i32,
}

impl FieldScope {
    pub fn new(region: impl Into<String>, universe: impl Into<String>, delay: i32) -> Self {
        Self {
            instrument_type: "EQUITY".to_string(),
            region: region.into(),
            universe: universe.into(),
            delay,
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        vec![
            ("instrumentType".to_string(), self.instrument_type.clone()),
            ("region".to_string(), self.region.clone()),
            ("delay".to_string(), self.delay.to_string()),
            ("universe".to_string(), self.universe.clone()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRecord {
    pub field_id: String,
    pub description: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub category_id: String,
    pub category_name: String,
    pub subcategory_id: String,
    pub subcategory_name: String,
    pub region: String,
    pub universe: String,
    pub delay: i32,
    pub field_type: String,
    pub coverage: f64,
    pub user_count: i64,
    pub alpha_count: i64,
}

/// 远程研究平台
///
/// 每个方法只发一次请求并把状态码翻译成 `CallError`；
/// 重试、续期交给 `Resilient`。
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    async fn submit(&self, candidate: &JobCandidate) -> Result<SubmitAccepted, CallError>;
    async fn poll_progress(&self, handle: &SubmitAccepted) -> Result<Progress, CallError>;
    async fn fetch_result(&self, alpha_id: &str) -> Result<AlphaRecord, CallError>;
    async fn run_check(&self, alpha_id: &str) -> Result<CheckReply, CallError>;
    async fn submit_final(&self, alpha_id: &str) -> Result<(), CallError>;
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
        page: Pagination,
    ) -> Result<Page<AlphaRecord>, CallError>;
    async fn list_field_catalog(
        &self,
        scope: &FieldScope,
        page: Pagination,
    ) -> Result<Page<FieldRecord>, CallError>;
}
