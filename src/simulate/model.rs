use crate::check::CheckStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlphaType {
    #[default]
    Regular,
    Super,
}

impl AlphaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlphaType::Regular => "REGULAR",
            AlphaType::Super => "SUPER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGULAR" => Some(AlphaType::Regular),
            "SUPER" => Some(AlphaType::Super),
            _ => None,
        }
    }
}

impl fmt::Display for AlphaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 回测参数
///
/// 所有字段可选；序列化为平台使用的 camelCase 结构只发生在客户端边界。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neutralization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pasteurization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_handling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nan_handling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_trade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<bool>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            instrument_type: Some("EQUITY".to_string()),
            region: Some("USA".to_string()),
            universe: Some("TOP3000".to_string()),
            delay: Some(1),
            decay: Some(0),
            neutralization: Some("SUBINDUSTRY".to_string()),
            truncation: Some(0.08),
            pasteurization: Some("ON".to_string()),
            unit_handling: Some("VERIFY".to_string()),
            nan_handling: Some("OFF".to_string()),
            max_trade: Some("OFF".to_string()),
            language: Some("FASTEXPR".to_string()),
            visualization: Some(false),
        }
    }
}

impl SimulationSettings {
    pub fn empty() -> Self {
        Self {
            instrument_type: None,
            region: None,
            universe: None,
            delay: None,
            decay: None,
            neutralization: None,
            truncation: None,
            pasteurization: None,
            unit_handling: None,
            nan_handling: None,
            max_trade: None,
            language: None,
            visualization: None,
        }
    }

    /// 逐字段覆盖：`other` 中有值的字段优先
    pub fn merged_with(&self, other: &SimulationSettings) -> SimulationSettings {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        SimulationSettings {
            instrument_type: pick(&self.instrument_type, &other.instrument_type),
            region: pick(&self.region, &other.region),
            universe: pick(&self.universe, &other.universe),
            delay: pick(&self.delay, &other.delay),
            decay: pick(&self.decay, &other.decay),
            neutralization: pick(&self.neutralization, &other.neutralization),
            truncation: pick(&self.truncation, &other.truncation),
            pasteurization: pick(&self.pasteurization, &other.pasteurization),
            unit_handling: pick(&self.unit_handling, &other.unit_handling),
            nan_handling: pick(&self.nan_handling, &other.nan_handling),
            max_trade: pick(&self.max_trade, &other.max_trade),
            language: pick(&self.language, &other.language),
            visualization: pick(&self.visualization, &other.visualization),
        }
    }
}

/// 一个待回测的候选
#[derive(Debug, Clone, PartialEq)]
pub struct JobCandidate {
    pub expression: String,
    pub settings: SimulationSettings,
    pub alpha_type: AlphaType,
    pub template_id: Option<String>,
    pub template_source: Option<String>,
    pub generation_params: Option<BTreeMap<String, String>>,
}

impl JobCandidate {
    pub fn new(expression: impl Into<String>, settings: SimulationSettings) -> Self {
        Self {
            expression: expression.into(),
            settings,
            alpha_type: AlphaType::Regular,
            template_id: None,
            template_source: None,
            generation_params: None,
        }
    }
}

/// 已入队（带队列行 ID）的候选
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCandidate {
    pub id: i32,
    pub candidate: JobCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SimulationErrorType {
    Infra,    // 系统/网络/限流/平台波动（可重试）
    Alpha,    // 表达式错误/回测失败（不可重试）
    Internal, // 本地程序错误/数据库异常/响应结构异常
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationError {
    pub error_type: SimulationErrorType,
    pub message: String,
    pub retryable: bool,
}

impl SimulationError {
    pub fn infra(msg: impl Into<String>) -> Self {
        Self {
            error_type: SimulationErrorType::Infra,
            message: msg.into(),
            retryable: true,
        }
    }

    pub fn alpha(msg: impl Into<String>) -> Self {
        Self {
            error_type: SimulationErrorType::Alpha,
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            error_type: SimulationErrorType::Internal,
            message: msg.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.error_type, self.message)
    }
}

/// 单个候选生命周期的结果，决定队列行的去留
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        alpha_id: String,
        status: CheckStatus,
        retained: bool,
        sharpe: Option<f64>,
        fitness: Option<f64>,
    },
    /// 不再重试，队列行删除
    Dropped { reason: String },
    /// 留在队列里等下一轮
    Requeued { reason: String },
}

impl Outcome {
    pub fn removes_from_queue(&self) -> bool {
        !matches!(self, Outcome::Requeued { .. })
    }
}
