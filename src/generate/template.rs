use crate::simulate::model::{AlphaType, SimulationSettings};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("template directory {0} cannot be read: {1}")]
    Dir(PathBuf, String),
    #[error("template file {0} is invalid: {1}")]
    Invalid(PathBuf, String),
    #[error("template {0} not found")]
    NotFound(String),
}

/// 占位符取值的定义
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    /// 字面量列表，按给定顺序
    Literal(Vec<String>),
    /// 从字段目录按条件解析
    DataField {
        filter: Map<String, Value>,
        order_by: Option<String>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParam {
    List(Vec<Value>),
    Spec {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "where", default)]
        filter: Map<String, Value>,
        #[serde(default)]
        order_by: Option<String>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
    },
}

impl RawParam {
    fn into_spec(self, name: &str) -> Result<ParamSpec, String> {
        match self {
            RawParam::List(values) => values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    other => Err(format!("parameter {} has unsupported literal {}", name, other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ParamSpec::Literal),
            RawParam::Spec {
                kind,
                filter,
                order_by,
                limit,
                offset,
            } => {
                if kind != "data_field" {
                    return Err(format!("parameter {} has unknown type {}", name, kind));
                }
                Ok(ParamSpec::DataField {
                    filter,
                    order_by,
                    limit,
                    offset,
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    id: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    expression: String,
    #[serde(default)]
    parameters: HashMap<String, RawParam>,
    #[serde(default)]
    settings: Option<SimulationSettings>,
    #[serde(default)]
    alpha_type: Option<AlphaType>,
}

/// 一个表达式模板
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub description: Option<String>,
    pub expression: String,
    pub parameters: HashMap<String, ParamSpec>,
    /// 覆盖默认回测参数的字段
    pub settings: Option<SimulationSettings>,
    pub alpha_type: AlphaType,
}

impl Template {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            expression: expression.into(),
            parameters: HashMap::new(),
            settings: None,
            alpha_type: AlphaType::Regular,
        }
    }

    #[cfg(test)]
    pub fn with_literal(mut self, name: &str, values: &[&str]) -> Self {
        self.parameters.insert(
            name.to_string(),
            ParamSpec::Literal(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    /// JSON 模板；文件里没有 id 时使用文件名
    pub fn from_json(content: &str, fallback_id: &str) -> Result<Self, String> {
        let raw: RawTemplate = serde_json::from_str(content).map_err(|e| e.to_string())?;
        let id = match raw.id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(format!("unsupported id {}", other)),
            None => fallback_id.to_string(),
        };
        let parameters = raw
            .parameters
            .into_iter()
            .map(|(name, p)| p.into_spec(&name).map(|spec| (name, spec)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            id,
            description: raw.description,
            expression: raw.expression,
            parameters,
            settings: raw.settings,
            alpha_type: raw.alpha_type.unwrap_or_default(),
        })
    }

    /// 纯文本模板 `<id>-<description>.txt`，占位符全部是内联过滤条件
    pub fn from_text(content: &str, stem: &str) -> Self {
        let (id, description) = match stem.split_once('-') {
            Some((id, desc)) => (id.to_string(), Some(desc.to_string())),
            None => (stem.to_string(), None),
        };
        Self {
            description,
            ..Self::new(id, content.trim())
        }
    }
}

/// 模板目录
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 读取目录下所有模板（按 id 排序）；无法解析的文件记录警告后跳过
    pub fn load_all(&self) -> Result<Vec<Template>, TemplateError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| TemplateError::Dir(self.dir.clone(), e.to_string()))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            match Self::load_file(&path) {
                Ok(Some(t)) => out.push(t),
                Ok(None) => {}
                Err(e) => warn!("⚠ 跳过模板: {}", e),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("从 {} 读取 {} 个模板", self.dir.display(), out.len());
        Ok(out)
    }

    pub fn load(&self, id: &str) -> Result<Template, TemplateError> {
        self.load_all()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    fn load_file(path: &Path) -> Result<Option<Template>, TemplateError> {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Ok(None);
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let read = || {
            std::fs::read_to_string(path)
                .map_err(|e| TemplateError::Invalid(path.to_path_buf(), e.to_string()))
        };
        match ext {
            "json" => Template::from_json(&read()?, &stem)
                .map(Some)
                .map_err(|e| TemplateError::Invalid(path.to_path_buf(), e)),
            "txt" => Ok(Some(Template::from_text(&read()?, &stem))),
            _ => Ok(None),
        }
    }
}
