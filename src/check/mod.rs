pub mod probe;
pub mod probe_negative;
pub mod refresh;
pub mod retention;
pub mod scheduler;
pub mod submit;

pub use probe::{CheckProbe, RemoteCheckProbe};
pub use probe_negative::NegativeProbe;
pub use refresh::refresh_existing;
pub use retention::{RetentionDecision, RetentionPolicy};
pub use scheduler::CheckScheduler;
pub use submit::Submitter;

use serde::{Deserialize, Serialize};
use std::fmt;

/// 检查状态（同时也是 alphas 表中记录的状态）
///
/// - `Pending`：已回测完成、尚未拿到检查结果
/// - `Waiting`：检查接口限流（429）
/// - `Error`：检查调用失败
/// - `Expired`：检查调用遇到 401，重试前会续期会话
/// - `Pass` / `Fail`：检查结论
/// - `Active`：平台显示已上线（ALREADY_SUBMITTED 或平台状态 ACTIVE）
/// - `Submitted`：本进程的最终提交请求已被接受
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pending,
    Waiting,
    Error,
    Expired,
    Pass,
    Fail,
    Active,
    Submitted,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pending => "PENDING",
            CheckStatus::Waiting => "WAITING",
            CheckStatus::Error => "ERROR",
            CheckStatus::Expired => "EXPIRED",
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Active => "ACTIVE",
            CheckStatus::Submitted => "SUBMITTED",
        }
    }

    /// 解析本地存储的状态；平台侧的 UNSUBMITTED 视为 Pending
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "UNSUBMITTED" => Some(CheckStatus::Pending),
            "WAITING" => Some(CheckStatus::Waiting),
            "ERROR" => Some(CheckStatus::Error),
            "EXPIRED" => Some(CheckStatus::Expired),
            "PASS" => Some(CheckStatus::Pass),
            "FAIL" => Some(CheckStatus::Fail),
            "ACTIVE" => Some(CheckStatus::Active),
            "SUBMITTED" => Some(CheckStatus::Submitted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckStatus::Pass | CheckStatus::Fail | CheckStatus::Active | CheckStatus::Submitted
        )
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        for s in [CheckStatus::Pass, CheckStatus::Fail, CheckStatus::Active, CheckStatus::Submitted] {
            assert!(s.is_terminal());
        }
        for s in [CheckStatus::Pending, CheckStatus::Waiting, CheckStatus::Error, CheckStatus::Expired] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn parse_accepts_platform_unsubmitted() {
        assert_eq!(CheckStatus::parse("UNSUBMITTED"), Some(CheckStatus::Pending));
        assert_eq!(CheckStatus::parse("active"), Some(CheckStatus::Active));
        assert_eq!(CheckStatus::parse("whatever"), None);
    }
}
