use super::CheckStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Retain,
    Discard,
}

/// 检查结束后决定记录去留
///
/// Pass 一律保留；否则 |sharpe| 与 |fitness| 都超过阈值且方向一致才保留
/// （强负向的记录留给反向探测使用）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub sharpe_low: f64,
    pub fitness_low: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(1.0, 0.5)
    }
}

impl RetentionPolicy {
    pub fn new(sharpe_low: f64, fitness_low: f64) -> Self {
        Self {
            sharpe_low,
            fitness_low,
        }
    }

    pub fn decide(
        &self,
        status: CheckStatus,
        sharpe: Option<f64>,
        fitness: Option<f64>,
    ) -> RetentionDecision {
        if status == CheckStatus::Pass {
            return RetentionDecision::Retain;
        }
        let (Some(s), Some(f)) = (sharpe, fitness) else {
            return RetentionDecision::Discard;
        };
        let strong = s.abs() > self.sharpe_low && f.abs() > self.fitness_low;
        let same_sign = (s > 0.0 && f > 0.0) || (s < 0.0 && f < 0.0);
        if strong && same_sign {
            RetentionDecision::Retain
        } else {
            RetentionDecision::Discard
        }
    }

    pub fn is_strongly_negative(&self, sharpe: Option<f64>, fitness: Option<f64>) -> bool {
        matches!(
            (sharpe, fitness),
            (Some(s), Some(f)) if s <= -self.sharpe_low && f <= -self.fitness_low
        )
    }
}

/// 把表达式最后一个非空行 `x` 改写为 `-(x)`；已经是 `-(...)` 的则去掉取反
pub fn negate_final_line(expression: &str) -> String {
    let lines: Vec<&str> = expression.lines().collect();
    let Some(idx) = lines.iter().rposition(|l| !l.trim().is_empty()) else {
        return expression.to_string();
    };

    let raw = lines[idx].trim();
    let (body, terminator) = match raw.strip_suffix(';') {
        Some(b) => (b.trim_end(), ";"),
        None => (raw, ""),
    };
    let negated = match unwrap_negation(body) {
        Some(inner) => inner.to_string(),
        None => format!("-({})", body),
    };

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out[idx] = format!("{}{}", negated, terminator);
    out.join("\n")
}

/// `-(x)` 且外层括号成对时返回 `x`
fn unwrap_negation(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("-(")?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}
