use super::client::CallError;
use crate::clock::Clock;
use crate::session::SessionManager;
use log::warn;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 429 后的等待
    pub rate_limit_backoff: Duration,
    /// 网络错误后的等待
    pub transport_backoff: Duration,
    /// 0.0 ~ 1.0，在等待时间上叠加的随机比例
    pub jitter: f64,
    /// None 表示无限重试
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(30),
            transport_backoff: Duration::from_secs(5),
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn with_jitter(&self, base: Duration) -> Duration {
        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(factor)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// 包装每一次远程调用：
/// 429 等待后重试，401 续期会话后重试，网络错误等待后重试，
/// 其它状态原样返回。
#[derive(Clone)]
pub struct Resilient {
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Resilient {
    pub fn new(session: Arc<SessionManager>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            session,
            clock,
            policy,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn call<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let seen = self.session.generation();
            let err = match f().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            let wait = match &err {
                CallError::RateLimited => Some(self.policy.with_jitter(self.policy.rate_limit_backoff)),
                CallError::Transport(_) => Some(self.policy.with_jitter(self.policy.transport_backoff)),
                CallError::Unauthorized => None,
                _ => return Err(err),
            };

            if self.policy.exhausted(attempt) {
                warn!("✗ {} 重试 {} 次后放弃: {}", op, attempt, err);
                return Err(err);
            }

            match wait {
                Some(d) => {
                    warn!("⚠ {} {}，{:.1}s 后重试", op, err, d.as_secs_f64());
                    self.clock.sleep(d).await;
                }
                None => {
                    warn!("⚠ {} {}，续期会话后重试", op, err);
                    self.session.renew(seen).await;
                }
            }
        }
    }
}
