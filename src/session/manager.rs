use crate::clock::Clock;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("authentication rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("authentication transport error: {0}")]
    Transport(String),
}

/// 能够用凭证重新登录平台的对象
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<(), AuthError>;
}

#[derive(Default)]
struct SessionState {
    last_refresh: Option<Instant>,
}

/// 会话管理器
///
/// 所有 worker 共享一个实例。状态由一把异步锁保护：并发的
/// `ensure_fresh` / `renew` 在锁上排队，只有第一个真正发起认证，
/// 其余拿到锁后看到的已经是刷新过的会话。
pub struct SessionManager {
    auth: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retry_delay: Duration,
    state: Mutex<SessionState>,
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn Authenticator>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            auth,
            clock,
            ttl,
            retry_delay: Duration::from_secs(30),
            state: Mutex::new(SessionState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// 启动时的首次认证，失败直接返回错误（调用方应终止进程）
    pub async fn start(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        self.auth.authenticate().await?;
        state.last_refresh = Some(self.clock.now());
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("✓ 会话已建立");
        Ok(())
    }

    /// 每次成功认证递增；调用方在请求前记录，401 后交给 `renew`
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// TTL 内不做任何事，过期则重新认证
    pub async fn ensure_fresh(&self) {
        let mut state = self.state.lock().await;
        if let Some(at) = state.last_refresh {
            if self.clock.now().saturating_duration_since(at) < self.ttl {
                return;
            }
        }
        self.reauthenticate(&mut state, "会话到期").await;
    }

    /// 强制续期（401 触发）
    ///
    /// 如果在 `seen_generation` 之后已经有人续期过，直接返回。
    pub async fn renew(&self, seen_generation: u64) {
        let mut state = self.state.lock().await;
        if self.generation() != seen_generation {
            return;
        }
        self.reauthenticate(&mut state, "认证过期 (401)").await;
    }

    async fn reauthenticate(&self, state: &mut SessionState, reason: &str) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.auth.authenticate().await {
                Ok(()) => {
                    state.last_refresh = Some(self.clock.now());
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    info!("✓ 会话已续期（{}，第 {} 次尝试）", reason, attempt);
                    return;
                }
                Err(e) => {
                    warn!(
                        "⚠ 会话续期失败（{}）: {}，{}s 后重试",
                        reason,
                        e,
                        self.retry_delay.as_secs_f64()
                    );
                    self.clock.sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingAuth, ManualClock};

    fn manager(auth: Arc<CountingAuth>, clock: Arc<ManualClock>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(auth, clock, Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn concurrent_refresh_authenticates_once() {
        let auth = Arc::new(CountingAuth::default());
        let clock = Arc::new(ManualClock::new());
        let mgr = manager(auth.clone(), clock.clone());

        let calls = (0..16).map(|_| {
            let m = mgr.clone();
            tokio::spawn(async move { m.ensure_fresh().await })
        });
        for r in futures::future::join_all(calls).await {
            r.unwrap();
        }
        assert_eq!(auth.calls(), 1);
        assert_eq!(mgr.generation(), 1);
    }

    #[tokio::test]
    async fn within_ttl_is_a_no_op() {
        let auth = Arc::new(CountingAuth::default());
        let clock = Arc::new(ManualClock::new());
        let mgr = manager(auth.clone(), clock.clone());
        mgr.start().await.unwrap();

        clock.advance(Duration::from_secs(3599));
        futures::future::join_all((0..8).map(|_| mgr.ensure_fresh())).await;
        assert_eq!(auth.calls(), 1);

        clock.advance(Duration::from_secs(2));
        futures::future::join_all((0..8).map(|_| mgr.ensure_fresh())).await;
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn stale_renew_requests_collapse() {
        let auth = Arc::new(CountingAuth::default());
        let clock = Arc::new(ManualClock::new());
        let mgr = manager(auth.clone(), clock.clone());
        mgr.start().await.unwrap();

        let seen = mgr.generation();
        futures::future::join_all((0..5).map(|_| mgr.renew(seen))).await;
        assert_eq!(auth.calls(), 2);
        assert_eq!(mgr.generation(), seen + 1);
    }

    #[tokio::test]
    async fn startup_failure_is_reported() {
        let auth = Arc::new(CountingAuth::failing(1));
        let clock = Arc::new(ManualClock::new());
        let mgr = manager(auth.clone(), clock.clone());
        assert!(mgr.start().await.is_err());
        assert_eq!(mgr.generation(), 0);
    }

    #[tokio::test]
    async fn renewal_failure_retries_instead_of_failing() {
        let auth = Arc::new(CountingAuth::default());
        let clock = Arc::new(ManualClock::new());
        let mgr = manager(auth.clone(), clock.clone());
        mgr.start().await.unwrap();

        auth.fail_next(2);
        mgr.renew(mgr.generation()).await;
        assert_eq!(auth.calls(), 4);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);
        assert_eq!(mgr.generation(), 2);
    }
}
