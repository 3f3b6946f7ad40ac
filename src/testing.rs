//! 测试用的替身：手动时钟、计数认证器、脚本化远程客户端、内存数据库

use crate::clock::Clock;
use crate::remote::client::{CheckItem, Page, SimulationOutcome};
use crate::remote::{
    AlphaMetrics, AlphaRecord, CallError, CandidateFilter, CheckReply, FieldRecord, FieldScope,
    Pagination, Progress, RemoteJobClient, Resilient, RetryPolicy, SubmitAccepted,
};
use crate::session::manager::{AuthError, Authenticator};
use crate::session::SessionManager;
use crate::simulate::model::{AlphaType, JobCandidate};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub async fn memory_db() -> DatabaseConnection {
    crate::storage::establish_connection("sqlite::memory:")
        .await
        .expect("memory db")
}

/// sleep 立即返回并把虚拟时间往前推
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, dur: Duration) {
        self.sleeps.lock().unwrap().push(dur);
        self.advance(dur);
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct CountingAuth {
    calls: AtomicU32,
    failures_left: AtomicU32,
}

impl CountingAuth {
    pub fn failing(n: u32) -> Self {
        let a = Self::default();
        a.fail_next(n);
        a
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuth {
    async fn authenticate(&self) -> Result<(), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(AuthError::Rejected {
                status: 401,
                body: "bad credentials".into(),
            });
        }
        Ok(())
    }
}

/// 认证永远成功的韧性层
pub fn test_resilient(clock: Arc<ManualClock>) -> (Resilient, Arc<CountingAuth>) {
    let auth = Arc::new(CountingAuth::default());
    let session = Arc::new(SessionManager::new(
        auth.clone(),
        clock.clone(),
        Duration::from_secs(3600),
    ));
    (Resilient::new(session, clock, RetryPolicy::default()), auth)
}

/// alpha id 由表达式决定，测试里可以直接算出来
pub fn alpha_id_for(expression: &str) -> String {
    format!("A[{}]", expression)
}

pub fn passing_checks() -> CheckReply {
    CheckReply {
        ready: true,
        checks: vec![
            CheckItem {
                name: "LOW_SHARPE".into(),
                result: "PASS".into(),
                value: Some(1.6),
            },
            CheckItem {
                name: "LOW_FITNESS".into(),
                result: "PASS".into(),
                value: Some(1.1),
            },
        ],
    }
}

pub fn failing_checks(sharpe: f64, fitness: f64) -> CheckReply {
    CheckReply {
        ready: true,
        checks: vec![
            CheckItem {
                name: "LOW_SHARPE".into(),
                result: "FAIL".into(),
                value: Some(sharpe),
            },
            CheckItem {
                name: "LOW_FITNESS".into(),
                result: "FAIL".into(),
                value: Some(fitness),
            },
        ],
    }
}

/// 脚本化的远程平台
///
/// 每个表达式 / alpha 可以预置一串响应，用完后回落到默认行为
/// （提交成功、一次进行中后 COMPLETE、检查通过、最终提交成功）。
pub struct ScriptedClient {
    pub submit_script: Mutex<HashMap<String, VecDeque<CallError>>>,
    pub sim_status: Mutex<HashMap<String, String>>,
    pub check_script: Mutex<HashMap<String, VecDeque<Result<CheckReply, CallError>>>>,
    pub default_check: Mutex<CheckReply>,
    pub final_script: Mutex<HashMap<String, VecDeque<CallError>>>,
    pub metrics: Mutex<HashMap<String, AlphaMetrics>>,
    pub candidates: Mutex<Vec<AlphaRecord>>,
    pub fields: Mutex<Vec<FieldRecord>>,
    pub running_polls: usize,
    progress: Mutex<HashMap<String, (String, usize)>>,
    pub submit_calls: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub final_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self {
            submit_script: Mutex::new(HashMap::new()),
            sim_status: Mutex::new(HashMap::new()),
            check_script: Mutex::new(HashMap::new()),
            default_check: Mutex::new(passing_checks()),
            final_script: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
            candidates: Mutex::new(Vec::new()),
            fields: Mutex::new(Vec::new()),
            running_polls: 1,
            progress: Mutex::new(HashMap::new()),
            submit_calls: AtomicUsize::new(0),
            check_calls: AtomicUsize::new(0),
            final_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_submit(&self, expression: &str, errors: Vec<CallError>) {
        self.submit_script
            .lock()
            .unwrap()
            .insert(expression.to_string(), errors.into());
    }

    pub fn script_simulation(&self, expression: &str, status: &str) {
        self.sim_status
            .lock()
            .unwrap()
            .insert(expression.to_string(), status.to_string());
    }

    pub fn script_check(&self, alpha_id: &str, replies: Vec<Result<CheckReply, CallError>>) {
        self.check_script
            .lock()
            .unwrap()
            .insert(alpha_id.to_string(), replies.into());
    }

    pub fn script_final(&self, alpha_id: &str, errors: Vec<CallError>) {
        self.final_script
            .lock()
            .unwrap()
            .insert(alpha_id.to_string(), errors.into());
    }

    pub fn set_metrics(&self, expression: &str, metrics: AlphaMetrics) {
        self.metrics
            .lock()
            .unwrap()
            .insert(alpha_id_for(expression), metrics);
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    fn expression_of(&self, alpha_id: &str) -> String {
        alpha_id
            .strip_prefix("A[")
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(alpha_id)
            .to_string()
    }
}

fn paginate<T: Clone>(items: &[T], page: Pagination) -> Page<T> {
    Page {
        count: items.len(),
        results: items
            .iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect(),
    }
}

#[async_trait]
impl RemoteJobClient for ScriptedClient {
    async fn submit(&self, candidate: &JobCandidate) -> Result<SubmitAccepted, CallError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .submit_script
            .lock()
            .unwrap()
            .get_mut(&candidate.expression)
            .and_then(|q| q.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(n, Ordering::SeqCst);

        let progress_id = format!("P-{}", self.submit_calls.load(Ordering::SeqCst));
        self.progress
            .lock()
            .unwrap()
            .insert(progress_id.clone(), (candidate.expression.clone(), 0));
        tokio::task::yield_now().await;
        Ok(SubmitAccepted { progress_id })
    }

    async fn poll_progress(&self, handle: &SubmitAccepted) -> Result<Progress, CallError> {
        tokio::task::yield_now().await;
        let mut progress = self.progress.lock().unwrap();
        let entry = progress
            .get_mut(&handle.progress_id)
            .ok_or_else(|| CallError::Status {
                code: 404,
                body: "unknown simulation".into(),
            })?;
        if entry.1 < self.running_polls {
            entry.1 += 1;
            return Ok(Progress::Running {
                progress: Some(0.5),
                retry_after: None,
            });
        }
        let expression = entry.0.clone();
        let status = self
            .sim_status
            .lock()
            .unwrap()
            .get(&expression)
            .cloned()
            .unwrap_or_else(|| "COMPLETE".to_string());
        let finished = matches!(status.as_str(), "COMPLETE" | "WARNING");
        if !finished {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(Progress::Finished(SimulationOutcome {
            alpha_id: finished.then(|| alpha_id_for(&expression)),
            status,
            message: None,
        }))
    }

    async fn fetch_result(&self, alpha_id: &str) -> Result<AlphaRecord, CallError> {
        tokio::task::yield_now().await;
        let metrics = self
            .metrics
            .lock()
            .unwrap()
            .get(alpha_id)
            .cloned()
            .unwrap_or(AlphaMetrics {
                sharpe: Some(1.6),
                fitness: Some(1.1),
                turnover: Some(0.2),
                drawdown: Some(0.05),
                ..AlphaMetrics::default()
            });
        Ok(AlphaRecord {
            alpha_id: alpha_id.to_string(),
            alpha_type: AlphaType::Regular,
            expression: self.expression_of(alpha_id),
            settings: crate::simulate::model::SimulationSettings::default(),
            platform_status: Some("UNSUBMITTED".into()),
            metrics,
            date_created: None,
        })
    }

    async fn run_check(&self, alpha_id: &str) -> Result<CheckReply, CallError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let scripted = self
            .check_script
            .lock()
            .unwrap()
            .get_mut(alpha_id)
            .and_then(|q| q.pop_front());
        let reply = match scripted {
            Some(r) => r,
            None => Ok(self.default_check.lock().unwrap().clone()),
        };
        if matches!(&reply, Ok(r) if r.ready) {
            let prev = self.in_flight.load(Ordering::SeqCst);
            if prev > 0 {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
        reply
    }

    async fn submit_final(&self, alpha_id: &str) -> Result<(), CallError> {
        self.final_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .final_script
            .lock()
            .unwrap()
            .get_mut(alpha_id)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn list_candidates(
        &self,
        _filter: &CandidateFilter,
        page: Pagination,
    ) -> Result<Page<AlphaRecord>, CallError> {
        Ok(paginate(&self.candidates.lock().unwrap(), page))
    }

    async fn list_field_catalog(
        &self,
        _scope: &FieldScope,
        page: Pagination,
    ) -> Result<Page<FieldRecord>, CallError> {
        Ok(paginate(&self.fields.lock().unwrap(), page))
    }
}
