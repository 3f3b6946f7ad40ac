use super::probe::CheckProbe;
use super::CheckStatus;
use crate::clock::Clock;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 退避规则
///
/// Pending：当前等待为 0 时取 `base`，否则翻倍；
/// Waiting / Error / Expired：重置为 `base`；
/// 终态返回 None。
pub fn next_wait(current: Duration, status: CheckStatus, base: Duration) -> Option<Duration> {
    match status {
        CheckStatus::Pending if current.is_zero() => Some(base),
        CheckStatus::Pending => Some(current * 2),
        CheckStatus::Waiting | CheckStatus::Error | CheckStatus::Expired => Some(base),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEntry {
    pub alpha_id: String,
    pub wait: Duration,
    pub wait_until: Instant,
    seq: u64,
}

impl Ord for WaitEntry {
    // BinaryHeap 是大顶堆，反转比较得到最早到期优先
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wait_until
            .cmp(&self.wait_until)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 按 (wait_until, 入队序号) 排序的等待队列
#[derive(Debug, Default)]
pub struct WaitQueue {
    heap: BinaryHeap<WaitEntry>,
    seq: u64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, alpha_id: impl Into<String>, wait: Duration, wait_until: Instant) {
        self.seq += 1;
        self.heap.push(WaitEntry {
            alpha_id: alpha_id.into(),
            wait,
            wait_until,
            seq: self.seq,
        });
    }

    pub fn pop(&mut self) -> Option<WaitEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub results: Vec<(String, CheckStatus)>,
    /// 同时处于活动窗口中的最大条目数
    pub max_active: usize,
    pub attempts: usize,
}

impl SweepReport {
    pub fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|(_, s)| *s == status).count()
    }
}

/// 检查轮询调度器
pub struct CheckScheduler {
    probe: Arc<dyn CheckProbe>,
    clock: Arc<dyn Clock>,
    base_wait: Duration,
}

impl CheckScheduler {
    pub fn new(probe: Arc<dyn CheckProbe>, clock: Arc<dyn Clock>, base_wait: Duration) -> Self {
        Self {
            probe,
            clock,
            base_wait,
        }
    }

    /// 反复检查同一个 alpha 直到终态
    pub async fn check_one(&self, alpha_id: &str) -> CheckStatus {
        let mut wait = Duration::ZERO;
        loop {
            let status = self.probe.probe(alpha_id).await;
            match next_wait(wait, status, self.base_wait) {
                None => {
                    info!("✓ [{}] 检查完成: {}", alpha_id, status);
                    return status;
                }
                Some(w) => {
                    debug!("[{}] 检查状态 {}，{}s 后重试", alpha_id, status, w.as_secs());
                    wait = w;
                    self.clock.sleep(w).await;
                }
            }
        }
    }

    /// 批量检查
    ///
    /// 活动窗口最多容纳 `window` 个条目，总是先处理最早到期的那个；
    /// 条目进入终态后从 backlog 补位。
    pub async fn sweep(&self, backlog: Vec<String>, window: usize) -> SweepReport {
        let window = window.max(1);
        let total = backlog.len();
        let mut backlog: VecDeque<String> = backlog.into();
        let mut queue = WaitQueue::new();
        let mut waits: HashMap<String, Duration> = HashMap::new();
        let mut report = SweepReport::default();

        info!("▶ 开始批量检查 {} 个 alpha（窗口 {}）", total, window);
        loop {
            while queue.len() < window {
                match backlog.pop_front() {
                    Some(id) => {
                        waits.insert(id.clone(), Duration::ZERO);
                        queue.push(id, Duration::ZERO, self.clock.now());
                    }
                    None => break,
                }
            }
            report.max_active = report.max_active.max(queue.len());

            let Some(entry) = queue.pop() else { break };
            let now = self.clock.now();
            if entry.wait_until > now {
                self.clock.sleep(entry.wait_until - now).await;
            }

            let status = self.probe.probe(&entry.alpha_id).await;
            report.attempts += 1;
            let current = waits.get(&entry.alpha_id).copied().unwrap_or_default();
            match next_wait(current, status, self.base_wait) {
                Some(w) => {
                    waits.insert(entry.alpha_id.clone(), w);
                    let until = self.clock.now() + w;
                    debug!("[{}] {} -> {}s 后重试", entry.alpha_id, status, w.as_secs());
                    queue.push(entry.alpha_id, w, until);
                }
                None => {
                    waits.remove(&entry.alpha_id);
                    info!(
                        "✓ [{}] {} （{}/{}）",
                        entry.alpha_id,
                        status,
                        report.results.len() + 1,
                        total
                    );
                    report.results.push((entry.alpha_id, status));
                }
            }
        }
        info!(
            "✓ 批量检查结束: PASS {} / FAIL {} / ACTIVE {}",
            report.count(CheckStatus::Pass),
            report.count(CheckStatus::Fail),
            report.count(CheckStatus::Active)
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const BASE: Duration = Duration::from_secs(30);

    /// 每个 alpha 按脚本返回状态，用完后返回 Pass
    #[derive(Default)]
    struct ScriptedProbe {
        scripts: Mutex<HashMap<String, VecDeque<CheckStatus>>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn with(scripts: &[(&str, &[CheckStatus])]) -> Self {
            let probe = Self::default();
            for (id, seq) in scripts {
                probe
                    .scripts
                    .lock()
                    .unwrap()
                    .insert(id.to_string(), seq.iter().copied().collect());
            }
            probe
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CheckProbe for ScriptedProbe {
        async fn probe(&self, alpha_id: &str) -> CheckStatus {
            self.log.lock().unwrap().push(alpha_id.to_string());
            self.scripts
                .lock()
                .unwrap()
                .get_mut(alpha_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(CheckStatus::Pass)
        }
    }

    #[test]
    fn pending_doubles_and_resets() {
        let mut w = Duration::ZERO;
        let mut seen = Vec::new();
        for s in [
            CheckStatus::Pending,
            CheckStatus::Pending,
            CheckStatus::Pending,
            CheckStatus::Waiting,
            CheckStatus::Pending,
            CheckStatus::Error,
            CheckStatus::Expired,
        ] {
            w = next_wait(w, s, BASE).unwrap();
            seen.push(w.as_secs());
        }
        assert_eq!(seen, vec![30, 60, 120, 30, 60, 30, 30]);
        assert_eq!(next_wait(w, CheckStatus::Fail, BASE), None);
        assert_eq!(next_wait(w, CheckStatus::Submitted, BASE), None);
    }

    #[test]
    fn wait_queue_pops_earliest_then_fifo() {
        let t0 = Instant::now();
        let mut q = WaitQueue::new();
        q.push("late", BASE, t0 + Duration::from_secs(90));
        q.push("first", BASE, t0 + Duration::from_secs(10));
        q.push("tie", BASE, t0 + Duration::from_secs(10));
        let order: Vec<String> = std::iter::from_fn(|| q.pop().map(|e| e.alpha_id)).collect();
        assert_eq!(order, vec!["first", "tie", "late"]);
    }

    #[tokio::test]
    async fn check_one_sleeps_the_backoff_sequence() {
        use CheckStatus::*;
        let probe = Arc::new(ScriptedProbe::with(&[(
            "A1",
            &[Pending, Pending, Pending, Waiting, Pending, Fail],
        )]));
        let clock = Arc::new(ManualClock::new());
        let sched = CheckScheduler::new(probe.clone(), clock.clone(), BASE);

        assert_eq!(sched.check_one("A1").await, Fail);
        let secs: Vec<u64> = clock.sleeps().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![30, 60, 120, 30, 60]);
        assert_eq!(probe.log().len(), 6);
    }

    #[tokio::test]
    async fn sweep_bounds_window_and_services_soonest_first() {
        use CheckStatus::*;
        // A 需要两次 Pending（30s、60s），B 一次 Waiting（30s），C 直接结束
        let probe = Arc::new(ScriptedProbe::with(&[
            ("A", &[Pending, Pending, Pass]),
            ("B", &[Waiting, Active]),
            ("C", &[Fail]),
        ]));
        let clock = Arc::new(ManualClock::new());
        let sched = CheckScheduler::new(probe.clone(), clock.clone(), BASE);

        let report = sched
            .sweep(vec!["A".into(), "B".into(), "C".into()], 2)
            .await;

        assert_eq!(report.max_active, 2);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.count(Pass), 1);
        assert_eq!(report.count(Active), 1);
        assert_eq!(report.count(Fail), 1);
        // C 只有在 B 终结腾出窗口后才被检查
        assert_eq!(probe.log(), vec!["A", "B", "A", "B", "C", "A"]);
    }

    #[tokio::test]
    async fn sweep_reschedules_are_monotonic() {
        use CheckStatus::*;
        let probe = Arc::new(ScriptedProbe::with(&[("A", &[Pending, Pending, Error, Pending, Pass])]));
        let clock = Arc::new(ManualClock::new());
        let sched = CheckScheduler::new(probe, clock.clone(), BASE);

        let report = sched.sweep(vec!["A".into()], 2).await;
        assert_eq!(report.results, vec![("A".to_string(), Pass)]);
        let secs: Vec<u64> = clock.sleeps().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![30, 60, 30, 60]);
    }

    #[tokio::test]
    async fn empty_backlog_is_a_no_op() {
        let sched = CheckScheduler::new(
            Arc::new(ScriptedProbe::default()),
            Arc::new(ManualClock::new()),
            BASE,
        );
        let report = sched.sweep(Vec::new(), 2).await;
        assert!(report.results.is_empty());
        assert_eq!(report.attempts, 0);
    }
}
