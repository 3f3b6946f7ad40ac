use super::model::Outcome;
use crate::check::CheckStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    n: u64,
    mean: f64,
}

impl RunningMean {
    fn push(&mut self, v: f64) {
        self.n += 1;
        self.mean += (v - self.mean) / self.n as f64;
    }

    fn value(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }
}

/// 工作池统计，由池持有，汇报任务只读快照
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    pass: AtomicU64,
    fail: AtomicU64,
    active: AtomicU64,
    retained: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
    means: Mutex<(RunningMean, RunningMean)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub pass: u64,
    pub fail: u64,
    pub active: u64,
    pub retained: u64,
    pub discarded: u64,
    pub dropped: u64,
    pub requeued: u64,
    pub mean_sharpe: Option<f64>,
    pub mean_fitness: Option<f64>,
}

impl StatsSnapshot {
    pub fn pass_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.pass as f64 / self.completed as f64
        }
    }
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed {
                status,
                retained,
                sharpe,
                fitness,
                ..
            } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                match status {
                    CheckStatus::Pass => self.pass.fetch_add(1, Ordering::Relaxed),
                    CheckStatus::Fail => self.fail.fetch_add(1, Ordering::Relaxed),
                    CheckStatus::Active | CheckStatus::Submitted => {
                        self.active.fetch_add(1, Ordering::Relaxed)
                    }
                    _ => 0,
                };
                if *retained {
                    self.retained.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                }
                if let Ok(mut m) = self.means.lock() {
                    if let Some(s) = sharpe {
                        m.0.push(*s);
                    }
                    if let Some(f) = fitness {
                        m.1.push(*f);
                    }
                }
            }
            Outcome::Dropped { .. } => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Requeued { .. } => {
                self.requeued.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (sharpe, fitness) = self
            .means
            .lock()
            .map(|m| (m.0.value(), m.1.value()))
            .unwrap_or((None, None));
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            pass: self.pass.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            mean_sharpe: sharpe,
            mean_fitness: fitness,
        }
    }
}
