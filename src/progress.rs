use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::{ProbeObserver, UnitDone};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    scanned: u64,
    open: u64,
}

/// Live counters for one scan. Create a fresh one per scan; counters only ever grow.
///
/// Increments take the lock for exactly one counter bump. The derived metrics read a
/// snapshot and may be slightly stale, which is fine since they only feed the display.
#[derive(Debug)]
pub struct LiveStats {
    total: u64,
    started: Instant,
    counters: Mutex<Counters>,
}

/// Point-in-time view of a [`LiveStats`], suitable for rendering or JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub rate: f64,
    pub percent: f64,
    pub eta_secs: u64,
}

impl LiveStats {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_scanned(&self) {
        self.lock().scanned += 1;
    }

    pub fn increment_open(&self) {
        self.lock().open += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn scanned(&self) -> u64 {
        self.lock().scanned
    }

    pub fn open(&self) -> u64 {
        self.lock().open
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Units completed per second since the scan started.
    pub fn rate(&self) -> f64 {
        rate_for(self.scanned(), self.elapsed())
    }

    /// Percentage of units completed, 0 for an empty scan.
    pub fn progress_percent(&self) -> f64 {
        percent_for(self.scanned(), self.total)
    }

    /// Estimated time until every unit has completed at the current rate.
    pub fn eta(&self) -> Duration {
        let scanned = self.scanned();
        eta_for(self.total, scanned, rate_for(scanned, self.elapsed()))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let Counters { scanned, open } = *self.lock();
        let rate = rate_for(scanned, self.elapsed());
        ProgressSnapshot {
            total: self.total,
            scanned,
            open,
            rate,
            percent: percent_for(scanned, self.total),
            eta_secs: eta_for(self.total, scanned, rate).as_secs(),
        }
    }

    /// One line summary, e.g. `Scanned 1024 ports in 2.31s (443 ports/sec), 3 open`.
    pub fn summary(&self) -> String {
        let Counters { scanned, open } = *self.lock();
        let elapsed = self.elapsed();
        format!(
            "Scanned {scanned} ports in {:.2}s ({:.0} ports/sec), {open} open",
            elapsed.as_secs_f64(),
            rate_for(scanned, elapsed)
        )
    }
}

impl ProbeObserver for LiveStats {
    fn unit_completed(&self, done: UnitDone) {
        if done.open {
            self.increment_open();
        }
        self.increment_scanned();
    }
}

fn rate_for(scanned: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    scanned as f64 / secs
}

fn percent_for(scanned: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    scanned as f64 / total as f64 * 100.0
}

fn eta_for(total: u64, scanned: u64, rate: f64) -> Duration {
    if rate <= 0.0 {
        return Duration::ZERO;
    }
    let remaining = total.saturating_sub(scanned);
    Duration::from_secs_f64(remaining as f64 / rate)
}
