//! Per-project traffic-rate tracking with an exponentially smoothed baseline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{Expiry, TtlCache};

/// Minimum window length before a rate is computed.
pub const MIN_WINDOW: Duration = Duration::from_secs(60);
/// Windows untouched for this long are dropped, baseline included.
pub const IDLE_EXPIRY: Duration = Duration::from_secs(600);
pub const SPIKE_MULTIPLIER: f64 = 2.0;
/// Events per minute a spike must exceed regardless of baseline.
pub const SPIKE_FLOOR_PER_MINUTE: f64 = 10.0;
const SMOOTHING: f64 = 0.1;
const MAX_TRACKED_PROJECTS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSpike {
    pub project_id: String,
    pub current_rate: f64,
    pub baseline_rate: f64,
    pub event_count: u64,
    pub window_seconds: u64,
}

#[derive(Debug)]
pub struct TrafficWindow {
    started_at: Instant,
    count: u64,
    baseline: Option<f64>,
}

enum Observation {
    Pending,
    Settled,
    Spike {
        current: f64,
        baseline: f64,
        count: u64,
        elapsed: Duration,
    },
}

impl TrafficWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            count: 0,
            baseline: None,
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn restart(&mut self, now: Instant) {
        self.started_at = now;
        self.count = 0;
    }

    /// Count one event. Once the window is at least a minute old it is
    /// closed: its rate is compared against the baseline and a new window
    /// starts at `now`, whether or not a spike fired. Each rate therefore
    /// covers only the events of its own window. A spike leaves the baseline
    /// untouched; a quiet window folds its rate into the baseline.
    fn observe(&mut self, now: Instant) -> Observation {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed < MIN_WINDOW {
            return Observation::Pending;
        }
        let current = self.count as f64 / (elapsed.as_secs_f64() / 60.0);
        let count = self.count;
        self.restart(now);

        let Some(baseline) = self.baseline else {
            self.baseline = Some(current);
            return Observation::Settled;
        };
        if current >= SPIKE_MULTIPLIER * baseline && current > SPIKE_FLOOR_PER_MINUTE {
            return Observation::Spike {
                current,
                baseline,
                count,
                elapsed,
            };
        }
        self.baseline = Some((1.0 - SMOOTHING) * baseline + SMOOTHING * current);
        Observation::Settled
    }
}

/// Shared spike detector. Each project's window sits behind its own lock so
/// concurrent events for one project never lose an increment.
pub struct SpikeDetector {
    windows: TtlCache<String, Arc<Mutex<TrafficWindow>>>,
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpikeDetector {
    pub fn new() -> Self {
        Self {
            windows: TtlCache::new(Expiry::AfterAccess(IDLE_EXPIRY), MAX_TRACKED_PROJECTS),
        }
    }

    pub async fn record(&self, project_id: &str) -> Option<TrafficSpike> {
        self.record_at(project_id, Instant::now()).await
    }

    pub async fn record_at(&self, project_id: &str, now: Instant) -> Option<TrafficSpike> {
        let window = self
            .windows
            .get_or_insert_with(project_id.to_string(), || {
                Arc::new(Mutex::new(TrafficWindow::new(now)))
            })
            .await;
        let mut window = window.lock().await;
        match window.observe(now) {
            Observation::Spike {
                current,
                baseline,
                count,
                elapsed,
            } => {
                tracing::info!(
                    project_id,
                    current_rate = current,
                    baseline_rate = baseline,
                    "Traffic spike detected"
                );
                Some(TrafficSpike {
                    project_id: project_id.to_string(),
                    current_rate: current,
                    baseline_rate: baseline,
                    event_count: count,
                    window_seconds: elapsed.as_secs(),
                })
            }
            Observation::Pending | Observation::Settled => None,
        }
    }

    pub async fn baseline(&self, project_id: &str) -> Option<f64> {
        let window = self.windows.get(&project_id.to_string()).await?;
        let baseline = window.lock().await.baseline();
        baseline
    }

    pub async fn tracked_projects(&self) -> usize {
        self.windows.len().await
    }
}
