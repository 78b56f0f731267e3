//! Performance monitor — per-tier latency accounting against targets.
//!
//! A passive observer: the controller records one sample per turn and
//! diagnostics callers read snapshots. Nothing here feeds back into routing.
//!
//! Each tier keeps a bounded ring buffer of its most recent samples. Rates and
//! averages are computed over those buffers; violation counters are lifetime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::types::{ComplexityTier, PerformanceSample};
use crate::config::MonitorConfig;

/// Violations kept for the summary's recent list.
const RECENT_VIOLATIONS: usize = 20;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Derived health tag over the rolling target-met rate of all tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Degraded,
}

impl PerformanceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling statistics for one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    /// Samples currently in the tier's buffer.
    pub count: usize,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    /// `(count - misses) / count` over the buffer; 1.0 with no samples.
    pub target_met_rate: f64,
    pub target_ms: Option<u64>,
}

impl TierStats {
    fn empty() -> Self {
        Self {
            count: 0,
            avg_latency_ms: 0.0,
            max_latency_ms: 0,
            target_met_rate: 1.0,
            target_ms: None,
        }
    }
}

/// Whole-runtime snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub performance_level: PerformanceLevel,
    /// Lifetime count of samples that missed their target.
    pub violations: u64,
    pub total_samples: u64,
    /// Rolling rate across every tier's buffer.
    pub target_met_rate: f64,
    pub tiers: BTreeMap<ComplexityTier, TierStats>,
    pub recent_violations: Vec<PerformanceSample>,
}

// ─── Monitor ────────────────────────────────────────────────────────────────

struct MonitorState {
    buffers: [VecDeque<PerformanceSample>; 4],
    total_samples: u64,
    violations: u64,
    recent_violations: VecDeque<PerformanceSample>,
    level: PerformanceLevel,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            buffers: Default::default(),
            total_samples: 0,
            violations: 0,
            recent_violations: VecDeque::new(),
            level: PerformanceLevel::Excellent,
        }
    }

    /// (samples, met) across all buffers.
    fn rolling_counts(&self) -> (usize, usize) {
        self.buffers.iter().fold((0, 0), |(n, met), buf| {
            (n + buf.len(), met + buf.iter().filter(|s| s.met_target).count())
        })
    }
}

/// Thread-safe sample recorder. Share behind an `Arc` or a reference.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a sample, evicting the tier's oldest when its buffer is full.
    pub fn record(&self, sample: PerformanceSample) {
        let capacity = self.config.buffer_size.max(1);
        let mut state = self.lock();

        if !sample.met_target {
            state.violations += 1;
            tracing::debug!(
                tier = %sample.tier,
                latency_ms = sample.latency_ms,
                target_ms = sample.target_ms,
                "latency target missed"
            );
            state.recent_violations.push_back(sample.clone());
            while state.recent_violations.len() > RECENT_VIOLATIONS {
                state.recent_violations.pop_front();
            }
        }

        state.total_samples += 1;
        let buffer = &mut state.buffers[sample.tier.index()];
        buffer.push_back(sample);
        while buffer.len() > capacity {
            buffer.pop_front();
        }

        let level = self.level_for(&state);
        let previous = state.level;
        if level != previous {
            state.level = level;
            let (samples, met) = state.rolling_counts();
            if level == PerformanceLevel::Degraded {
                tracing::warn!(
                    from = %previous,
                    samples,
                    met,
                    "performance degraded: tiers are missing latency targets"
                );
            } else if previous == PerformanceLevel::Degraded {
                tracing::info!(to = %level, samples, met, "performance recovered");
            } else {
                tracing::debug!(from = %previous, to = %level, "performance level changed");
            }
        }
    }

    fn level_for(&self, state: &MonitorState) -> PerformanceLevel {
        let (samples, met) = state.rolling_counts();
        if samples < self.config.min_samples_for_level.max(1) {
            return PerformanceLevel::Excellent;
        }
        let rate = met as f64 / samples as f64;
        if rate >= self.config.excellent_rate {
            PerformanceLevel::Excellent
        } else if rate >= self.config.good_rate {
            PerformanceLevel::Good
        } else {
            PerformanceLevel::Degraded
        }
    }

    pub fn get_stats(&self, tier: ComplexityTier) -> TierStats {
        let state = self.lock();
        tier_stats(&state.buffers[tier.index()])
    }

    pub fn get_overall_summary(&self) -> PerformanceSummary {
        let state = self.lock();
        let (samples, met) = state.rolling_counts();
        PerformanceSummary {
            performance_level: state.level,
            violations: state.violations,
            total_samples: state.total_samples,
            target_met_rate: if samples == 0 {
                1.0
            } else {
                met as f64 / samples as f64
            },
            tiers: ComplexityTier::ALL
                .into_iter()
                .map(|tier| (tier, tier_stats(&state.buffers[tier.index()])))
                .collect(),
            recent_violations: state.recent_violations.iter().cloned().collect(),
        }
    }

    /// Drop every sample and counter.
    pub fn reset(&self) {
        *self.lock() = MonitorState::new();
        tracing::info!("performance monitor reset");
    }
}

fn tier_stats(buffer: &VecDeque<PerformanceSample>) -> TierStats {
    if buffer.is_empty() {
        return TierStats::empty();
    }
    let count = buffer.len();
    let total: u64 = buffer.iter().map(|s| s.latency_ms).sum();
    let met = buffer.iter().filter(|s| s.met_target).count();
    TierStats {
        count,
        avg_latency_ms: total as f64 / count as f64,
        max_latency_ms: buffer.iter().map(|s| s.latency_ms).max().unwrap_or(0),
        target_met_rate: met as f64 / count as f64,
        target_ms: buffer.back().map(|s| s.target_ms),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
