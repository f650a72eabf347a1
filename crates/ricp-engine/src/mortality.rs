//! Longitudinal shape mortality tracking.
//!
//! The tracker persists one record per shape across runs. A shape's
//! overall survival rate is the minimum of its per-handoff rates, never
//! the average: one reliably lethal handoff makes the shape unreliable no
//! matter how well the rest of the pipeline treats it.
//!
//! Classification thresholds and the trend window are fixed constants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetMatrix;
use crate::rsr::{Rsr, MILLION};
use crate::shape::ShapeCatalog;
use crate::stage::Handoff;
use crate::trace::ShapeTraceResult;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Overall rate at or above this is healthy.
const HEALTHY_THRESHOLD: i64 = 950_000;

/// Overall rate at or above this (but below healthy) is flaky.
const FLAKY_THRESHOLD: i64 = 700_000;

/// Sliding window length for trend computation, in runs.
const TREND_WINDOW: usize = 5;

/// Minimum samples before a trend other than `Stable` can be reported.
const TREND_MIN_SAMPLES: usize = 3;

/// Trend delta threshold: ten percentage points.
const TREND_DELTA: i64 = MILLION / 10;

// ---------------------------------------------------------------------------
// MortalityStatus / SurvivalTrend
// ---------------------------------------------------------------------------

/// Longitudinal reliability classification for one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MortalityStatus {
    Healthy,
    Flaky,
    /// Healthy or flaky by rate, but the trend is declining.
    Degrading,
    SystemicallyBroken,
}

impl MortalityStatus {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Flaky => "flaky",
            Self::Degrading => "degrading",
            Self::SystemicallyBroken => "systemically_broken",
        }
    }
}

impl fmt::Display for MortalityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a shape's recent survival history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SurvivalTrend {
    Improving,
    Stable,
    Declining,
}

impl SurvivalTrend {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        }
    }
}

impl fmt::Display for SurvivalTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HandoffMortality
// ---------------------------------------------------------------------------

/// Pass/death counters for one shape at one handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HandoffMortality {
    pub passes: u64,
    pub deaths: u64,
}

impl HandoffMortality {
    pub fn observations(self) -> u64 {
        self.passes + self.deaths
    }

    /// Survival rate `passes / (passes + deaths)`; `FULL` with no
    /// observations.
    pub fn rate(self) -> Rsr {
        if self.observations() == 0 {
            Rsr::FULL
        } else {
            Rsr::from_ratio(self.passes as usize, self.observations() as usize)
        }
    }
}

// ---------------------------------------------------------------------------
// MortalityRecord
// ---------------------------------------------------------------------------

/// Longitudinal reliability profile for one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MortalityRecord {
    pub shape_id: String,
    pub per_handoff: BTreeMap<Handoff, HandoffMortality>,
    /// Overall survival rate of the last [`TREND_WINDOW`] runs, oldest
    /// first.
    pub recent_rates: Vec<Rsr>,
    pub runs_observed: u64,
}

impl MortalityRecord {
    fn new(shape_id: &str) -> Self {
        Self {
            shape_id: shape_id.to_string(),
            per_handoff: BTreeMap::new(),
            recent_rates: Vec::new(),
            runs_observed: 0,
        }
    }

    /// Overall survival rate: the minimum across handoffs with
    /// observations. Weakest-link semantics, not an average.
    pub fn overall_rate(&self) -> Rsr {
        self.per_handoff
            .values()
            .filter(|m| m.observations() > 0)
            .map(|m| m.rate())
            .min()
            .unwrap_or(Rsr::FULL)
    }

    /// Trend over the recent-rate window. Fewer than
    /// [`TREND_MIN_SAMPLES`] samples is `Stable` by default.
    pub fn trend(&self) -> SurvivalTrend {
        if self.recent_rates.len() < TREND_MIN_SAMPLES {
            return SurvivalTrend::Stable;
        }
        let mid = self.recent_rates.len() / 2;
        let first = mean_millionths(&self.recent_rates[..mid]);
        let second = mean_millionths(&self.recent_rates[mid..]);
        let delta = second - first;
        if delta < -TREND_DELTA {
            SurvivalTrend::Declining
        } else if delta > TREND_DELTA {
            SurvivalTrend::Improving
        } else {
            SurvivalTrend::Stable
        }
    }

    /// Classification from the fixed thresholds, with declining healthy or
    /// flaky shapes reclassified as degrading.
    pub fn classification(&self) -> MortalityStatus {
        let rate = self.overall_rate().millionths();
        let base = if rate >= HEALTHY_THRESHOLD {
            MortalityStatus::Healthy
        } else if rate >= FLAKY_THRESHOLD {
            MortalityStatus::Flaky
        } else {
            MortalityStatus::SystemicallyBroken
        };
        if matches!(base, MortalityStatus::Healthy | MortalityStatus::Flaky)
            && self.trend() == SurvivalTrend::Declining
        {
            MortalityStatus::Degrading
        } else {
            base
        }
    }

    pub fn total_deaths(&self) -> u64 {
        self.per_handoff.values().map(|m| m.deaths).sum()
    }
}

fn mean_millionths(rates: &[Rsr]) -> i64 {
    if rates.is_empty() {
        return MILLION;
    }
    rates.iter().map(|r| r.millionths()).sum::<i64>() / rates.len() as i64
}

// ---------------------------------------------------------------------------
// MortalityAnalysis
// ---------------------------------------------------------------------------

/// Summary of the tracked population, produced per run for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MortalityAnalysis {
    pub total_shapes: usize,
    pub counts_by_status: BTreeMap<MortalityStatus, usize>,
    /// Shapes ascending by overall rate: the weakest first.
    pub most_vulnerable: Vec<(String, Rsr)>,
    /// Handoffs descending by total death count: the deadliest first.
    pub most_dangerous_handoffs: Vec<(Handoff, u64)>,
}

// ---------------------------------------------------------------------------
// MortalityTracker
// ---------------------------------------------------------------------------

/// Updates and queries the persisted mortality records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MortalityTracker {
    records: BTreeMap<String, MortalityRecord>,
}

impl MortalityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one run's traces. For every traced catalog shape and every
    /// handoff it crosses to reach its target stage: a death where the
    /// trace carries a loss the budget matrix does not tolerate, a pass
    /// otherwise. Tolerated losses do not count against survival.
    pub fn record_run(
        &mut self,
        catalog: &ShapeCatalog,
        budgets: &BudgetMatrix,
        traces: &[ShapeTraceResult],
    ) {
        for trace in traces {
            let Some(decl) = catalog.shape(&trace.shape_id) else {
                continue;
            };
            let record = self
                .records
                .entry(trace.shape_id.clone())
                .or_insert_with(|| MortalityRecord::new(&trace.shape_id));
            for handoff in Handoff::crossed_to_reach(decl.must_reach) {
                let died = trace.losses_at(*handoff).iter().any(|loss| {
                    !budgets.is_tolerated_loss(*handoff, decl.category, loss.loss_class)
                });
                let counters = record.per_handoff.entry(*handoff).or_default();
                if died {
                    counters.deaths += 1;
                } else {
                    counters.passes += 1;
                }
            }
            record.runs_observed += 1;
            let rate = record.overall_rate();
            record.recent_rates.push(rate);
            if record.recent_rates.len() > TREND_WINDOW {
                let excess = record.recent_rates.len() - TREND_WINDOW;
                record.recent_rates.drain(..excess);
            }
        }
    }

    pub fn record(&self, shape_id: &str) -> Option<&MortalityRecord> {
        self.records.get(shape_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `n` weakest shapes, ascending by overall rate.
    pub fn most_vulnerable(&self, n: usize) -> Vec<(String, Rsr)> {
        let mut rates: Vec<(String, Rsr)> = self
            .records
            .values()
            .map(|r| (r.shape_id.clone(), r.overall_rate()))
            .collect();
        rates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        rates.truncate(n);
        rates
    }

    /// The `n` deadliest handoffs, descending by total death count.
    pub fn most_dangerous_handoffs(&self, n: usize) -> Vec<(Handoff, u64)> {
        let mut deaths: BTreeMap<Handoff, u64> = BTreeMap::new();
        for record in self.records.values() {
            for (handoff, counters) in &record.per_handoff {
                *deaths.entry(*handoff).or_default() += counters.deaths;
            }
        }
        let mut ranked: Vec<(Handoff, u64)> = deaths.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Population summary for the run report.
    pub fn analysis(&self) -> MortalityAnalysis {
        let mut counts_by_status: BTreeMap<MortalityStatus, usize> = BTreeMap::new();
        for record in self.records.values() {
            *counts_by_status.entry(record.classification()).or_default() += 1;
        }
        MortalityAnalysis {
            total_shapes: self.records.len(),
            counts_by_status,
            most_vulnerable: self.most_vulnerable(5),
            most_dangerous_handoffs: self.most_dangerous_handoffs(5),
        }
    }

    /// Drop every record. The only deletion path.
    pub fn reset(&mut self) {
        self.records.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::LossClass;
    use crate::shape::builtin_catalog;
    use crate::trace::HandoffLoss;

    fn fixtures() -> (ShapeCatalog, BudgetMatrix) {
        (builtin_catalog(), BudgetMatrix::builtin())
    }

    fn lossy_trace(shape_id: &str, run_id: &str, handoff: Handoff) -> ShapeTraceResult {
        ShapeTraceResult::new(shape_id, run_id).with_loss(HandoffLoss::new(
            handoff,
            LossClass::PartialOmission,
            &["a"],
        ))
    }

    #[test]
    fn overall_rate_is_minimum_not_average() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        // Four clean runs, then one death at a single handoff. The lethal
        // handoff sits at 4/5 = 0.8 while every other handoff is at 1.0;
        // an average would hide the weak link.
        for i in 0..4 {
            tracker.record_run(
                &catalog,
                &budgets,
                &[ShapeTraceResult::new("PAGINATION_CAPABILITY", format!("run-{i}"))],
            );
        }
        tracker.record_run(
            &catalog,
            &budgets,
            &[lossy_trace("PAGINATION_CAPABILITY", "run-4", Handoff::CompositionToWireframe)],
        );
        let record = tracker.record("PAGINATION_CAPABILITY").unwrap();
        assert_eq!(record.overall_rate(), Rsr::from_ratio(4, 5));
        let average: i64 = record
            .per_handoff
            .values()
            .map(|m| m.rate().millionths())
            .sum::<i64>()
            / record.per_handoff.len() as i64;
        assert!(average > record.overall_rate().millionths());
    }

    #[test]
    fn tolerated_losses_count_as_passes() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        // Summarization at the first handoff is inside the stateful budget.
        let trace = ShapeTraceResult::new("PAGINATION_CAPABILITY", "run-0").with_loss(
            HandoffLoss::new(Handoff::IntakeToDistillation, LossClass::Summarization, &[]),
        );
        tracker.record_run(&catalog, &budgets, &[trace]);
        let record = tracker.record("PAGINATION_CAPABILITY").unwrap();
        assert_eq!(record.total_deaths(), 0);
        assert_eq!(record.overall_rate(), Rsr::FULL);
    }

    #[test]
    fn classification_thresholds() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        // 20 runs: kill the shape in 8 of them at one handoff -> 0.6 there.
        for i in 0..20 {
            let trace = if i % 5 < 2 {
                lossy_trace("FORM_VALIDATION_CAPABILITY", &format!("run-{i}"), Handoff::WireframeToPixelRender)
            } else {
                ShapeTraceResult::new("FORM_VALIDATION_CAPABILITY", format!("run-{i}"))
            };
            tracker.record_run(&catalog, &budgets, &[trace]);
        }
        let record = tracker.record("FORM_VALIDATION_CAPABILITY").unwrap();
        assert_eq!(record.overall_rate(), Rsr::from_ratio(12, 20));
        assert_eq!(record.classification(), MortalityStatus::SystemicallyBroken);
    }

    #[test]
    fn declining_trend_reclassifies_to_degrading() {
        let mut record = MortalityRecord::new("S");
        record.per_handoff.insert(
            Handoff::IntakeToDistillation,
            HandoffMortality { passes: 97, deaths: 3 },
        );
        // Rate 0.97 -> healthy by threshold, but the window collapses from
        // full survival to 0.7 across the halves.
        record.recent_rates = vec![
            Rsr::FULL,
            Rsr::FULL,
            Rsr::from_millionths(700_000),
            Rsr::from_millionths(700_000),
            Rsr::from_millionths(700_000),
        ];
        assert_eq!(record.trend(), SurvivalTrend::Declining);
        assert_eq!(record.classification(), MortalityStatus::Degrading);
    }

    #[test]
    fn improving_trend_detected() {
        let mut record = MortalityRecord::new("S");
        record.recent_rates = vec![
            Rsr::from_millionths(600_000),
            Rsr::from_millionths(600_000),
            Rsr::FULL,
            Rsr::FULL,
            Rsr::FULL,
        ];
        assert_eq!(record.trend(), SurvivalTrend::Improving);
    }

    #[test]
    fn short_history_is_stable_by_default() {
        let mut record = MortalityRecord::new("S");
        record.recent_rates = vec![Rsr::FULL, Rsr::ZERO];
        assert_eq!(record.trend(), SurvivalTrend::Stable);
    }

    #[test]
    fn window_keeps_only_last_five_runs() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        for i in 0..8 {
            tracker.record_run(
                &catalog,
                &budgets,
                &[ShapeTraceResult::new("MOTION_CAPABILITY", format!("run-{i}"))],
            );
        }
        let record = tracker.record("MOTION_CAPABILITY").unwrap();
        assert_eq!(record.recent_rates.len(), TREND_WINDOW);
        assert_eq!(record.runs_observed, 8);
    }

    #[test]
    fn vulnerable_and_dangerous_rankings() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        tracker.record_run(
            &catalog,
            &budgets,
            &[
                lossy_trace("PAGINATION_CAPABILITY", "run-0", Handoff::CompositionToWireframe),
                ShapeTraceResult::new("MOTION_CAPABILITY", "run-0"),
            ],
        );
        let vulnerable = tracker.most_vulnerable(2);
        assert_eq!(vulnerable[0].0, "PAGINATION_CAPABILITY");
        assert!(vulnerable[0].1 < vulnerable[1].1);
        let dangerous = tracker.most_dangerous_handoffs(1);
        assert_eq!(dangerous[0], (Handoff::CompositionToWireframe, 1));
    }

    #[test]
    fn analysis_counts_population() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        tracker.record_run(
            &catalog,
            &budgets,
            &[
                ShapeTraceResult::new("MOTION_CAPABILITY", "run-0"),
                ShapeTraceResult::new("PAGINATION_CAPABILITY", "run-0"),
            ],
        );
        let analysis = tracker.analysis();
        assert_eq!(analysis.total_shapes, 2);
        assert_eq!(analysis.counts_by_status.get(&MortalityStatus::Healthy), Some(&2));
    }

    #[test]
    fn reset_is_the_only_deletion_path() {
        let (catalog, budgets) = fixtures();
        let mut tracker = MortalityTracker::new();
        tracker.record_run(
            &catalog,
            &budgets,
            &[ShapeTraceResult::new("MOTION_CAPABILITY", "run-0")],
        );
        assert_eq!(tracker.len(), 1);
        tracker.reset();
        assert!(tracker.is_empty());
    }
}
