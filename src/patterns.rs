//! Activity pattern detection
//!
//! Works on fixed-size time buckets over the recent event timeline:
//!
//! - **bursts**: hourly count above a multiple of the trailing-day baseline
//! - **cycles**: same-hour or same-weekday counts with low variance
//! - **trends**: sustained rise or fall across daily buckets (least-squares
//!   slope gated by Pearson correlation)
//! - **anomalies**: daily counts more than a few standard deviations out
//!
//! A refresh drops previously stored patterns whose window overlaps the
//! lookback period (they are re-detected from scratch), so patterns never
//! duplicate while history older than the lookback ages out via pruning.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::constants::{
    PATTERN_ANOMALY_SIGMA, PATTERN_BURST_MULTIPLIER, PATTERN_CYCLE_MAX_CV, PATTERN_LOOKBACK_DAYS,
    PATTERN_MIN_BUCKET_EVENTS, PATTERN_TREND_MIN_CORRELATION, PATTERN_TREND_MIN_SLOPE,
};
use crate::errors::Result;
use crate::graph::types::{DetectedPattern, Node, PatternId, PatternKind};
use crate::graph::GraphStore;

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// What a pattern refresh produced
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PatternReport {
    pub bursts: usize,
    pub cycles: usize,
    pub trends: usize,
    pub anomalies: usize,
    pub replaced: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl PatternReport {
    pub fn total(&self) -> usize {
        self.bursts + self.cycles + self.trends + self.anomalies
    }
}

pub struct PatternDetector {
    lookback_days: i64,
}

impl PatternDetector {
    pub fn new() -> Self {
        Self {
            lookback_days: PATTERN_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    /// Re-detect patterns over the lookback window and replace the stored
    /// patterns that window covers
    pub fn refresh(&self, store: &GraphStore, token: &CancelToken) -> Result<PatternReport> {
        let start = Instant::now();
        let mut report = PatternReport::default();
        let now = Utc::now();
        let window_start = now - Duration::days(self.lookback_days);

        let mut nodes = store.nodes_in_time_range(window_start, now)?;
        nodes.retain(|n| !n.is_pruned);

        if token.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let mut detected = Vec::new();
        detected.extend(self.detect_bursts(&nodes, now));
        detected.extend(self.detect_cycles(&nodes, window_start, now));
        if token.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        detected.extend(self.detect_trends(&nodes, window_start, now));
        detected.extend(self.detect_anomalies(&nodes, window_start, now));

        for pattern in &detected {
            match pattern.kind {
                PatternKind::Burst => report.bursts += 1,
                PatternKind::Cycle => report.cycles += 1,
                PatternKind::Trend => report.trends += 1,
                PatternKind::Anomaly => report.anomalies += 1,
            }
        }

        if token.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        // Replace the stored patterns this run re-covers
        let stale: Vec<PatternId> = store
            .patterns()?
            .iter()
            .filter(|p| p.window_end >= window_start)
            .map(|p| p.id)
            .collect();
        report.replaced = stale.len();
        if !stale.is_empty() {
            store.delete_patterns(&stale)?;
        }
        if !detected.is_empty() {
            store.store_patterns(&detected)?;
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "Pattern refresh: {} bursts, {} cycles, {} trends, {} anomalies ({} replaced) in {}ms",
            report.bursts,
            report.cycles,
            report.trends,
            report.anomalies,
            report.replaced,
            report.elapsed_ms
        );
        Ok(report)
    }

    // =========================================================================
    // DETECTORS
    // Each consumes the same node list and buckets it as needed.
    // =========================================================================

    /// Hourly counts against a trailing-24h baseline. Consecutive bursting
    /// hours collapse into one pattern spanning the whole spike.
    fn detect_bursts(&self, nodes: &[Node], now: DateTime<Utc>) -> Vec<DetectedPattern> {
        let buckets = hourly_buckets(nodes, now, self.lookback_days * 24);
        let mut patterns = Vec::new();
        let mut open: Option<(usize, usize, f64)> = None; // (start, end, peak ratio)

        for i in 24..buckets.len() {
            let baseline: f64 =
                buckets[i - 24..i].iter().map(|b| b.count as f64).sum::<f64>() / 24.0;
            let count = buckets[i].count;
            let ratio = if baseline > 0.0 {
                count as f64 / baseline
            } else if count >= PATTERN_MIN_BUCKET_EVENTS {
                PATTERN_BURST_MULTIPLIER + 1.0
            } else {
                0.0
            };

            let bursting = count >= PATTERN_MIN_BUCKET_EVENTS && ratio > PATTERN_BURST_MULTIPLIER;
            if bursting {
                match open.as_mut() {
                    Some((_, end, peak)) => {
                        *end = i;
                        *peak = peak.max(ratio);
                    }
                    None => open = Some((i, i, ratio)),
                }
            } else if let Some((start, end, peak)) = open.take() {
                patterns.push(self.burst_pattern(&buckets, start, end, peak, now));
            }
        }
        if let Some((start, end, peak)) = open {
            patterns.push(self.burst_pattern(&buckets, start, end, peak, now));
        }
        patterns
    }

    fn burst_pattern(
        &self,
        buckets: &[HourBucket],
        start: usize,
        end: usize,
        peak_ratio: f64,
        now: DateTime<Utc>,
    ) -> DetectedPattern {
        let window_start = buckets[start].start;
        let window_end = buckets[end].start + Duration::hours(1);
        let total: u64 = buckets[start..=end].iter().map(|b| b.count).sum();
        DetectedPattern {
            id: PatternId::new(),
            kind: PatternKind::Burst,
            confidence: (peak_ratio / (2.0 * PATTERN_BURST_MULTIPLIER)).min(1.0),
            window_start,
            window_end,
            description: format!(
                "activity burst: {} events at {:.1}x the trailing baseline",
                total, peak_ratio
            ),
            magnitude: peak_ratio,
            detected_at: now,
        }
    }

    /// Same-hour-of-day and same-weekday regularity. A slot qualifies when
    /// it is active on most days and its counts barely vary.
    fn detect_cycles(
        &self,
        nodes: &[Node],
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let mut patterns = Vec::new();
        let days = self.lookback_days.max(1);

        // Hour-of-day: one count per (day, hour) slot
        for hour in 0..24u32 {
            let mut per_day = vec![0u64; days as usize];
            for node in nodes {
                if node.timestamp.hour() == hour {
                    let day = (now - node.timestamp).num_days();
                    if (0..days).contains(&day) {
                        per_day[day as usize] += 1;
                    }
                }
            }
            if let Some((cv, mean)) = regular_cv(&per_day) {
                patterns.push(DetectedPattern {
                    id: PatternId::new(),
                    kind: PatternKind::Cycle,
                    confidence: (1.0 - cv).clamp(0.0, 1.0),
                    window_start,
                    window_end: now,
                    description: format!(
                        "daily cycle: ~{:.1} events around {:02}:00 each day",
                        mean, hour
                    ),
                    magnitude: 1.0 - cv,
                    detected_at: now,
                });
            }
        }

        // Weekday: totals per weekday across the weeks in the window
        let weeks = (days / 7).max(1);
        for weekday in 0..7usize {
            let mut per_week = vec![0u64; weeks as usize];
            for node in nodes {
                if node.timestamp.weekday().num_days_from_monday() as usize == weekday {
                    let week = (now - node.timestamp).num_days() / 7;
                    if (0..weeks).contains(&week) {
                        per_week[week as usize] += 1;
                    }
                }
            }
            if let Some((cv, mean)) = regular_cv(&per_week) {
                patterns.push(DetectedPattern {
                    id: PatternId::new(),
                    kind: PatternKind::Cycle,
                    confidence: (1.0 - cv).clamp(0.0, 1.0),
                    window_start,
                    window_end: now,
                    description: format!(
                        "weekly cycle: ~{:.1} events every {}",
                        mean, WEEKDAY_NAMES[weekday]
                    ),
                    magnitude: 1.0 - cv,
                    detected_at: now,
                });
            }
        }
        patterns
    }

    /// Least-squares slope over daily counts, gated by Pearson correlation
    fn detect_trends(
        &self,
        nodes: &[Node],
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let daily = daily_buckets(nodes, now, self.lookback_days);
        if daily.len() < 7 {
            return Vec::new();
        }

        let (slope, correlation) = linear_fit(&daily);
        if correlation.abs() < PATTERN_TREND_MIN_CORRELATION
            || slope.abs() < PATTERN_TREND_MIN_SLOPE
        {
            return Vec::new();
        }

        let direction = if slope > 0.0 { "rising" } else { "falling" };
        vec![DetectedPattern {
            id: PatternId::new(),
            kind: PatternKind::Trend,
            confidence: correlation.abs().min(1.0),
            window_start,
            window_end: now,
            description: format!(
                "{} activity trend: {:+.1} events/day (r={:.2})",
                direction, slope, correlation
            ),
            magnitude: slope,
            detected_at: now,
        }]
    }

    /// Daily counts more than the configured sigma out from the mean
    fn detect_anomalies(
        &self,
        nodes: &[Node],
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let daily = daily_buckets(nodes, now, self.lookback_days);
        if daily.len() < 7 {
            return Vec::new();
        }

        let mean = daily.iter().map(|&c| c as f64).sum::<f64>() / daily.len() as f64;
        let variance = daily
            .iter()
            .map(|&c| (c as f64 - mean).powi(2))
            .sum::<f64>()
            / daily.len() as f64;
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return Vec::new();
        }

        let mut patterns = Vec::new();
        for (day_index, &count) in daily.iter().enumerate() {
            let z = (count as f64 - mean) / stddev;
            if z.abs() > PATTERN_ANOMALY_SIGMA
                && (count >= PATTERN_MIN_BUCKET_EVENTS || z < 0.0)
            {
                // day_index 0 is the oldest day in the window
                let day_start = now - Duration::days(self.lookback_days - day_index as i64);
                let kind_word = if z > 0.0 { "spike" } else { "lull" };
                patterns.push(DetectedPattern {
                    id: PatternId::new(),
                    kind: PatternKind::Anomaly,
                    confidence: (z.abs() / (2.0 * PATTERN_ANOMALY_SIGMA)).min(1.0),
                    window_start: day_start,
                    window_end: day_start + Duration::days(1),
                    description: format!(
                        "daily {} anomaly: {} events vs mean {:.1}",
                        kind_word, count, mean
                    ),
                    magnitude: z,
                    detected_at: now,
                });
            }
        }
        patterns
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BUCKETING & STATS HELPERS
// =============================================================================

struct HourBucket {
    start: DateTime<Utc>,
    count: u64,
}

/// Hourly buckets, oldest first, exactly `hours` long
fn hourly_buckets(nodes: &[Node], now: DateTime<Utc>, hours: i64) -> Vec<HourBucket> {
    let hours = hours.max(1);
    let origin = now - Duration::hours(hours);
    let mut buckets: Vec<HourBucket> = (0..hours)
        .map(|h| HourBucket {
            start: origin + Duration::hours(h),
            count: 0,
        })
        .collect();
    for node in nodes {
        let offset = (node.timestamp - origin).num_hours();
        if (0..hours).contains(&offset) {
            buckets[offset as usize].count += 1;
        }
    }
    buckets
}

/// Daily counts, oldest first
fn daily_buckets(nodes: &[Node], now: DateTime<Utc>, days: i64) -> Vec<u64> {
    let days = days.max(1);
    let origin = now - Duration::days(days);
    let mut buckets = vec![0u64; days as usize];
    for node in nodes {
        let offset = (node.timestamp - origin).num_days();
        if (0..days).contains(&offset) {
            buckets[offset as usize] += 1;
        }
    }
    buckets
}

/// Coefficient of variation for a slot that is active on most days.
/// Returns (cv, mean) only when the slot qualifies as regular.
fn regular_cv(counts: &[u64]) -> Option<(f64, f64)> {
    if counts.len() < 3 {
        return None;
    }
    let active = counts.iter().filter(|&&c| c > 0).count();
    if active * 2 < counts.len() {
        return None; // active less than half the time: not a cycle
    }
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / counts.len() as f64;
    if mean < 1.0 {
        return None;
    }
    let variance = counts
        .iter()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / counts.len() as f64;
    let cv = variance.sqrt() / mean;
    (cv < PATTERN_CYCLE_MAX_CV).then_some((cv, mean))
}

/// Least-squares slope and Pearson correlation of counts against day index
fn linear_fit(counts: &[u64]) -> (f64, f64) {
    let n = counts.len() as f64;
    let mean_x = (counts.len() - 1) as f64 / 2.0;
    let mean_y = counts.iter().map(|&c| c as f64).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (i, &count) in counts.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = count as f64 - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return (0.0, 0.0);
    }
    let slope = cov / var_x;
    let correlation = cov / (var_x.sqrt() * var_y.sqrt());
    (slope, correlation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::graph::types::{NodeType, SourceType};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, GraphStore) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = GraphStore::open(&config).unwrap();
        (dir, store)
    }

    fn seed_at(store: &GraphStore, ts: DateTime<Utc>, count: usize, label: &str) {
        for i in 0..count {
            let node = Node::new(
                NodeType::Activity,
                format!("{label} {i}"),
                ts + Duration::seconds(i as i64 * 10),
                SourceType::Api,
            );
            store.create_node(&node).unwrap();
        }
    }

    #[test]
    fn test_burst_detected_over_quiet_baseline() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        // Sparse background: one event every 6 hours for 4 days
        for h in (12..96).step_by(6) {
            seed_at(&store, now - Duration::hours(h), 1, "background");
        }
        // Spike: 20 events in one hour yesterday
        seed_at(&store, now - Duration::hours(10), 20, "spike");

        let detector = PatternDetector::new().with_lookback_days(5);
        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert!(report.bursts >= 1, "expected a burst, got {report:?}");

        let stored = store.patterns().unwrap();
        let burst = stored
            .iter()
            .find(|p| p.kind == PatternKind::Burst)
            .expect("burst persisted");
        assert!(burst.magnitude > PATTERN_BURST_MULTIPLIER);
        assert!((0.0..=1.0).contains(&burst.confidence));
    }

    #[test]
    fn test_quiet_timeline_has_no_bursts() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        for h in (2..240).step_by(8) {
            seed_at(&store, now - Duration::hours(h), 1, "steady");
        }

        let detector = PatternDetector::new().with_lookback_days(10);
        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.bursts, 0);
    }

    #[test]
    fn test_daily_cycle_detected() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        // Same routine every morning for two weeks: 4 events at the same hour
        for day in 1..=14 {
            let ts = (now - Duration::days(day))
                .date_naive()
                .and_hms_opt(9, 15, 0)
                .unwrap()
                .and_utc();
            seed_at(&store, ts, 4, "standup notes");
        }

        let detector = PatternDetector::new().with_lookback_days(14);
        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert!(report.cycles >= 1, "expected a cycle, got {report:?}");

        let stored = store.patterns().unwrap();
        let cycle = stored.iter().find(|p| p.kind == PatternKind::Cycle).unwrap();
        assert!(cycle.description.contains("09:00"));
    }

    #[test]
    fn test_rising_trend_detected() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        // Steadily increasing: day k (oldest first) gets k events
        for day in 0..14i64 {
            let count = day as usize + 1;
            let ts = now - Duration::days(14 - day) + Duration::hours(2);
            seed_at(&store, ts, count, "ramping project");
        }

        let detector = PatternDetector::new().with_lookback_days(14);
        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert!(report.trends >= 1, "expected a trend, got {report:?}");

        let stored = store.patterns().unwrap();
        let trend = stored.iter().find(|p| p.kind == PatternKind::Trend).unwrap();
        assert!(trend.magnitude > 0.0, "slope should be positive");
        assert!(trend.description.contains("rising"));
    }

    #[test]
    fn test_anomalous_day_detected() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        // Stable 3/day background with one 40-event day
        for day in 1..=20i64 {
            seed_at(&store, now - Duration::days(day) + Duration::hours(3), 3, "routine");
        }
        seed_at(&store, now - Duration::days(5) + Duration::hours(8), 40, "conference day");

        let detector = PatternDetector::new().with_lookback_days(21);
        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert!(report.anomalies >= 1, "expected an anomaly, got {report:?}");

        let stored = store.patterns().unwrap();
        let anomaly = stored
            .iter()
            .find(|p| p.kind == PatternKind::Anomaly)
            .unwrap();
        assert!(anomaly.magnitude > PATTERN_ANOMALY_SIGMA);
    }

    #[test]
    fn test_refresh_replaces_previous_window_patterns() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        seed_at(&store, now - Duration::hours(10), 20, "spike");
        for h in (12..96).step_by(6) {
            seed_at(&store, now - Duration::hours(h), 1, "background");
        }

        let detector = PatternDetector::new().with_lookback_days(5);
        detector.refresh(&store, &CancelToken::new()).unwrap();
        let first_count = store.patterns().unwrap().len();
        assert!(first_count > 0);

        let report = detector.refresh(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.replaced, first_count);
        // No duplicate accumulation across refreshes
        assert_eq!(store.patterns().unwrap().len(), report.total());
    }

    #[test]
    fn test_linear_fit_recovers_known_slope() {
        // y = 2x exactly: slope 2, perfect correlation
        let counts: Vec<u64> = (0..10).map(|x| x * 2).collect();
        let (slope, r) = linear_fit(&counts);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((r - 1.0).abs() < 1e-9);

        let flat = vec![5u64; 10];
        let (slope, r) = linear_fit(&flat);
        assert_eq!(slope, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_regular_cv_rejects_sporadic_slots() {
        // Active every day, steady: qualifies
        assert!(regular_cv(&[4, 5, 4, 5, 4, 5, 4]).is_some());
        // Active one day out of seven: rejected
        assert!(regular_cv(&[0, 0, 30, 0, 0, 0, 0]).is_none());
        // Wildly varying: rejected by cv ceiling
        assert!(regular_cv(&[1, 20, 1, 20, 1, 20, 1]).is_none());
    }
}
