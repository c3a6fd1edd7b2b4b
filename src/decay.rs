//! Multi-scale recency decay
//!
//! # The Problem with a Single Half-Life
//!
//! One exponential curve cannot serve a personal activity graph. A half-life
//! short enough to separate "this morning" from "yesterday" flattens
//! everything older than two days to ~0; a half-life long enough to keep last
//! week retrievable cannot tell 9am from 5pm.
//!
//! # The Solution: Blended Scales
//!
//! Recency is a weighted blend of three exponential decays:
//! - **Session scale** (6h half-life, weight 0.5): separates hours
//! - **Daily scale** (24h half-life, weight 0.3): separates days
//! - **Weekly scale** (7d half-life, weight 0.2): keeps the tail alive
//!
//! ```text
//! Recency │╲
//!    1.0  │ ╲  session scale dominates
//!         │  ╲___
//!    0.5  │      ╲____  daily scale carries
//!         │           ╲_______
//!    0.2  │                   ╲___________ weekly tail
//!         │                               ╲__________
//!    0.0  └────┬──────┬──────────┬───────────────────► time
//!              6h     1d         7d
//! ```
//!
//! The blend is strictly monotonic in elapsed time, so newer always scores
//! at least as high as older (all else equal).

use crate::constants::{
    RECENCY_LONG_HALF_LIFE_HOURS, RECENCY_LONG_WEIGHT, RECENCY_MEDIUM_HALF_LIFE_HOURS,
    RECENCY_MEDIUM_WEIGHT, RECENCY_SHORT_HALF_LIFE_HOURS, RECENCY_SHORT_WEIGHT,
};

/// Exponential half-life decay: 1.0 at zero elapsed, 0.5 at one half-life.
#[inline]
pub fn half_life_decay(hours_elapsed: f64, half_life_hours: f64) -> f64 {
    if hours_elapsed <= 0.0 {
        return 1.0;
    }
    (-hours_elapsed / half_life_hours * std::f64::consts::LN_2).exp()
}

/// Multi-scale recency factor in [0,1] for time elapsed since an event.
#[inline]
pub fn multi_scale_recency(hours_elapsed: f64) -> f64 {
    RECENCY_SHORT_WEIGHT * half_life_decay(hours_elapsed, RECENCY_SHORT_HALF_LIFE_HOURS)
        + RECENCY_MEDIUM_WEIGHT * half_life_decay(hours_elapsed, RECENCY_MEDIUM_HALF_LIFE_HOURS)
        + RECENCY_LONG_WEIGHT * half_life_decay(hours_elapsed, RECENCY_LONG_HALF_LIFE_HOURS)
}

/// Blend event-time recency with last-access recency.
///
/// `access_blend` is the share given to access recency (0 = pure event time).
/// A stale node touched minutes ago stays warm without jumping ahead of
/// genuinely fresh events.
#[inline]
pub fn blended_recency(event_hours: f64, access_hours: f64, access_blend: f64) -> f64 {
    let blend = access_blend.clamp(0.0, 1.0);
    (1.0 - blend) * multi_scale_recency(event_hours) + blend * multi_scale_recency(access_hours)
}

/// Edge strength after sitting idle: multiplicative per-day decay.
///
/// `new = strength × (1 − rate)^days`, clamped to [0,1]. Rate 0.02 halves an
/// unused edge in roughly 34 days.
#[inline]
pub fn edge_strength_decay(strength: f32, decay_rate: f32, days_idle: f64) -> f32 {
    if days_idle <= 0.0 {
        return strength.clamp(0.0, 1.0);
    }
    let rate = decay_rate.clamp(0.0, 1.0) as f64;
    let decayed = strength as f64 * (1.0 - rate).powf(days_idle);
    decayed.clamp(0.0, 1.0) as f32
}

/// Per-cycle context-window score decay.
#[inline]
pub fn window_decay(score: f32, factor: f32) -> f32 {
    (score * factor.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_decay_at_zero() {
        assert_eq!(half_life_decay(0.0, 6.0), 1.0);
        assert_eq!(half_life_decay(-5.0, 6.0), 1.0);
        assert!((multi_scale_recency(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_half_life_property() {
        // At exactly one half-life the factor is 0.5
        let f = half_life_decay(6.0, 6.0);
        assert!((f - 0.5).abs() < 1e-9);
        let f = half_life_decay(336.0, 168.0);
        assert!((f - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_recency_monotonic() {
        let mut prev = multi_scale_recency(0.0);
        for h in [1.0, 6.0, 12.0, 24.0, 72.0, 168.0, 720.0] {
            let cur = multi_scale_recency(h);
            assert!(cur < prev, "recency must strictly decrease ({h}h)");
            prev = cur;
        }
    }

    #[test]
    fn test_now_beats_thirty_days_old() {
        let fresh = multi_scale_recency(0.0);
        let stale = multi_scale_recency(30.0 * 24.0);
        assert!(fresh > stale);
        // The weekly tail keeps the stale value meaningfully above zero
        assert!(stale > 0.01);
    }

    #[test]
    fn test_blended_recency_bounds() {
        for (e, a) in [(0.0, 0.0), (100.0, 0.5), (5000.0, 5000.0)] {
            let f = blended_recency(e, a, 0.3);
            assert!((0.0..=1.0).contains(&f));
        }
        // Recent access warms an old event
        let cold = blended_recency(720.0, 720.0, 0.3);
        let warmed = blended_recency(720.0, 0.1, 0.3);
        assert!(warmed > cold);
    }

    #[test]
    fn test_edge_decay_idle_time() {
        assert_eq!(edge_strength_decay(0.8, 0.02, 0.0), 0.8);
        let after_week = edge_strength_decay(0.8, 0.02, 7.0);
        assert!(after_week < 0.8 && after_week > 0.6);
        // Heavy idle time never goes negative
        assert!(edge_strength_decay(0.8, 0.02, 10_000.0) >= 0.0);
    }

    #[test]
    fn test_edge_decay_clamps_bad_input() {
        assert_eq!(edge_strength_decay(5.0, 0.02, 0.0), 1.0);
        assert_eq!(edge_strength_decay(0.5, 2.0, 1.0), 0.0);
    }

    #[test]
    fn test_window_decay() {
        assert!((window_decay(0.8, 0.9) - 0.72).abs() < 1e-6);
        assert_eq!(window_decay(0.8, 1.5), 0.8);
    }
}
