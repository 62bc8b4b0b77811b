// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! OEE arithmetic - Availability x Performance x Quality
//!
//! Everything here is pure. Ratios are kept unrounded internally and only
//! converted to two-decimal percentages when the [`OeeResult`] is built.

use serde::{Deserialize, Serialize};

/// Decimal places of every reported percentage
pub const PERCENT_DECIMALS: i32 = 2;

/// How the target was interpreted for Performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Configured,
    /// No target exists for the period; Performance falls back to 0
    Unset,
    /// Target exists but is zero or negative; Performance falls back to 0
    Zero,
}

/// Good/gross ratio used for Quality
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityYield(f64);

impl QualityYield {
    /// Full yield, used when there is no independent quality signal
    pub const PERFECT: QualityYield = QualityYield(1.0);

    /// Clamped to `[0, 1]`; NaN becomes 1
    pub fn new(ratio: f64) -> Self {
        if ratio.is_nan() {
            return Self::PERFECT;
        }
        Self(ratio.clamp(0.0, 1.0))
    }

    /// Yield from tallied good output against machine gross output.
    /// No tally, or nothing produced, counts as full yield.
    pub fn from_outputs(good: Option<f64>, gross: f64) -> Self {
        match good {
            Some(good) if gross > 0.0 => Self::new(good / gross),
            _ => Self::PERFECT,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.0
    }
}

impl Default for QualityYield {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Aggregated inputs for one machine, shift and date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OeeInputs {
    pub planned_minutes: f64,
    pub downtime_minutes: f64,
    pub actual_output: f64,
    pub target_output: Option<f64>,
    pub quality: QualityYield,
}

/// A/P/Q/OEE as percentages plus the inputs they came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeResult {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub actual: f64,
    pub target: Option<f64>,
    pub target_status: TargetStatus,
    pub planned_minutes: f64,
    pub downtime_minutes: f64,
}

/// Ratio to percentage, rounded half away from zero
pub fn to_percent(ratio: f64) -> f64 {
    let scale = 10f64.powi(PERCENT_DECIMALS);
    (ratio * 100.0 * scale).round() / scale
}

fn availability(planned_minutes: f64, downtime_minutes: f64) -> f64 {
    if !(planned_minutes > 0.0) {
        return 0.0;
    }
    let operating = (planned_minutes - downtime_minutes.max(0.0)).max(0.0);
    (operating / planned_minutes).clamp(0.0, 1.0)
}

fn performance(actual: f64, target: Option<f64>) -> (f64, TargetStatus) {
    match target {
        None => (0.0, TargetStatus::Unset),
        Some(t) if !(t > 0.0) => (0.0, TargetStatus::Zero),
        Some(t) => ((actual.max(0.0)) / t, TargetStatus::Configured),
    }
}

/// Compute OEE. Never produces NaN or infinity.
pub fn compute(
    planned_minutes: f64,
    downtime_minutes: f64,
    actual_output: f64,
    target_output: Option<f64>,
    quality: QualityYield,
) -> OeeResult {
    let a = availability(planned_minutes, downtime_minutes);
    let (p, target_status) = performance(actual_output, target_output);
    let q = quality.ratio();

    OeeResult {
        availability: to_percent(a),
        performance: to_percent(p),
        quality: to_percent(q),
        oee: to_percent(a * p * q),
        actual: actual_output,
        target: target_output,
        target_status,
        planned_minutes,
        downtime_minutes,
    }
}

impl OeeInputs {
    pub fn compute(&self) -> OeeResult {
        compute(
            self.planned_minutes,
            self.downtime_minutes,
            self.actual_output,
            self.target_output,
            self.quality,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_shift() {
        let r = compute(480.0, 60.0, 5000.0, Some(10000.0), QualityYield::new(1.0));
        assert_eq!(r.availability, 87.50);
        assert_eq!(r.performance, 50.00);
        assert_eq!(r.quality, 100.00);
        assert_eq!(r.oee, 43.75);
        assert_eq!(r.target_status, TargetStatus::Configured);
        assert_eq!(r.downtime_minutes, 60.0);
        assert_eq!(r.actual, 5000.0);
        assert_eq!(r.target, Some(10000.0));
    }

    #[test]
    fn test_zero_or_missing_target_falls_back_to_zero() {
        for (target, status) in [(Some(0.0), TargetStatus::Zero), (None, TargetStatus::Unset)] {
            let r = compute(480.0, 0.0, 100.0, target, QualityYield::PERFECT);
            assert_eq!(r.performance, 0.0);
            assert_eq!(r.oee, 0.0);
            assert_eq!(r.availability, 100.0);
            assert_eq!(r.target_status, status);
            assert!(r.performance.is_finite() && r.oee.is_finite());
        }
    }

    #[test]
    fn test_availability_clamps() {
        assert_eq!(compute(480.0, 600.0, 0.0, Some(1.0), QualityYield::PERFECT).availability, 0.0);
        assert_eq!(compute(0.0, 0.0, 10.0, Some(1.0), QualityYield::PERFECT).availability, 0.0);
        assert_eq!(compute(480.0, -5.0, 0.0, Some(1.0), QualityYield::PERFECT).availability, 100.0);
    }

    #[test]
    fn test_overproduction_is_reported() {
        let r = compute(480.0, 0.0, 150.0, Some(100.0), QualityYield::PERFECT);
        assert_eq!(r.performance, 150.0);
        assert_eq!(r.oee, 150.0);
    }

    #[test]
    fn test_quality_yield() {
        assert_eq!(QualityYield::from_outputs(None, 100.0).ratio(), 1.0);
        assert_eq!(QualityYield::from_outputs(Some(50.0), 0.0).ratio(), 1.0);
        assert_eq!(QualityYield::from_outputs(Some(90.0), 100.0).ratio(), 0.9);
        assert_eq!(QualityYield::from_outputs(Some(120.0), 100.0).ratio(), 1.0);
        assert_eq!(QualityYield::new(f64::NAN).ratio(), 1.0);

        let r = compute(480.0, 0.0, 100.0, Some(100.0), QualityYield::from_outputs(Some(90.0), 100.0));
        assert_eq!(r.quality, 90.0);
        assert_eq!(r.oee, 90.0);
    }

    #[test]
    fn test_rounding_applied_once() {
        // 1/3 * 1/3 = 0.1111.. -> 11.11, not round(33.33%)^2
        let r = compute(3.0, 2.0, 1.0, Some(3.0), QualityYield::PERFECT);
        assert_eq!(r.availability, 33.33);
        assert_eq!(r.performance, 33.33);
        assert_eq!(r.oee, 11.11);
    }
}
