//! Stepped volume ramps for scheduler fades
//!
//! Remote backends cannot take a continuous gain ramp, so fades are issued
//! as a sequence of discrete volume levels. The curve decides how those
//! levels are spaced:
//! - Linear: equal steps
//! - SquareRoot: fast start, slow finish
//! - S-Curve: slow start and end
//! - Equal Power: constant perceived loudness

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::time::Duration;

/// Fade curve type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Equal steps
    #[default]
    Linear,

    /// t^0.5
    SquareRoot,

    /// Slow start, fast middle, slow end
    SCurve,

    /// Sine quarter-wave
    EqualPower,
}

impl FadeCurve {
    /// Progress of the ramp at a normalized position
    ///
    /// Returns 0.0 at `position == 0` and 1.0 at `position == 1`.
    #[inline]
    pub fn progress(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::SquareRoot => {
                if t <= 0.0 {
                    0.0
                } else {
                    t.powf(0.5)
                }
            }
            FadeCurve::SCurve => (1.0 - (PI * t).cos()) * 0.5,
            FadeCurve::EqualPower => (t * PI * 0.5).sin(),
        }
    }

    /// Settings representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::SquareRoot => "square_root",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// Parse the settings representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "linear" => Some(Self::Linear),
            "square_root" => Some(Self::SquareRoot),
            "s_curve" => Some(Self::SCurve),
            "equal_power" => Some(Self::EqualPower),
            _ => None,
        }
    }
}

/// One level change in a ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeStep {
    /// Offset from the start of the ramp
    pub at: Duration,

    /// Level (0-100) to apply at `at`
    pub level: u8,
}

/// Plan a ramp from `from` to `to` over `duration`, one step every `interval`
///
/// The last step always lands exactly on `to` at `duration`. A zero duration
/// yields a single immediate step.
pub fn plan_ramp(
    from: u8,
    to: u8,
    duration: Duration,
    interval: Duration,
    curve: FadeCurve,
) -> Vec<FadeStep> {
    let from = from.min(100);
    let to = to.min(100);

    if duration.is_zero() || interval.is_zero() {
        return vec![FadeStep {
            at: Duration::ZERO,
            level: to,
        }];
    }

    let total_ms = duration.as_millis().max(1) as u64;
    let interval_ms = interval.as_millis().max(1) as u64;
    let count = total_ms.div_ceil(interval_ms);

    let span = f32::from(to) - f32::from(from);
    (1..=count)
        .map(|i| {
            let at_ms = (i * interval_ms).min(total_ms);
            let position = at_ms as f32 / total_ms as f32;
            let level = if i == count {
                to
            } else {
                (f32::from(from) + span * curve.progress(position))
                    .round()
                    .clamp(0.0, 100.0) as u8
            };
            FadeStep {
                at: Duration::from_millis(at_ms),
                level,
            }
        })
        .collect()
}
