//! Align the clocks of two trees.
//!
//! Both trees measure time backwards from their own "present", and the two
//! presents need not coincide. Identical samples should sit at the same
//! calendar date in both trees, so the per-sample disagreement
//! `t_left(s) - t_right(s)` estimates a constant shift. The median is used so
//! that a minority of badly dated tips cannot drag the estimate.
//!
//! A [`TimeAxis`] ties tree time to the calendar: a node at time `t` on an
//! axis with reference `day0` lived at `day0 - t`. Shifting the left axis by
//! the offset gives the right tree an axis on which matched samples coincide.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TanglegramError};
use crate::tree::{NodeId, TimeTree};

/// Unit of node time, shared by both trees of a figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnits {
    #[default]
    Days,
    Hours,
    Weeks,
}

impl TimeUnits {
    fn millis(self) -> f64 {
        match self {
            TimeUnits::Hours => 3_600_000.0,
            TimeUnits::Days => 86_400_000.0,
            TimeUnits::Weeks => 604_800_000.0,
        }
    }

    /// Calendar duration of `amount` units, rounded to the millisecond.
    ///
    /// `None` when the amount is not finite or beyond what a `TimeDelta` holds.
    pub fn duration(self, amount: f64) -> Option<TimeDelta> {
        let millis = (amount * self.millis()).round();
        // i64::MAX as f64 rounds up to 2^63, which no longer fits
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        TimeDelta::try_milliseconds(millis as i64)
    }

    /// `duration` expressed in this unit.
    pub fn amount(self, duration: TimeDelta) -> f64 {
        duration.num_milliseconds() as f64 / self.millis()
    }
}

impl fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeUnits::Days => "days",
            TimeUnits::Hours => "hours",
            TimeUnits::Weeks => "weeks",
        })
    }
}

/// Shift to add to right-tree times to express them on the left tree's clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOffset(f64);

impl TimeOffset {
    pub fn value(self) -> f64 {
        self.0
    }
}

/// Median of `values`; averages the middle pair for even lengths.
///
/// Returns `None` for an empty slice or when any value is NaN.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Estimate the clock offset between two trees from matched samples.
///
/// `pairs` holds `(left node, right node)` for samples known to be the same
/// strain; a pair whose strains differ is a `PreconditionViolation`.
///
/// # Errors
/// `CalibrationImpossible` when `pairs` is empty or a time is NaN.
pub fn estimate_offset(
    left: &TimeTree,
    right: &TimeTree,
    pairs: &[(NodeId, NodeId)],
) -> Result<TimeOffset> {
    let mut differences = Vec::with_capacity(pairs.len());
    for &(u, v) in pairs {
        if left.strain(u) != right.strain(v) {
            return Err(TanglegramError::precondition(format!(
                "cannot calibrate on mismatched samples {:?} and {:?}",
                left.strain(u),
                right.strain(v)
            )));
        }
        differences.push(left.time(u) - right.time(v));
    }
    if differences.is_empty() {
        return Err(TanglegramError::CalibrationImpossible(
            "no matched samples between the two trees".to_string(),
        ));
    }
    median(&differences).map(TimeOffset).ok_or_else(|| {
        TanglegramError::CalibrationImpossible("sample times contain NaN".to_string())
    })
}

/// Maps tree time to calendar time for one tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    pub day0: NaiveDateTime,
    pub units: TimeUnits,
}

impl TimeAxis {
    pub fn new(day0: NaiveDateTime, units: TimeUnits) -> Self {
        TimeAxis { day0, units }
    }

    /// Axis whose reference is midnight of an ISO `YYYY-MM-DD` date.
    pub fn from_iso_date(date: &str, units: TimeUnits) -> Result<Self> {
        Ok(TimeAxis::new(parse_iso_date(date)?, units))
    }

    /// Tree time at which `date` falls on this axis.
    pub fn time_of(&self, date: NaiveDateTime) -> f64 {
        self.units.amount(self.day0 - date)
    }

    /// `day0 - amount`, or `None` outside the representable calendar.
    fn before_day0(&self, amount: f64) -> Option<NaiveDateTime> {
        self.units
            .duration(amount)
            .and_then(|d| self.day0.checked_sub_signed(d))
    }

    /// Calendar date of tree time `t`.
    ///
    /// # Errors
    /// `PreconditionViolation` when the date falls outside the calendar range.
    pub fn date_of(&self, t: f64) -> Result<NaiveDateTime> {
        self.before_day0(t).ok_or_else(|| {
            TanglegramError::precondition(format!(
                "time {t} {} before {} is not a calendar date",
                self.units, self.day0
            ))
        })
    }

    /// Axis for a tree whose times are `offset` behind this one's.
    ///
    /// A sample at `t` here sits at `t - offset` on the other tree, so the
    /// other reference is `day0 - offset`.
    ///
    /// # Errors
    /// `CalibrationImpossible` when the shifted reference leaves the calendar range.
    pub fn shifted(&self, offset: TimeOffset) -> Result<Self> {
        let day0 = self.before_day0(offset.value()).ok_or_else(|| {
            TanglegramError::CalibrationImpossible(format!(
                "offset of {} {} moves {} out of the calendar range",
                offset.value(),
                self.units,
                self.day0
            ))
        })?;
        Ok(TimeAxis {
            day0,
            units: self.units,
        })
    }
}

/// Parse `YYYY-MM-DD` (optionally followed by `THH:MM:SS`).
pub fn parse_iso_date(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TanglegramError::Parse(format!("invalid ISO date {text:?}")))
}
