use crate::error::{RatingError, RatingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lookup behavior for a query that falls between, before or after known data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RatingMethod {
    /// Return the undefined value.
    Null,
    /// Fail the lookup.
    Error,
    Linear,
    /// Log-log interpolation.
    Logarithmic,
    /// Logarithmic independent axis, linear dependent axis.
    LinLog,
    /// Linear independent axis, logarithmic dependent axis.
    LogLin,
    Previous,
    Next,
    Nearest,
    /// The neighbor with the lower independent value.
    Lower,
    /// The neighbor with the higher independent value.
    Higher,
    Closest,
}

impl RatingMethod {
    pub const ALL: [Self; 12] = [
        Self::Null,
        Self::Error,
        Self::Linear,
        Self::Logarithmic,
        Self::LinLog,
        Self::LogLin,
        Self::Previous,
        Self::Next,
        Self::Nearest,
        Self::Lower,
        Self::Higher,
        Self::Closest,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Error => "ERROR",
            Self::Linear => "LINEAR",
            Self::Logarithmic => "LOGARITHMIC",
            Self::LinLog => "LIN-LOG",
            Self::LogLin => "LOG-LIN",
            Self::Previous => "PREVIOUS",
            Self::Next => "NEXT",
            Self::Nearest => "NEAREST",
            Self::Lower => "LOWER",
            Self::Higher => "HIGHER",
            Self::Closest => "CLOSEST",
        }
    }

    /// True for the methods that compute a value between two anchors.
    pub const fn is_interpolating(self) -> bool {
        matches!(
            self,
            Self::Linear | Self::Logarithmic | Self::LinLog | Self::LogLin
        )
    }

    pub const fn is_logarithmic(self) -> bool {
        matches!(self, Self::Logarithmic | Self::LinLog | Self::LogLin)
    }

    /// `(independent axis is log, dependent axis is log)`.
    pub const fn log_axes(self) -> (bool, bool) {
        match self {
            Self::Logarithmic => (true, true),
            Self::LinLog => (true, false),
            Self::LogLin => (false, true),
            _ => (false, false),
        }
    }

    /// Method to use once the independent and dependent axes trade places.
    pub const fn with_axes_swapped(self) -> Self {
        match self {
            Self::LinLog => Self::LogLin,
            Self::LogLin => Self::LinLog,
            other => other,
        }
    }
}

impl fmt::Display for RatingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingMethod {
    type Err = RatingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == normalized)
            .ok_or_else(|| RatingError::configuration(format!("unknown rating method '{value}'")))
    }
}

impl TryFrom<String> for RatingMethod {
    type Error = RatingError;

    fn try_from(value: String) -> Result<Self, RatingError> {
        value.parse()
    }
}

impl From<RatingMethod> for String {
    fn from(value: RatingMethod) -> Self {
        value.as_str().to_string()
    }
}

/// Direction of a table's independent values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
}

/// The three lookup behaviors for one independent-parameter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingMethodSet {
    pub in_range: RatingMethod,
    pub out_range_low: RatingMethod,
    pub out_range_high: RatingMethod,
}

impl Default for RatingMethodSet {
    fn default() -> Self {
        Self::new(RatingMethod::Linear, RatingMethod::Error, RatingMethod::Error)
    }
}

impl RatingMethodSet {
    pub const fn new(
        in_range: RatingMethod,
        out_range_low: RatingMethod,
        out_range_high: RatingMethod,
    ) -> Self {
        Self {
            in_range,
            out_range_low,
            out_range_high,
        }
    }

    /// Time-axis defaults for a rating series.
    pub const fn series_default() -> Self {
        Self::new(
            RatingMethod::Linear,
            RatingMethod::Next,
            RatingMethod::Previous,
        )
    }

    pub const fn with_axes_swapped(self) -> Self {
        Self::new(
            self.in_range.with_axes_swapped(),
            self.out_range_low.with_axes_swapped(),
            self.out_range_high.with_axes_swapped(),
        )
    }

    /// Checks the methods against a table running in `direction`.
    ///
    /// `Lower` and `Higher` name the neighbor by independent value, so which
    /// of them is impossible past an edge depends on the sort direction.
    pub fn validate_for_table(&self, direction: Direction) -> RatingResult<()> {
        use RatingMethod::*;

        if self.in_range == Nearest {
            return Err(RatingError::configuration(
                "NEAREST is not a valid in-range method",
            ));
        }

        let low_invalid = match self.out_range_low {
            Previous => true,
            Lower => direction == Direction::Increasing,
            Higher => direction == Direction::Decreasing,
            _ => false,
        };
        if low_invalid {
            return Err(RatingError::configuration(format!(
                "{} is not a valid out-of-range-low method for a {} table",
                self.out_range_low,
                direction.label()
            )));
        }

        let high_invalid = match self.out_range_high {
            Next => true,
            Higher => direction == Direction::Increasing,
            Lower => direction == Direction::Decreasing,
            _ => false,
        };
        if high_invalid {
            return Err(RatingError::configuration(format!(
                "{} is not a valid out-of-range-high method for a {} table",
                self.out_range_high,
                direction.label()
            )));
        }

        Ok(())
    }

    /// Checks the methods against the time axis of a rating series.
    pub fn validate_for_series(&self) -> RatingResult<()> {
        use RatingMethod::*;

        if self.in_range == Nearest || self.in_range.is_logarithmic() {
            return Err(RatingError::configuration(format!(
                "{} is not a valid in-range method for a rating series",
                self.in_range
            )));
        }
        if matches!(self.out_range_low, Previous | Lower) || self.out_range_low.is_logarithmic() {
            return Err(RatingError::configuration(format!(
                "{} is not a valid out-of-range-low method for a rating series",
                self.out_range_low
            )));
        }
        if matches!(self.out_range_high, Next | Higher) || self.out_range_high.is_logarithmic() {
            return Err(RatingError::configuration(format!(
                "{} is not a valid out-of-range-high method for a rating series",
                self.out_range_high
            )));
        }
        Ok(())
    }
}

impl Direction {
    pub const fn label(self) -> &'static str {
        match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
        }
    }
}

/// Offsets subtracted from an axis before it is log-transformed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct LogOffsets {
    pub(crate) independent: f64,
    pub(crate) dependent: f64,
}

fn log_axis(values: [f64; 3], offset: f64) -> Option<[f64; 3]> {
    let logged = values.map(|value| (value - offset).log10());
    logged.iter().all(|value| value.is_finite()).then_some(logged)
}

/// Interpolates (or extrapolates) `x` along the line through `(x1, y1)` and
/// `(x2, y2)`, transforming the axes `method` calls for. When any required
/// log transform is not finite the whole segment is handled linearly.
pub(crate) fn interpolate(
    method: RatingMethod,
    x: f64,
    (x1, x2): (f64, f64),
    (y1, y2): (f64, f64),
    offsets: LogOffsets,
) -> f64 {
    let linear = || y1 + (x - x1) / (x2 - x1) * (y2 - y1);
    let (ind_log, dep_log) = method.log_axes();

    let xs = if ind_log {
        log_axis([x, x1, x2], offsets.independent)
    } else {
        Some([x, x1, x2])
    };
    let ys = if dep_log {
        log_axis([y1, y2, y2], offsets.dependent)
    } else {
        Some([y1, y2, y2])
    };

    match (xs, ys) {
        (Some([x, x1, x2]), Some([y1, y2, _])) => {
            let y = y1 + (x - x1) / (x2 - x1) * (y2 - y1);
            if dep_log {
                10f64.powf(y) + offsets.dependent
            } else {
                y
            }
        }
        _ => linear(),
    }
}
