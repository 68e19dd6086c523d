use crate::config::{EngineConfig, SafetyPolicy};
use crate::error::{RatingError, RatingResult};
use crate::expression::{ExpressionParser, MathParser};
use crate::units::{UnitConverter, UnitTable};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Collaborators and policy handed to every rating at construction.
#[derive(Clone)]
pub struct RatingContext {
    units: Arc<dyn UnitConverter>,
    parser: Arc<dyn ExpressionParser>,
    safety: SafetyPolicy,
    shift_decimals: Option<u32>,
}

impl fmt::Debug for RatingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatingContext")
            .field("safety", &self.safety)
            .field("shift_decimals", &self.shift_decimals)
            .finish_non_exhaustive()
    }
}

impl Default for RatingContext {
    fn default() -> Self {
        Self::standard()
    }
}

impl RatingContext {
    pub fn new(units: Arc<dyn UnitConverter>, parser: Arc<dyn ExpressionParser>) -> Self {
        Self {
            units,
            parser,
            safety: SafetyPolicy::default(),
            shift_decimals: None,
        }
    }

    /// Bundled unit table and expression parser with strict safety.
    pub fn standard() -> Self {
        Self::new(Arc::new(UnitTable::standard()), Arc::new(MathParser))
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::standard()
            .with_safety(config.safety)
            .with_shift_decimals(config.shift_decimals)
    }

    pub fn with_safety(mut self, safety: SafetyPolicy) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_shift_decimals(mut self, decimals: Option<u32>) -> Self {
        self.shift_decimals = decimals;
        self
    }

    pub fn safety(&self) -> SafetyPolicy {
        self.safety
    }

    pub fn shift_decimals(&self) -> Option<u32> {
        self.shift_decimals
    }

    pub fn units(&self) -> &dyn UnitConverter {
        self.units.as_ref()
    }

    pub fn parser(&self) -> &dyn ExpressionParser {
        self.parser.as_ref()
    }

    /// Fails when unsafe operations are disallowed, otherwise lets the
    /// operation continue and optionally logs `message`.
    pub fn permit_unsafe(&self, message: impl Into<String>) -> RatingResult<()> {
        let message = message.into();
        if !self.safety.allow_unsafe {
            return Err(RatingError::UnsafeOperation(message));
        }
        if self.safety.warn_unsafe {
            warn!(%message, "continuing with unsafe operation");
        }
        Ok(())
    }

    /// Checks that values can move from `from` to `to` under the safety policy.
    pub fn check_unit_pair(&self, from: &str, to: &str) -> RatingResult<()> {
        if from == to || self.units.can_convert(from, to) {
            return Ok(());
        }
        self.permit_unsafe(format!(
            "cannot convert from \"{from}\" to \"{to}\"; values will not be converted"
        ))
    }

    /// Converts `value`, passing it through unconverted when the pair is
    /// inconvertible and unsafe operations are permitted.
    pub fn convert(&self, value: f64, from: &str, to: &str) -> RatingResult<f64> {
        if from == to || super::is_undefined(value) {
            return Ok(value);
        }
        match self.units.convert(value, from, to) {
            Ok(converted) => Ok(converted),
            Err(err) => {
                self.permit_unsafe(err.to_string())?;
                Ok(value)
            }
        }
    }

    pub(crate) fn round_shift(&self, shift: f64) -> f64 {
        match self.shift_decimals {
            Some(decimals) => {
                let scale = 10f64.powi(decimals as i32);
                (shift * scale).round() / scale
            }
            None => shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_policy_rejects_inconvertible_units() {
        let ctx = RatingContext::standard();
        match ctx.convert(1.0, "ft", "cfs") {
            Err(RatingError::UnsafeOperation(message)) => assert!(message.contains("ft")),
            other => panic!("expected unsafe operation, got {other:?}"),
        }
    }

    #[test]
    fn permissive_policy_passes_values_through() {
        let ctx = RatingContext::standard().with_safety(SafetyPolicy::silent());
        assert_eq!(ctx.convert(7.0, "ft", "cfs").expect("passes through"), 7.0);
        assert!(ctx.check_unit_pair("ft", "bogus").is_ok());

        let meters = ctx.convert(10.0, "ft", "m").expect("converts");
        assert!((meters - 3.048).abs() < 1e-12);
    }

    #[test]
    fn shift_rounding_is_half_away_from_zero() {
        let ctx = RatingContext::standard().with_shift_decimals(Some(2));
        assert_eq!(ctx.round_shift(0.125), 0.13);
        assert_eq!(ctx.round_shift(-0.125), -0.13);
        assert_eq!(RatingContext::standard().round_shift(0.125), 0.125);
    }
}
