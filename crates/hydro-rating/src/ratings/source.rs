use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::record::SourceRatingRecord;
use super::series::RatingSeries;
use super::{is_undefined, Rate, UNDEFINED_VALUE};
use crate::error::{RatingError, RatingResult};
use crate::expression::{Bindings, Expression};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum SourceKind {
    Series(Arc<RatingSeries>),
    Expression(Arc<dyn Expression>),
}

/// A rating consumed by a virtual or transitional rating.
///
/// Values cross the boundary in `units`: the declared units when given,
/// otherwise the series' own units.
#[derive(Debug, Clone)]
pub struct SourceRating {
    kind: SourceKind,
    units: Vec<String>,
    declared: bool,
    ctx: RatingContext,
}

/// Index of an `I<n>` variable, 1-based.
pub(crate) fn input_index(variable: &str) -> Option<usize> {
    variable
        .strip_prefix('I')
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|index| *index >= 1)
}

impl SourceRating {
    pub fn series(series: Arc<RatingSeries>, ctx: &RatingContext) -> Self {
        let units = series.data_units();
        Self {
            kind: SourceKind::Series(series),
            units,
            declared: false,
            ctx: ctx.clone(),
        }
    }

    /// Series source exchanging values in `units` instead of the series units.
    pub fn series_with_units(
        series: Arc<RatingSeries>,
        units: Vec<String>,
        ctx: &RatingContext,
    ) -> RatingResult<Self> {
        let series_units = series.data_units();
        if units.len() != series_units.len() {
            return Err(RatingError::configuration(format!(
                "{} unit(s) declared for source rating {} which has {} parameter(s)",
                units.len(),
                series.spec_id(),
                series_units.len()
            )));
        }
        for (declared, own) in units.iter().zip(&series_units) {
            ctx.check_unit_pair(declared, own)?;
        }
        Ok(Self {
            kind: SourceKind::Series(series),
            units,
            declared: true,
            ctx: ctx.clone(),
        })
    }

    /// Expression over `I1..In`; `units` lists the n input units then the output unit.
    pub fn expression(text: &str, units: Vec<String>, ctx: &RatingContext) -> RatingResult<Self> {
        let Some(ind_count) = units.len().checked_sub(1).filter(|count| *count >= 1) else {
            return Err(RatingError::configuration(format!(
                "expression source \"{text}\" needs at least one input unit and an output unit"
            )));
        };

        let expression = ctx.parser().parse_expression(text)?;
        for variable in expression.variables() {
            match input_index(&variable) {
                Some(index) if index <= ind_count => {}
                _ => {
                    return Err(RatingError::configuration(format!(
                        "expression source \"{text}\" uses variable {variable}; expected I1..I{ind_count}"
                    )))
                }
            }
        }

        Ok(Self {
            kind: SourceKind::Expression(expression),
            units,
            declared: true,
            ctx: ctx.clone(),
        })
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn is_expression(&self) -> bool {
        matches!(self.kind, SourceKind::Expression(_))
    }

    /// Units in parameter order, output last.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn ind_param_count(&self) -> usize {
        self.units.len().saturating_sub(1)
    }

    pub fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        if ind.len() != self.ind_param_count() {
            return Err(RatingError::invalid_input(format!(
                "source rating expects {} value(s), got {}",
                self.ind_param_count(),
                ind.len()
            )));
        }
        if ind.iter().copied().any(is_undefined) {
            return Ok(UNDEFINED_VALUE);
        }

        match &self.kind {
            SourceKind::Expression(expression) => {
                let bindings: Bindings = ind
                    .iter()
                    .enumerate()
                    .map(|(i, value)| (format!("I{}", i + 1), *value))
                    .collect();
                Ok(expression.evaluate(&bindings)?)
            }
            SourceKind::Series(series) if !self.declared => series.rate(time, ind),
            SourceKind::Series(series) => {
                let series_units = series.data_units();
                let converted = ind
                    .iter()
                    .zip(self.units.iter().zip(&series_units))
                    .map(|(&value, (from, to))| self.ctx.convert(value, from, to))
                    .collect::<RatingResult<Vec<_>>>()?;
                let result = series.rate(time, &converted)?;
                match (series_units.last(), self.units.last()) {
                    (Some(from), Some(to)) => self.ctx.convert(result, from, to),
                    _ => Ok(result),
                }
            }
        }
    }

    pub fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        let SourceKind::Series(series) = &self.kind else {
            return Err(RatingError::unsupported(
                "expression source ratings cannot be reverse rated",
            ));
        };
        if !self.declared {
            return series.reverse_rate(time, dep);
        }

        let series_units = series.data_units();
        let dep = match (self.units.last(), series_units.last()) {
            (Some(from), Some(to)) => self.ctx.convert(dep, from, to)?,
            _ => dep,
        };
        let result = series.reverse_rate(time, dep)?;
        match (series_units.first(), self.units.first()) {
            (Some(from), Some(to)) => self.ctx.convert(result, from, to),
            _ => Ok(result),
        }
    }

    pub(crate) fn check_cycles(&self, path: &mut Vec<String>) -> RatingResult<()> {
        match &self.kind {
            SourceKind::Series(series) => series.check_cycles(path),
            SourceKind::Expression(_) => Ok(()),
        }
    }

    pub(crate) fn references_series(&self, target: *const RatingSeries) -> bool {
        match &self.kind {
            SourceKind::Series(series) => {
                std::ptr::eq(Arc::as_ptr(series), target) || series.references_series(target)
            }
            SourceKind::Expression(_) => false,
        }
    }

    pub fn to_record(&self) -> SourceRatingRecord {
        match &self.kind {
            SourceKind::Series(series) => SourceRatingRecord::Series {
                units: self.declared.then(|| self.units.clone()),
                series: series.to_record(),
            },
            SourceKind::Expression(expression) => SourceRatingRecord::Expression {
                expression: expression.text().to_string(),
                units: self.units.clone(),
            },
        }
    }

    pub fn from_record(record: SourceRatingRecord, ctx: &RatingContext) -> RatingResult<Self> {
        match record {
            SourceRatingRecord::Series { units, series } => {
                let series = Arc::new(RatingSeries::from_record(series, ctx)?);
                match units {
                    Some(units) => Self::series_with_units(series, units, ctx),
                    None => Ok(Self::series(series, ctx)),
                }
            }
            SourceRatingRecord::Expression { expression, units } => {
                Self::expression(&expression, units, ctx)
            }
        }
    }
}

/// Fails with the offending path when `meta`'s key is reachable again
/// through `sources`.
pub(crate) fn check_source_cycles(
    meta: &RatingMetadata,
    sources: &[SourceRating],
) -> RatingResult<()> {
    let mut path = vec![meta.key()];
    for source in sources {
        source.check_cycles(&mut path)?;
    }
    Ok(())
}
