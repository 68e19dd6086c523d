//! Rating variants, the temporal rating series and their shared contract.

pub mod context;
pub mod expression_rating;
pub mod ids;
pub mod metadata;
pub mod method;
pub mod point;
pub mod record;
pub mod series;
pub mod source;
pub mod table;
pub mod tabular;
pub mod transitional;
pub mod usgs;
pub mod virtual_rating;

use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};
use context::RatingContext;
use expression_rating::ExpressionRating;
use metadata::RatingMetadata;
use record::RatingRecord;
use series::RatingSeries;
use source::SourceRating;
use tabular::TableRating;
use transitional::TransitionalRating;
use usgs::UsgsShiftedRating;
use virtual_rating::VirtualRating;

/// Sentinel for a value that could not be rated.
pub const UNDEFINED_VALUE: f64 = -3.402_823_466_385_288_6e38;

pub fn is_undefined(value: f64) -> bool {
    value == UNDEFINED_VALUE
}

const COMPARISON_TOLERANCE: f64 = 1e-8;

pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < COMPARISON_TOLERANCE
}

pub(crate) fn approx_lt(a: f64, b: f64) -> bool {
    !approx_eq(a, b) && a < b
}

pub(crate) fn approx_gt(a: f64, b: f64) -> bool {
    !approx_eq(a, b) && a > b
}

/// Fraction of the way `t` lies from `start` to `end`.
pub(crate) fn time_fraction(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let span = (end - start).num_milliseconds();
    if span == 0 {
        return 0.0;
    }
    (t - start).num_milliseconds() as f64 / span as f64
}

/// Operations shared by every rating variant and by [`RatingSeries`].
pub trait Rate {
    fn ind_param_count(&self) -> usize;

    /// Rates one set of independent values (one per parameter).
    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64>;

    /// Rates a sequence of values; `ind_values[param][i]` pairs with `times[i]`.
    fn rate_many(&self, times: &[DateTime<Utc>], ind_values: &[Vec<f64>]) -> RatingResult<Vec<f64>> {
        check_value_sets(self.ind_param_count(), times, ind_values)?;
        times
            .iter()
            .enumerate()
            .map(|(i, &time)| {
                let values: Vec<f64> = ind_values.iter().map(|set| set[i]).collect();
                self.rate(time, &values)
            })
            .collect()
    }

    fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64>;

    fn reverse_rate_many(&self, times: &[DateTime<Utc>], deps: &[f64]) -> RatingResult<Vec<f64>> {
        if deps.len() != times.len() {
            return Err(RatingError::invalid_input(format!(
                "{} value(s) supplied for {} time(s)",
                deps.len(),
                times.len()
            )));
        }
        times
            .iter()
            .zip(deps)
            .map(|(&time, &dep)| self.reverse_rate(time, dep))
            .collect()
    }

    /// `(min, max)` per independent parameter, then the dependent parameter.
    fn extents(&self, time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>>;
}

pub(crate) fn check_value_sets(
    ind_param_count: usize,
    times: &[DateTime<Utc>],
    ind_values: &[Vec<f64>],
) -> RatingResult<()> {
    if ind_values.len() != ind_param_count {
        return Err(RatingError::invalid_input(format!(
            "{} value set(s) supplied, expected {ind_param_count}",
            ind_values.len()
        )));
    }
    if let Some(set) = ind_values.iter().find(|set| set.len() != times.len()) {
        return Err(RatingError::invalid_input(format!(
            "{} value(s) supplied for {} time(s)",
            set.len(),
            times.len()
        )));
    }
    Ok(())
}

/// Validates and stores data units: independent units then the dependent unit.
pub(crate) fn set_data_units(
    meta: &mut RatingMetadata,
    ctx: &RatingContext,
    units: Option<Vec<String>>,
) -> RatingResult<()> {
    if let Some(units) = &units {
        let rating_units = meta.rating_units();
        if units.len() != rating_units.len() {
            return Err(RatingError::configuration(format!(
                "{} data unit(s) supplied for rating {} which has {} parameter(s)",
                units.len(),
                meta.spec_id,
                rating_units.len()
            )));
        }
        for (data, rating) in units.iter().zip(&rating_units) {
            ctx.check_unit_pair(data, rating)?;
        }
    }
    meta.data_units = units;
    Ok(())
}

/// Runs `evaluate` on values converted from data units to rating units and
/// converts its result back.
pub(crate) fn rate_in_data_units(
    meta: &RatingMetadata,
    ctx: &RatingContext,
    ind: &[f64],
    evaluate: impl FnOnce(&[f64]) -> RatingResult<f64>,
) -> RatingResult<f64> {
    if ind.len() != meta.ind_param_count() {
        return Err(RatingError::invalid_input(format!(
            "rating {} expects {} independent value(s), got {}",
            meta.spec_id,
            meta.ind_param_count(),
            ind.len()
        )));
    }
    if ind.iter().copied().any(is_undefined) {
        return Ok(UNDEFINED_VALUE);
    }

    let Some(data_units) = &meta.data_units else {
        return evaluate(ind);
    };
    let rating_units = meta.rating_units();
    let converted = ind
        .iter()
        .zip(data_units.iter().zip(&rating_units))
        .map(|(&value, (from, to))| ctx.convert(value, from, to))
        .collect::<RatingResult<Vec<_>>>()?;

    let result = evaluate(&converted)?;
    match (rating_units.last(), data_units.last()) {
        (Some(from), Some(to)) => ctx.convert(result, from, to),
        _ => Ok(result),
    }
}

/// Reverse counterpart of [`rate_in_data_units`] for single-parameter ratings.
pub(crate) fn reverse_in_data_units(
    meta: &RatingMetadata,
    ctx: &RatingContext,
    dep: f64,
    evaluate: impl FnOnce(f64) -> RatingResult<f64>,
) -> RatingResult<f64> {
    if is_undefined(dep) {
        return Ok(UNDEFINED_VALUE);
    }
    let Some(data_units) = &meta.data_units else {
        return evaluate(dep);
    };
    let rating_units = meta.rating_units();

    let dep = match (data_units.last(), rating_units.last()) {
        (Some(from), Some(to)) => ctx.convert(dep, from, to)?,
        _ => dep,
    };
    let result = evaluate(dep)?;
    match (rating_units.first(), data_units.first()) {
        (Some(from), Some(to)) => ctx.convert(result, from, to),
        _ => Ok(result),
    }
}

pub(crate) fn extents_in_data_units(
    meta: &RatingMetadata,
    ctx: &RatingContext,
    extents: Vec<(f64, f64)>,
) -> RatingResult<Vec<(f64, f64)>> {
    let Some(data_units) = &meta.data_units else {
        return Ok(extents);
    };
    extents
        .into_iter()
        .zip(data_units.iter().zip(meta.rating_units()))
        .map(|((lo, hi), (to, from))| Ok((ctx.convert(lo, &from, to)?, ctx.convert(hi, &from, to)?)))
        .collect()
}

/// Any rating variant.
#[derive(Debug, Clone)]
pub enum Rating {
    Table(TableRating),
    Usgs(UsgsShiftedRating),
    Expression(ExpressionRating),
    Virtual(VirtualRating),
    Transitional(TransitionalRating),
}

macro_rules! dispatch {
    ($rating:expr, $inner:ident => $body:expr) => {
        match $rating {
            Rating::Table($inner) => $body,
            Rating::Usgs($inner) => $body,
            Rating::Expression($inner) => $body,
            Rating::Virtual($inner) => $body,
            Rating::Transitional($inner) => $body,
        }
    };
}

impl Rating {
    pub fn kind(&self) -> &'static str {
        match self {
            Rating::Table(_) => "table",
            Rating::Usgs(_) => "usgs",
            Rating::Expression(_) => "expression",
            Rating::Virtual(_) => "virtual",
            Rating::Transitional(_) => "transitional",
        }
    }

    pub fn metadata(&self) -> &RatingMetadata {
        dispatch!(self, rating => rating.metadata())
    }

    pub fn context(&self) -> &RatingContext {
        dispatch!(self, rating => rating.context())
    }

    pub fn effective_date(&self) -> DateTime<Utc> {
        self.metadata().effective_date
    }

    pub fn set_data_units(&mut self, units: Option<Vec<String>>) -> RatingResult<()> {
        dispatch!(self, rating => rating.set_data_units(units))
    }

    pub fn set_effective_date(&mut self, effective_date: DateTime<Utc>) -> RatingResult<()> {
        match self {
            Rating::Table(rating) => {
                rating.set_effective_date(effective_date);
                Ok(())
            }
            Rating::Usgs(rating) => rating.set_effective_date(effective_date),
            Rating::Expression(rating) => {
                rating.set_effective_date(effective_date);
                Ok(())
            }
            Rating::Virtual(rating) => {
                rating.set_effective_date(effective_date);
                Ok(())
            }
            Rating::Transitional(rating) => {
                rating.set_effective_date(effective_date);
                Ok(())
            }
        }
    }

    pub fn set_active(&mut self, active: bool) {
        dispatch!(self, rating => rating.set_active(active))
    }

    /// Creation cutoff for the dated parts of a rating; only USGS shifts carry one.
    pub fn rating_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Rating::Usgs(rating) => rating.rating_time(),
            _ => None,
        }
    }

    pub fn set_rating_time(&mut self, rating_time: Option<DateTime<Utc>>) {
        if let Rating::Usgs(rating) = self {
            rating.set_rating_time(rating_time);
        }
    }

    /// Start of the blend window a series uses when this rating is the lower
    /// neighbor: the newest shift on or before `limit` for USGS ratings.
    pub fn latest_shift_effective_date(&self, limit: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Rating::Usgs(rating) => rating.latest_shift_effective_date(limit),
            other => other.effective_date(),
        }
    }

    pub fn sources(&self) -> &[SourceRating] {
        match self {
            Rating::Virtual(rating) => rating.sources(),
            Rating::Transitional(rating) => rating.sources(),
            _ => &[],
        }
    }

    /// Depth-first walk over `office/spec` keys of this rating and its sources.
    pub(crate) fn check_cycles(&self, path: &mut Vec<String>) -> RatingResult<()> {
        let key = self.metadata().key();
        if path.contains(&key) {
            path.push(key);
            return Err(RatingError::Cycle { path: path.clone() });
        }
        path.push(key);
        for source in self.sources() {
            source.check_cycles(path)?;
        }
        path.pop();
        Ok(())
    }

    /// True when any source, at any depth, is `series` itself.
    pub(crate) fn references_series(&self, series: *const RatingSeries) -> bool {
        self.sources()
            .iter()
            .any(|source| source.references_series(series))
    }

    pub fn to_record(&self) -> RatingRecord {
        match self {
            Rating::Table(rating) => RatingRecord::Table(rating.to_record()),
            Rating::Usgs(rating) => RatingRecord::Usgs(rating.to_record()),
            Rating::Expression(rating) => RatingRecord::Expression(rating.to_record()),
            Rating::Virtual(rating) => RatingRecord::Virtual(rating.to_record()),
            Rating::Transitional(rating) => RatingRecord::Transitional(rating.to_record()),
        }
    }

    pub fn from_record(record: RatingRecord, ctx: &RatingContext) -> RatingResult<Self> {
        Ok(match record {
            RatingRecord::Table(record) => TableRating::from_record(record, ctx)?.into(),
            RatingRecord::Usgs(record) => UsgsShiftedRating::from_record(record, ctx)?.into(),
            RatingRecord::Expression(record) => ExpressionRating::from_record(record, ctx)?.into(),
            RatingRecord::Virtual(record) => VirtualRating::from_record(record, ctx)?.into(),
            RatingRecord::Transitional(record) => {
                TransitionalRating::from_record(record, ctx)?.into()
            }
        })
    }
}

impl Rate for Rating {
    fn ind_param_count(&self) -> usize {
        dispatch!(self, rating => rating.ind_param_count())
    }

    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        dispatch!(self, rating => rating.rate(time, ind))
    }

    fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        dispatch!(self, rating => rating.reverse_rate(time, dep))
    }

    fn extents(&self, time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        dispatch!(self, rating => rating.extents(time))
    }
}

impl From<TableRating> for Rating {
    fn from(rating: TableRating) -> Self {
        Rating::Table(rating)
    }
}

impl From<UsgsShiftedRating> for Rating {
    fn from(rating: UsgsShiftedRating) -> Self {
        Rating::Usgs(rating)
    }
}

impl From<ExpressionRating> for Rating {
    fn from(rating: ExpressionRating) -> Self {
        Rating::Expression(rating)
    }
}

impl From<VirtualRating> for Rating {
    fn from(rating: VirtualRating) -> Self {
        Rating::Virtual(rating)
    }
}

impl From<TransitionalRating> for Rating {
    fn from(rating: TransitionalRating) -> Self {
        Rating::Transitional(rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn undefined_sentinel_is_negated_f32_max() {
        assert_eq!(UNDEFINED_VALUE, -(f32::MAX as f64));
        assert!(is_undefined(UNDEFINED_VALUE));
        assert!(!is_undefined(0.0));
    }

    #[test]
    fn comparisons_use_a_tolerance() {
        assert!(approx_eq(1.0, 1.0 + 1e-9));
        assert!(!approx_lt(1.0, 1.0 + 1e-9));
        assert!(approx_lt(1.0, 1.0 + 1e-6));
        assert!(approx_gt(2.0, 1.0));
    }

    #[test]
    fn time_fraction_is_proportional() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("valid");
        let end = Utc.with_ymd_and_hms(2020, 1, 11, 0, 0, 0).single().expect("valid");
        let mid = Utc.with_ymd_and_hms(2020, 1, 3, 12, 0, 0).single().expect("valid");
        assert_eq!(time_fraction(mid, start, end), 0.25);
        assert_eq!(time_fraction(mid, start, start), 0.0);
    }
}
