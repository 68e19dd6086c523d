//! Stream ratings with dated stage shifts and log-interpolation offsets.

use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::method::{LogOffsets, RatingMethod, RatingMethodSet};
use super::point::RatingPoint;
use super::record::{MetadataRecord, ShiftRecord, UsgsRecord};
use super::table::{LookupTable, Segment};
use super::{
    extents_in_data_units, is_undefined, rate_in_data_units, reverse_in_data_units,
    set_data_units, time_fraction, Rate,
};
use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

const MAX_SHIFT_ITERATIONS: usize = 100;
const SHIFT_TOLERANCE: f64 = 1e-8;

const SHIFT_METHODS: RatingMethodSet = RatingMethodSet::new(
    RatingMethod::Linear,
    RatingMethod::Nearest,
    RatingMethod::Nearest,
);

const OFFSET_METHODS: RatingMethodSet = RatingMethodSet::new(
    RatingMethod::Previous,
    RatingMethod::Next,
    RatingMethod::Previous,
);

/// Stage correction curve effective from `effective_date`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftCurve {
    pub effective_date: DateTime<Utc>,
    pub create_date: Option<DateTime<Utc>>,
    pub active: bool,
    table: LookupTable,
}

impl ShiftCurve {
    /// Builds a curve from `(stage, shift)` pairs.
    pub fn new(effective_date: DateTime<Utc>, pairs: &[(f64, f64)]) -> RatingResult<Self> {
        Self::from_points(
            effective_date,
            pairs.iter().copied().map(RatingPoint::from).collect(),
        )
    }

    pub fn from_points(effective_date: DateTime<Utc>, points: Vec<RatingPoint>) -> RatingResult<Self> {
        Ok(Self {
            effective_date,
            create_date: None,
            active: true,
            table: LookupTable::new(points, SHIFT_METHODS)?,
        })
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_create_date(mut self, create_date: DateTime<Utc>) -> Self {
        self.create_date = Some(create_date);
        self
    }

    pub fn points(&self) -> &[RatingPoint] {
        self.table.points()
    }

    fn shift(&self, stage: f64) -> RatingResult<f64> {
        self.table.rate(&[stage])
    }

    fn to_record(&self) -> ShiftRecord {
        ShiftRecord {
            effective_date: self.effective_date,
            create_date: self.create_date,
            active: self.active,
            points: LookupTable::to_rows(self.table.points()),
        }
    }

    fn from_record(record: ShiftRecord) -> RatingResult<Self> {
        let points = LookupTable::points_from_rows(&record.points, &[SHIFT_METHODS])?;
        let mut curve = Self::from_points(record.effective_date, points)?.with_active(record.active);
        curve.create_date = record.create_date;
        Ok(curve)
    }
}

/// USGS-style stream rating: a single-parameter base table corrected by
/// time-varying stage shifts.
#[derive(Debug, Clone)]
pub struct UsgsShiftedRating {
    meta: RatingMetadata,
    ctx: RatingContext,
    base: LookupTable,
    shifts: BTreeMap<DateTime<Utc>, ShiftCurve>,
    offsets: Option<LookupTable>,
    rating_time: Option<DateTime<Utc>>,
    reversed: OnceLock<LookupTable>,
}

impl UsgsShiftedRating {
    pub fn new(meta: RatingMetadata, ctx: RatingContext, base: LookupTable) -> RatingResult<Self> {
        if meta.ind_param_count() != 1 || base.depth() != 1 {
            return Err(RatingError::configuration(format!(
                "USGS stream rating {} must have exactly one independent parameter",
                meta.spec_id
            )));
        }
        Ok(Self {
            meta,
            ctx,
            base,
            shifts: BTreeMap::new(),
            offsets: None,
            rating_time: None,
            reversed: OnceLock::new(),
        })
    }

    pub fn with_shifts(mut self, shifts: impl IntoIterator<Item = ShiftCurve>) -> RatingResult<Self> {
        for shift in shifts {
            self.add_shift(shift)?;
        }
        Ok(self)
    }

    /// Log-interpolation offsets as `(stage, offset)` pairs; one pair is a constant offset.
    pub fn with_offsets(mut self, pairs: &[(f64, f64)]) -> RatingResult<Self> {
        self.set_offsets(pairs.iter().copied().map(RatingPoint::from).collect())?;
        Ok(self)
    }

    pub fn metadata(&self) -> &RatingMetadata {
        &self.meta
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn base(&self) -> &LookupTable {
        &self.base
    }

    pub fn shifts(&self) -> impl Iterator<Item = &ShiftCurve> {
        self.shifts.values()
    }

    pub fn add_shift(&mut self, shift: ShiftCurve) -> RatingResult<()> {
        if shift.effective_date < self.meta.effective_date {
            return Err(RatingError::configuration(format!(
                "shift effective {} is earlier than base rating {} effective {}",
                shift.effective_date, self.meta.spec_id, self.meta.effective_date
            )));
        }
        if self.shifts.contains_key(&shift.effective_date) {
            return Err(RatingError::configuration(format!(
                "rating {} already has a shift effective {}",
                self.meta.spec_id, shift.effective_date
            )));
        }
        debug!(spec_id = %self.meta.spec_id, effective_date = %shift.effective_date, "adding shift");
        self.shifts.insert(shift.effective_date, shift);
        Ok(())
    }

    pub fn remove_shift(&mut self, effective_date: DateTime<Utc>) -> Option<ShiftCurve> {
        self.shifts.remove(&effective_date)
    }

    pub fn set_shift_active(&mut self, effective_date: DateTime<Utc>, active: bool) -> RatingResult<()> {
        match self.shifts.get_mut(&effective_date) {
            Some(shift) => {
                shift.active = active;
                Ok(())
            }
            None => Err(RatingError::lookup(format!(
                "rating {} has no shift effective {effective_date}",
                self.meta.spec_id
            ))),
        }
    }

    pub fn set_offsets(&mut self, points: Vec<RatingPoint>) -> RatingResult<()> {
        self.offsets = if points.is_empty() {
            None
        } else {
            Some(LookupTable::new(points, OFFSET_METHODS)?)
        };
        Ok(())
    }

    pub fn set_data_units(&mut self, units: Option<Vec<String>>) -> RatingResult<()> {
        set_data_units(&mut self.meta, &self.ctx, units)
    }

    pub fn set_points(&mut self, points: Vec<RatingPoint>) -> RatingResult<()> {
        let base = LookupTable::new(points, self.base.methods())?
            .with_extension(self.base.extension_points().to_vec())?;
        if base.depth() != 1 {
            return Err(RatingError::configuration(
                "USGS stream rating points must not be nested",
            ));
        }
        self.base = base;
        self.reversed = OnceLock::new();
        Ok(())
    }

    pub fn set_methods(&mut self, methods: RatingMethodSet) -> RatingResult<()> {
        self.base = self.base.with_methods(&[methods])?;
        self.reversed = OnceLock::new();
        Ok(())
    }

    pub fn set_effective_date(&mut self, effective_date: DateTime<Utc>) -> RatingResult<()> {
        if let Some(first) = self.shifts.keys().next() {
            if *first < effective_date {
                return Err(RatingError::configuration(format!(
                    "effective date {effective_date} is later than the first shift {first}"
                )));
            }
        }
        self.meta.effective_date = effective_date;
        self.reversed = OnceLock::new();
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) {
        self.meta.active = active;
        self.reversed = OnceLock::new();
    }

    pub fn rating_time(&self) -> Option<DateTime<Utc>> {
        self.rating_time
    }

    /// Hides shifts created after `rating_time`; `None` considers every active shift.
    pub fn set_rating_time(&mut self, rating_time: Option<DateTime<Utc>>) {
        self.rating_time = rating_time;
    }

    fn is_visible(&self, shift: &ShiftCurve) -> bool {
        if !shift.active {
            return false;
        }
        match (self.rating_time, shift.create_date) {
            (Some(cutoff), Some(created)) => created <= cutoff,
            _ => true,
        }
    }

    fn visible_shifts(&self) -> impl Iterator<Item = &ShiftCurve> {
        self.shifts.values().filter(|shift| self.is_visible(shift))
    }

    /// Newest visible shift date on or before `limit` that follows the base
    /// effective date, else the base effective date.
    pub fn latest_shift_effective_date(&self, limit: DateTime<Utc>) -> DateTime<Utc> {
        self.shifts
            .range(..=limit)
            .rev()
            .map(|(_, shift)| shift)
            .find(|shift| self.is_visible(shift) && shift.effective_date > self.meta.effective_date)
            .map_or(self.meta.effective_date, |shift| shift.effective_date)
    }

    /// Stage shift for an unshifted `stage` at `time`.
    pub fn shift_at(&self, time: DateTime<Utc>, stage: f64) -> RatingResult<f64> {
        let base_date = self.meta.effective_date;
        if time < base_date || self.visible_shifts().next().is_none() {
            return Ok(0.0);
        }

        let previous = self
            .shifts
            .range(..=time)
            .rev()
            .map(|(_, shift)| shift)
            .find(|shift| self.is_visible(shift));
        let next = self
            .shifts
            .range(time..)
            .map(|(_, shift)| shift)
            .find(|shift| self.is_visible(shift));

        let shift = match (previous, next) {
            (Some(previous), _) if previous.effective_date == time => previous.shift(stage)?,
            (Some(previous), None) => previous.shift(stage)?,
            (previous, Some(next)) => {
                let (start, start_shift) = match previous {
                    Some(previous) => (previous.effective_date, previous.shift(stage)?),
                    None => (base_date, 0.0),
                };
                let end_shift = next.shift(stage)?;
                start_shift
                    + time_fraction(time, start, next.effective_date) * (end_shift - start_shift)
            }
            (None, None) => 0.0,
        };
        Ok(self.ctx.round_shift(shift))
    }

    fn offset_at(&self, stage: f64) -> RatingResult<f64> {
        match &self.offsets {
            Some(offsets) => offsets.rate(&[stage]),
            None => Ok(0.0),
        }
    }

    fn reversed_table(&self) -> RatingResult<&LookupTable> {
        if let Some(reversed) = self.reversed.get() {
            return Ok(reversed);
        }
        let built = self.base.reversed()?;
        Ok(self.reversed.get_or_init(|| built))
    }

    fn rate_stage(&self, time: DateTime<Utc>, stage: f64) -> RatingResult<f64> {
        let corrected = stage + self.shift_at(time, stage)?;
        let offsets = |segment: &Segment| {
            let upper = segment.x1.max(segment.x2);
            Ok(LogOffsets {
                independent: self.offset_at(upper.min(stage))?,
                dependent: 0.0,
            })
        };
        self.base.rate_with_offsets(&[corrected], &offsets)
    }

    fn reverse_flow(&self, time: DateTime<Utc>, flow: f64) -> RatingResult<f64> {
        let offsets = |segment: &Segment| {
            Ok(LogOffsets {
                independent: 0.0,
                dependent: self.offset_at(segment.y1.min(segment.y2))?,
            })
        };
        let shifted = self.reversed_table()?.rate_with_offsets(&[flow], &offsets)?;
        if is_undefined(shifted) || time < self.meta.effective_date {
            return Ok(shifted);
        }

        let mut estimate = self.shift_at(time, shifted)?;
        for _ in 0..MAX_SHIFT_ITERATIONS {
            let refined = self.shift_at(time, shifted - estimate)?;
            let mean = (estimate + refined) / 2.0;
            if (refined - estimate).abs() <= SHIFT_TOLERANCE * mean.abs() {
                return Ok(shifted - mean);
            }
            estimate = mean;
        }

        warn!(
            spec_id = %self.meta.spec_id,
            flow,
            shifted_stage = shifted,
            shift = estimate,
            iterations = MAX_SHIFT_ITERATIONS,
            "shift iteration did not converge; using last estimate"
        );
        Ok(shifted - estimate)
    }

    pub fn to_record(&self) -> UsgsRecord {
        UsgsRecord {
            meta: MetadataRecord::from(&self.meta),
            methods: self.base.methods(),
            points: LookupTable::to_rows(self.base.points()),
            extension_points: LookupTable::to_rows(self.base.extension_points()),
            shifts: self.shifts.values().map(ShiftCurve::to_record).collect(),
            offsets: self
                .offsets
                .as_ref()
                .map(|offsets| LookupTable::to_rows(offsets.points()))
                .unwrap_or_default(),
        }
    }

    pub fn from_record(record: UsgsRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let meta = record.meta.into_metadata(ctx)?;
        let mut base = LookupTable::from_rows(&record.points, &[record.methods])?;
        if !record.extension_points.is_empty() {
            let extension = LookupTable::points_from_rows(&record.extension_points, &[record.methods])?;
            base = base.with_extension(extension)?;
        }

        let shifts = record
            .shifts
            .into_iter()
            .map(ShiftCurve::from_record)
            .collect::<RatingResult<Vec<_>>>()?;
        let mut rating = Self::new(meta, ctx.clone(), base)?.with_shifts(shifts)?;
        if !record.offsets.is_empty() {
            rating.set_offsets(LookupTable::points_from_rows(&record.offsets, &[OFFSET_METHODS])?)?;
        }
        Ok(rating)
    }
}

impl Rate for UsgsShiftedRating {
    fn ind_param_count(&self) -> usize {
        1
    }

    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        rate_in_data_units(&self.meta, &self.ctx, ind, |values| {
            self.rate_stage(time, values[0])
        })
    }

    fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        reverse_in_data_units(&self.meta, &self.ctx, dep, |flow| self.reverse_flow(time, flow))
    }

    fn extents(&self, _time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        extents_in_data_units(&self.meta, &self.ctx, self.base.extents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn rating(pairs: &[(f64, f64)], methods: RatingMethodSet) -> UsgsShiftedRating {
        let meta = RatingMetadata::parse("SWT", "COLU.Stage;Flow.USGS-EXSA.Production", "ft;cfs", base_date())
            .expect("valid metadata");
        let base = LookupTable::from_pairs(pairs, methods).expect("valid base");
        UsgsShiftedRating::new(meta, RatingContext::standard(), base).expect("valid rating")
    }

    fn linear_rating() -> UsgsShiftedRating {
        rating(&[(0.0, 0.0), (10.0, 100.0), (20.0, 400.0)], RatingMethodSet::default())
    }

    #[test]
    fn constant_shift_moves_the_stage() {
        let shifted = linear_rating()
            .with_shifts([ShiftCurve::new(base_date(), &[(0.0, 1.0)]).expect("valid shift")])
            .expect("valid shifts");
        let later = base_date() + Duration::days(10);

        assert_eq!(shifted.rate(later, &[4.0]).expect("rates"), 50.0);
        let stage = shifted.reverse_rate(later, 50.0).expect("reverses");
        assert!((stage - 4.0).abs() < 1e-9);
    }

    #[test]
    fn shifts_interpolate_in_time_from_the_base_date() {
        let next = base_date() + Duration::days(10);
        let shifted = linear_rating()
            .with_shifts([ShiftCurve::new(next, &[(0.0, 2.0)]).expect("valid shift")])
            .expect("valid shifts");

        let halfway = base_date() + Duration::days(5);
        assert!((shifted.shift_at(halfway, 3.0).expect("shift") - 1.0).abs() < 1e-12);
        assert_eq!(shifted.shift_at(base_date() - Duration::days(1), 3.0).expect("shift"), 0.0);
        assert_eq!(shifted.shift_at(next + Duration::days(1), 3.0).expect("shift"), 2.0);
        assert_eq!(shifted.latest_shift_effective_date(halfway), base_date());
        assert_eq!(shifted.latest_shift_effective_date(next), next);
    }

    #[test]
    fn stage_dependent_shift_reverses_by_iteration() {
        let shifted = linear_rating()
            .with_shifts([ShiftCurve::new(base_date(), &[(0.0, 0.0), (20.0, 1.0)]).expect("valid shift")])
            .expect("valid shifts");
        let time = base_date() + Duration::days(1);

        let flow = shifted.rate(time, &[6.0]).expect("rates");
        let stage = shifted.reverse_rate(time, flow).expect("reverses");
        assert!((stage - 6.0).abs() < 1e-6, "reversed stage {stage}");
    }

    #[test]
    fn inactive_shifts_are_ignored() {
        let shifted = linear_rating()
            .with_shifts([ShiftCurve::new(base_date(), &[(0.0, 1.0)])
                .expect("valid shift")
                .with_active(false)])
            .expect("valid shifts");
        let later = base_date() + Duration::days(1);
        assert_eq!(shifted.rate(later, &[5.0]).expect("rates"), 50.0);
    }

    #[test]
    fn rejects_shifts_before_the_base_rating() {
        let early = ShiftCurve::new(base_date() - Duration::days(1), &[(0.0, 1.0)]).expect("valid shift");
        match linear_rating().with_shifts([early]) {
            Err(RatingError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn log_offsets_are_removed_before_the_transform() {
        let methods = RatingMethodSet::new(
            RatingMethod::Logarithmic,
            RatingMethod::Null,
            RatingMethod::Null,
        );
        let plain = rating(&[(2.0, 10.0), (11.0, 1000.0)], methods);
        let offset = rating(&[(2.0, 10.0), (11.0, 1000.0)], methods)
            .with_offsets(&[(0.0, 1.0)])
            .expect("valid offsets");
        let time = base_date();

        // with offset 1: log10(stage - 1) runs 0..1 while flow runs 10..1000
        let value = offset.rate(time, &[4.162_277_660_168_379]).expect("rates");
        assert!((value - 100.0).abs() < 1e-6, "offset value {value}");
        assert!(plain.rate(time, &[4.162_277_660_168_379]).expect("rates") < 100.0);

        let stage = offset.reverse_rate(time, 100.0).expect("reverses");
        assert!((stage - 4.162_277_660_168_379).abs() < 1e-6);
    }

    #[test]
    fn log_offsets_are_looked_up_at_the_measured_stage() {
        let methods = RatingMethodSet::new(
            RatingMethod::Logarithmic,
            RatingMethod::Null,
            RatingMethod::Null,
        );
        let shifted = rating(&[(2.0, 10.0), (11.0, 1000.0)], methods)
            .with_offsets(&[(0.0, 0.5), (3.0, 1.0)])
            .expect("valid offsets")
            .with_shifts([ShiftCurve::new(base_date(), &[(0.0, 1.0)]).expect("valid shift")])
            .expect("valid shifts");

        // stage 2.5 selects offset 0.5 even though the shifted stage 3.5 lies past the offset table
        let log_x = |stage: f64| (stage - 0.5_f64).log10();
        let expected = 10f64.powf(1.0 + 2.0 * (log_x(3.5) - log_x(2.0)) / (log_x(11.0) - log_x(2.0)));
        let value = shifted.rate(base_date() + Duration::days(1), &[2.5]).expect("rates");
        assert!((value - expected).abs() < 1e-9, "value {value}, expected {expected}");
    }

    #[test]
    fn shift_reversal_gives_up_after_the_iteration_limit() {
        // the damped iteration alternates between shifts of 2 and 6 at stage 10
        let shifted = linear_rating()
            .with_shifts([ShiftCurve::new(base_date(), &[(4.0, -2.0), (8.0, 10.0), (10.0, 2.0)])
                .expect("valid shift")])
            .expect("valid shifts");
        let time = base_date() + Duration::days(1);

        assert_eq!(shifted.reverse_rate(time, 100.0).expect("last estimate"), 8.0);
    }

    #[test]
    fn shifts_are_rounded_to_the_configured_decimals() {
        let meta = RatingMetadata::parse("SWT", "COLU.Stage;Flow.USGS-EXSA.Production", "ft;cfs", base_date())
            .expect("valid metadata");
        let base = LookupTable::from_pairs(&[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default())
            .expect("valid base");
        let ctx = RatingContext::standard().with_shift_decimals(Some(2));
        let shifted = UsgsShiftedRating::new(meta, ctx, base)
            .expect("valid rating")
            .with_shifts([ShiftCurve::new(base_date(), &[(0.0, 0.0), (20.0, 1.0)]).expect("valid shift")])
            .expect("valid shifts");
        let time = base_date() + Duration::days(1);

        assert_eq!(shifted.shift_at(time, 2.5).expect("shift"), 0.13);
        let flow = shifted.rate(time, &[2.5]).expect("rates");
        assert!((flow - 26.3).abs() < 1e-9, "flow {flow}");
    }

    #[test]
    fn rating_time_hides_shifts_created_later() {
        let created = base_date() + Duration::days(40);
        let mut shifted = linear_rating()
            .with_shifts([ShiftCurve::new(base_date() + Duration::days(10), &[(0.0, 1.0)])
                .expect("valid shift")
                .with_create_date(created)])
            .expect("valid shifts");
        let later = base_date() + Duration::days(50);
        assert_eq!(shifted.rate(later, &[4.0]).expect("rates"), 50.0);

        shifted.set_rating_time(Some(base_date() + Duration::days(20)));
        assert_eq!(shifted.rate(later, &[4.0]).expect("rates"), 40.0);
        assert_eq!(shifted.shift_at(later, 4.0).expect("shift"), 0.0);
        assert_eq!(shifted.latest_shift_effective_date(later), base_date());

        shifted.set_rating_time(Some(created));
        assert_eq!(shifted.rate(later, &[4.0]).expect("rates"), 50.0);
    }
}
