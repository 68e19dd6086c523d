use super::context::RatingContext;
use super::ids::{RatingSpecId, UnitsId};
use super::method::{RatingMethod, RatingMethodSet};
use super::record::SeriesRecord;
use super::{check_value_sets, is_undefined, time_fraction, Rate, Rating, UNDEFINED_VALUE};
use crate::error::{RangeBound, RatingError, RatingResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Receives a notification after each successful series mutation.
pub trait SeriesObserver: Send + Sync {
    fn series_changed(&self, spec_id: &RatingSpecId);
}

impl<F> SeriesObserver for F
where
    F: Fn(&RatingSpecId) + Send + Sync,
{
    fn series_changed(&self, spec_id: &RatingSpecId) {
        self(spec_id)
    }
}

#[derive(Debug)]
struct SeriesState {
    methods: RatingMethodSet,
    rating_time: Option<DateTime<Utc>>,
    data_units: Option<Vec<String>>,
    ratings: BTreeMap<DateTime<Utc>, Arc<Rating>>,
    active: BTreeMap<DateTime<Utc>, Arc<Rating>>,
}

impl SeriesState {
    fn rebuild_active(&mut self) {
        let rating_time = self.rating_time;
        self.active = self
            .ratings
            .iter()
            .filter(|(_, rating)| rating.metadata().is_active_at(rating_time))
            .map(|(date, rating)| (*date, Arc::clone(rating)))
            .collect();
    }
}

/// How a value time maps onto the active ratings.
#[derive(Debug, Clone)]
enum Resolution {
    Undefined,
    Single(Arc<Rating>),
    Blend {
        lower: Arc<Rating>,
        upper: Arc<Rating>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clamp: bool,
    },
}

/// Dated ratings of one specification, selected and blended by value time.
///
/// All members share the office, spec id and units id. Readers resolve
/// against the active view under the lock and evaluate after releasing it.
pub struct RatingSeries {
    office_id: String,
    spec_id: RatingSpecId,
    units_id: UnitsId,
    ctx: RatingContext,
    state: Mutex<SeriesState>,
    observers: Mutex<Vec<Arc<dyn SeriesObserver>>>,
}

impl fmt::Debug for RatingSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatingSeries")
            .field("office_id", &self.office_id)
            .field("spec_id", &self.spec_id)
            .field("units_id", &self.units_id)
            .field("ratings", &self.state.try_lock().map(|state| state.ratings.len()).ok())
            .finish_non_exhaustive()
    }
}

impl RatingSeries {
    /// Empty series using the default series methods.
    pub fn new(
        office_id: impl Into<String>,
        spec_id: RatingSpecId,
        units_id: UnitsId,
        ctx: RatingContext,
    ) -> Self {
        Self {
            office_id: office_id.into(),
            spec_id,
            units_id,
            ctx,
            state: Mutex::new(SeriesState {
                methods: RatingMethodSet::series_default(),
                rating_time: None,
                data_units: None,
                ratings: BTreeMap::new(),
                active: BTreeMap::new(),
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Series taking its identity and context from the first rating.
    pub fn from_ratings(ratings: Vec<Rating>) -> RatingResult<Self> {
        let Some(first) = ratings.first() else {
            return Err(RatingError::configuration("a rating series needs at least one rating"));
        };
        let meta = first.metadata();
        let series = Self::new(
            meta.office_id.clone(),
            meta.spec_id.clone(),
            meta.units_id.clone(),
            first.context().clone(),
        );
        series.add_all(ratings)?;
        Ok(series)
    }

    pub fn with_methods(self, methods: RatingMethodSet) -> RatingResult<Self> {
        self.set_methods(methods)?;
        Ok(self)
    }

    pub fn office_id(&self) -> &str {
        &self.office_id
    }

    pub fn spec_id(&self) -> &RatingSpecId {
        &self.spec_id
    }

    pub fn units_id(&self) -> &UnitsId {
        &self.units_id
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn methods(&self) -> RatingMethodSet {
        self.lock().methods
    }

    pub fn rating_time(&self) -> Option<DateTime<Utc>> {
        self.lock().rating_time
    }

    /// Units values are exchanged in: the data units when set, otherwise the
    /// rating units.
    pub fn data_units(&self) -> Vec<String> {
        self.lock()
            .data_units
            .clone()
            .unwrap_or_else(|| self.units_id.all())
    }

    pub fn on_changed(&self, observer: Arc<dyn SeriesObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, SeriesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.series_changed(&self.spec_id);
        }
    }

    fn check_member(&self, rating: &Rating) -> RatingResult<()> {
        let meta = rating.metadata();
        if meta.office_id != self.office_id || meta.spec_id != self.spec_id {
            return Err(RatingError::configuration(format!(
                "rating {}/{} does not belong to series {}/{}",
                meta.office_id, meta.spec_id, self.office_id, self.spec_id
            )));
        }
        if meta.units_id != self.units_id {
            return Err(RatingError::configuration(format!(
                "rating {} uses units {} but series uses {}",
                meta.spec_id, meta.units_id, self.units_id
            )));
        }
        if rating.ind_param_count() != self.spec_id.ind_param_count() {
            return Err(RatingError::configuration(format!(
                "rating {} has {} independent parameter(s); series expects {}",
                meta.spec_id,
                rating.ind_param_count(),
                self.spec_id.ind_param_count()
            )));
        }
        if rating.references_series(self) {
            return Err(RatingError::Cycle {
                path: vec![meta.key(), format!("{}/{}", self.office_id, self.spec_id)],
            });
        }
        Ok(())
    }

    /// Applies the series data units and rating time to a rating about to join.
    fn adopt(mut rating: Rating, state: &SeriesState) -> RatingResult<Arc<Rating>> {
        if let Some(units) = &state.data_units {
            rating.set_data_units(Some(units.clone()))?;
        }
        rating.set_rating_time(state.rating_time);
        Ok(Arc::new(rating))
    }

    pub fn add(&self, rating: Rating) -> RatingResult<()> {
        self.add_all(vec![rating])
    }

    /// Adds every rating or none of them.
    pub fn add_all(&self, ratings: Vec<Rating>) -> RatingResult<()> {
        for rating in &ratings {
            self.check_member(rating)?;
        }
        {
            let mut state = self.lock();
            let mut added = BTreeMap::new();
            for rating in ratings {
                let date = rating.effective_date();
                if state.ratings.contains_key(&date) || added.contains_key(&date) {
                    return Err(RatingError::configuration(format!(
                        "series {} already has a rating effective {date}",
                        self.spec_id
                    )));
                }
                added.insert(date, Self::adopt(rating, &state)?);
            }
            debug!(spec = %self.spec_id, count = added.len(), "adding ratings to series");
            state.ratings.append(&mut added);
            state.rebuild_active();
        }
        self.notify();
        Ok(())
    }

    pub fn remove(&self, effective_date: DateTime<Utc>) -> RatingResult<Rating> {
        let removed = {
            let mut state = self.lock();
            let removed = state.ratings.remove(&effective_date).ok_or_else(|| {
                RatingError::lookup(format!(
                    "series {} has no rating effective {effective_date}",
                    self.spec_id
                ))
            })?;
            state.rebuild_active();
            removed
        };
        self.notify();
        Ok(Arc::unwrap_or_clone(removed))
    }

    /// Swaps in `rating` for the member with the same effective date.
    pub fn replace(&self, rating: Rating) -> RatingResult<Rating> {
        self.check_member(&rating)?;
        let previous = {
            let mut state = self.lock();
            let date = rating.effective_date();
            if !state.ratings.contains_key(&date) {
                return Err(RatingError::lookup(format!(
                    "series {} has no rating effective {date} to replace",
                    self.spec_id
                )));
            }
            let rating = Self::adopt(rating, &state)?;
            let previous = state.ratings.insert(date, rating);
            state.rebuild_active();
            previous
        };
        self.notify();
        previous
            .map(Arc::unwrap_or_clone)
            .ok_or_else(|| RatingError::lookup("replaced rating vanished"))
    }

    pub fn remove_all(&self) {
        {
            let mut state = self.lock();
            state.ratings.clear();
            state.active.clear();
        }
        self.notify();
    }

    /// Only ratings and shifts created on or before `rating_time` are
    /// considered; `None` considers every active one.
    pub fn set_rating_time(&self, rating_time: Option<DateTime<Utc>>) {
        {
            let mut state = self.lock();
            for rating in state.ratings.values_mut() {
                if matches!(**rating, Rating::Usgs(_)) && rating.rating_time() != rating_time {
                    Arc::make_mut(rating).set_rating_time(rating_time);
                }
            }
            state.rating_time = rating_time;
            state.rebuild_active();
        }
        self.notify();
    }

    pub fn set_methods(&self, methods: RatingMethodSet) -> RatingResult<()> {
        methods.validate_for_series()?;
        self.lock().methods = methods;
        self.notify();
        Ok(())
    }

    pub fn set_active(&self, effective_date: DateTime<Utc>, active: bool) -> RatingResult<()> {
        {
            let mut state = self.lock();
            let rating = state.ratings.get_mut(&effective_date).ok_or_else(|| {
                RatingError::lookup(format!(
                    "series {} has no rating effective {effective_date}",
                    self.spec_id
                ))
            })?;
            Arc::make_mut(rating).set_active(active);
            state.rebuild_active();
        }
        self.notify();
        Ok(())
    }

    /// Sets the data units of the series and every member.
    pub fn set_data_units(&self, units: Option<Vec<String>>) -> RatingResult<()> {
        {
            let mut state = self.lock();
            let mut updated = BTreeMap::new();
            for (date, rating) in &state.ratings {
                let mut rating = Rating::clone(rating);
                rating.set_data_units(units.clone())?;
                updated.insert(*date, Arc::new(rating));
            }
            state.ratings = updated;
            state.data_units = units;
            state.rebuild_active();
        }
        self.notify();
        Ok(())
    }

    pub fn effective_dates(&self) -> Vec<DateTime<Utc>> {
        self.lock().ratings.keys().copied().collect()
    }

    pub fn active_effective_dates(&self) -> Vec<DateTime<Utc>> {
        self.lock().active.keys().copied().collect()
    }

    /// Create dates of the members in effective-date order.
    pub fn create_dates(&self) -> Vec<Option<DateTime<Utc>>> {
        self.lock()
            .ratings
            .values()
            .map(|rating| rating.metadata().create_date)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ratings.is_empty()
    }

    pub fn latest_rating(&self) -> Option<Arc<Rating>> {
        self.lock().ratings.values().next_back().cloned()
    }

    pub fn rating_at(&self, effective_date: DateTime<Utc>) -> Option<Arc<Rating>> {
        self.lock().ratings.get(&effective_date).cloned()
    }

    pub fn ratings(&self) -> Vec<Arc<Rating>> {
        self.lock().ratings.values().cloned().collect()
    }

    fn resolve(&self, time: DateTime<Utc>) -> RatingResult<Resolution> {
        let state = self.lock();
        let active = &state.active;
        let methods = state.methods;

        let floor = active.range(..=time).next_back();
        let ceiling = active.range(time..).next();
        match (floor, ceiling) {
            (Some((date, rating)), _) | (_, Some((date, rating))) if *date == time => {
                Ok(Resolution::Single(Arc::clone(rating)))
            }
            (Some((lower_date, lower)), Some((upper_date, upper))) => {
                self.in_range(methods.in_range, time, (*lower_date, lower), (*upper_date, upper))
            }
            (None, Some(_)) => {
                let mut earliest = active.iter();
                let (first, second) = (earliest.next(), earliest.next());
                self.out_of_range(methods.out_range_low, RangeBound::Low, time, first, second)
            }
            (Some(_), None) => {
                let mut latest = active.iter().rev();
                let (last, before_last) = (latest.next(), latest.next());
                let (first, second) = match before_last {
                    Some(_) => (before_last, last),
                    None => (last, None),
                };
                self.out_of_range(methods.out_range_high, RangeBound::High, time, first, second)
            }
            (None, None) => Err(RatingError::lookup(format!(
                "series {} has no active ratings",
                self.spec_id
            ))),
        }
    }

    fn in_range(
        &self,
        method: RatingMethod,
        time: DateTime<Utc>,
        (lower_date, lower): (DateTime<Utc>, &Arc<Rating>),
        (upper_date, upper): (DateTime<Utc>, &Arc<Rating>),
    ) -> RatingResult<Resolution> {
        use RatingMethod::*;

        let resolution = match method {
            Null => Resolution::Undefined,
            Error => {
                return Err(RatingError::lookup(format!(
                    "{time} falls between ratings of {} effective {lower_date} and {upper_date}",
                    self.spec_id
                )))
            }
            Previous | Lower => Resolution::Single(Arc::clone(lower)),
            Next | Higher => Resolution::Single(Arc::clone(upper)),
            Closest | Nearest => {
                if time - lower_date < upper_date - time {
                    Resolution::Single(Arc::clone(lower))
                } else {
                    Resolution::Single(Arc::clone(upper))
                }
            }
            Linear | Logarithmic | LinLog | LogLin => {
                let mut start = lower.latest_shift_effective_date(upper_date).max(lower_date);
                if let Some(transition) = upper.metadata().transition_start_date {
                    if transition > start && transition < upper_date {
                        start = transition;
                    }
                }
                Resolution::Blend {
                    lower: Arc::clone(lower),
                    upper: Arc::clone(upper),
                    start,
                    end: upper_date,
                    clamp: true,
                }
            }
        };
        Ok(resolution)
    }

    /// `first` and `second` are the two active ratings nearest the crossed
    /// bound, earliest first; `second` is `None` with a single active rating.
    fn out_of_range(
        &self,
        method: RatingMethod,
        bound: RangeBound,
        time: DateTime<Utc>,
        first: Option<(&DateTime<Utc>, &Arc<Rating>)>,
        second: Option<(&DateTime<Utc>, &Arc<Rating>)>,
    ) -> RatingResult<Resolution> {
        use RatingMethod::*;

        let Some((first_date, first)) = first else {
            return Err(RatingError::lookup(format!(
                "series {} has no active ratings",
                self.spec_id
            )));
        };
        let edge = match (bound, second) {
            (RangeBound::High, Some((_, last))) => last,
            _ => first,
        };

        match method {
            Null => Ok(Resolution::Undefined),
            Error => Err(RatingError::out_of_range(
                bound,
                format!(
                    "{time} is {} every active rating of {}",
                    match bound {
                        RangeBound::Low => "before",
                        RangeBound::High => "after",
                    },
                    self.spec_id
                ),
            )),
            Linear | Logarithmic | LinLog | LogLin => match second {
                Some((second_date, second)) => Ok(Resolution::Blend {
                    lower: Arc::clone(first),
                    upper: Arc::clone(second),
                    start: *first_date,
                    end: *second_date,
                    clamp: false,
                }),
                None => Err(RatingError::lookup(format!(
                    "cannot extrapolate series {} with {method} from a single active rating",
                    self.spec_id
                ))),
            },
            _ => Ok(Resolution::Single(Arc::clone(edge))),
        }
    }

    fn apply(
        resolution: &Resolution,
        time: DateTime<Utc>,
        evaluate: impl Fn(&Rating) -> RatingResult<f64>,
    ) -> RatingResult<f64> {
        match resolution {
            Resolution::Undefined => Ok(UNDEFINED_VALUE),
            Resolution::Single(rating) => evaluate(rating),
            Resolution::Blend {
                lower,
                upper,
                start,
                end,
                clamp,
            } => {
                let y1 = evaluate(lower)?;
                if *clamp && time <= *start {
                    return Ok(y1);
                }
                let y2 = evaluate(upper)?;
                if is_undefined(y1) || is_undefined(y2) {
                    return Ok(UNDEFINED_VALUE);
                }
                let mut fraction = time_fraction(time, *start, *end);
                if *clamp {
                    fraction = fraction.max(0.0);
                }
                Ok(y1 + fraction * (y2 - y1))
            }
        }
    }

    /// Walks the members' sources for a rating key already on `path`.
    pub(crate) fn check_cycles(&self, path: &mut Vec<String>) -> RatingResult<()> {
        for rating in self.ratings() {
            rating.check_cycles(path)?;
        }
        Ok(())
    }

    /// True when `target` is this series or is used by any member at any depth.
    pub(crate) fn references_series(&self, target: *const RatingSeries) -> bool {
        std::ptr::eq(self, target)
            || self
                .ratings()
                .iter()
                .any(|rating| rating.references_series(target))
    }

    pub fn to_record(&self) -> SeriesRecord {
        let state = self.lock();
        SeriesRecord {
            office_id: self.office_id.clone(),
            spec_id: self.spec_id.clone(),
            units_id: self.units_id.clone(),
            methods: state.methods,
            rating_time: state.rating_time,
            data_units: state.data_units.clone(),
            ratings: state.ratings.values().map(|rating| rating.to_record()).collect(),
        }
    }

    pub fn from_record(record: SeriesRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let series = Self::new(record.office_id, record.spec_id, record.units_id, ctx.clone());
        series.set_methods(record.methods)?;
        series.set_rating_time(record.rating_time);
        let ratings = record
            .ratings
            .into_iter()
            .map(|rating| Rating::from_record(rating, ctx))
            .collect::<RatingResult<Vec<_>>>()?;
        series.add_all(ratings)?;
        if record.data_units.is_some() {
            series.set_data_units(record.data_units)?;
        }
        Ok(series)
    }
}

impl Rate for RatingSeries {
    fn ind_param_count(&self) -> usize {
        self.spec_id.ind_param_count()
    }

    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        let resolution = self.resolve(time)?;
        Self::apply(&resolution, time, |rating| rating.rate(time, ind))
    }

    /// Consecutive equal times reuse one resolution.
    fn rate_many(&self, times: &[DateTime<Utc>], ind_values: &[Vec<f64>]) -> RatingResult<Vec<f64>> {
        check_value_sets(self.ind_param_count(), times, ind_values)?;
        let mut resolved: Option<(DateTime<Utc>, Resolution)> = None;
        let mut results = Vec::with_capacity(times.len());
        for (i, &time) in times.iter().enumerate() {
            let resolution = match resolved.take() {
                Some((previous, resolution)) if previous == time => resolution,
                _ => self.resolve(time)?,
            };
            let values: Vec<f64> = ind_values.iter().map(|set| set[i]).collect();
            results.push(Self::apply(&resolution, time, |rating| rating.rate(time, &values))?);
            resolved = Some((time, resolution));
        }
        Ok(results)
    }

    fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        let resolution = self.resolve(time)?;
        Self::apply(&resolution, time, |rating| rating.reverse_rate(time, dep))
    }

    fn reverse_rate_many(&self, times: &[DateTime<Utc>], deps: &[f64]) -> RatingResult<Vec<f64>> {
        if deps.len() != times.len() {
            return Err(RatingError::invalid_input(format!(
                "{} value(s) supplied for {} time(s)",
                deps.len(),
                times.len()
            )));
        }
        let mut resolved: Option<(DateTime<Utc>, Resolution)> = None;
        let mut results = Vec::with_capacity(times.len());
        for (&time, &dep) in times.iter().zip(deps) {
            let resolution = match resolved.take() {
                Some((previous, resolution)) if previous == time => resolution,
                _ => self.resolve(time)?,
            };
            results.push(Self::apply(&resolution, time, |rating| rating.reverse_rate(time, dep))?);
            resolved = Some((time, resolution));
        }
        Ok(results)
    }

    /// Extents of the rating in effect at `time`, else the earliest one.
    fn extents(&self, time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        let rating = {
            let state = self.lock();
            state
                .active
                .range(..=time)
                .next_back()
                .or_else(|| state.active.iter().next())
                .map(|(_, rating)| Arc::clone(rating))
        };
        match rating {
            Some(rating) => rating.extents(time),
            None => Err(RatingError::lookup(format!(
                "series {} has no active ratings",
                self.spec_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::metadata::RatingMetadata;
    use crate::ratings::tabular::TableRating;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
            + Duration::days(offset)
    }

    fn rating(effective: i64, slope: f64) -> Rating {
        let meta = RatingMetadata::parse("SWT", "COLU.Stage;Flow.Linear.Production", "ft;cfs", day(effective))
            .expect("valid metadata");
        TableRating::from_pairs(
            meta,
            RatingContext::standard(),
            &[(0.0, 0.0), (100.0, 100.0 * slope)],
            RatingMethodSet::default(),
        )
        .expect("valid table")
        .into()
    }

    fn series(methods: RatingMethodSet) -> RatingSeries {
        RatingSeries::from_ratings(vec![rating(0, 1.0), rating(100, 2.0)])
            .expect("valid series")
            .with_methods(methods)
            .expect("valid methods")
    }

    #[test]
    fn blends_linearly_between_effective_dates() {
        let series = series(RatingMethodSet::series_default());
        assert_eq!(series.rate(day(50), &[10.0]).expect("rates"), 15.0);
        assert_eq!(series.rate(day(0), &[10.0]).expect("rates"), 10.0);
        assert_eq!(series.rate(day(100), &[10.0]).expect("rates"), 20.0);
        let stage = series.reverse_rate(day(50), 15.0).expect("reverses");
        assert!((stage - 11.25).abs() < 1e-9);
    }

    #[test]
    fn series_default_clamps_outside_the_dates() {
        let series = series(RatingMethodSet::series_default());
        assert_eq!(series.rate(day(-10), &[10.0]).expect("rates"), 10.0);
        assert_eq!(series.rate(day(200), &[10.0]).expect("rates"), 20.0);
    }

    #[test]
    fn out_of_range_methods_apply_to_whole_ratings() {
        let series = series(RatingMethodSet::new(
            RatingMethod::Previous,
            RatingMethod::Error,
            RatingMethod::Linear,
        ));
        match series.rate(day(-1), &[10.0]) {
            Err(RatingError::Range { bound: RangeBound::Low, .. }) => {}
            other => panic!("expected low range error, got {other:?}"),
        }
        assert_eq!(series.rate(day(200), &[10.0]).expect("extrapolates"), 30.0);
        assert_eq!(series.rate(day(50), &[10.0]).expect("previous"), 10.0);
    }

    #[test]
    fn inactive_and_uncreated_ratings_are_skipped() {
        let series = series(RatingMethodSet::series_default());
        series.set_active(day(100), false).expect("member exists");
        assert_eq!(series.active_effective_dates(), vec![day(0)]);
        assert_eq!(series.rate(day(50), &[10.0]).expect("rates"), 10.0);

        series.remove_all();
        match series.rate(day(50), &[10.0]) {
            Err(RatingError::Lookup(_)) => {}
            other => panic!("expected lookup error, got {other:?}"),
        }
    }

    #[test]
    fn membership_is_validated() {
        let series = series(RatingMethodSet::series_default());
        match series.add(rating(0, 3.0)) {
            Err(RatingError::Configuration(message)) => assert!(message.contains("already")),
            other => panic!("expected duplicate rejection, got {other:?}"),
        }

        let other_meta = RatingMetadata::parse("SWT", "KEYS.Stage;Flow.Linear.Production", "ft;cfs", day(5))
            .expect("valid metadata");
        let other = TableRating::from_pairs(other_meta, RatingContext::standard(), &[(0.0, 0.0), (1.0, 1.0)], RatingMethodSet::default())
            .expect("valid table");
        assert!(series.add(other.into()).is_err());

        let replaced = series.replace(rating(100, 4.0)).expect("replaces");
        assert_eq!(replaced.effective_date(), day(100));
        assert_eq!(series.rate(day(100), &[10.0]).expect("rates"), 40.0);
        assert_eq!(series.len(), 2);
        assert!(series.remove(day(7)).is_err());
    }

    #[test]
    fn log_methods_are_rejected_for_time() {
        let series = series(RatingMethodSet::series_default());
        for methods in [
            RatingMethodSet::new(RatingMethod::Logarithmic, RatingMethod::Next, RatingMethod::Previous),
            RatingMethodSet::new(RatingMethod::Linear, RatingMethod::Previous, RatingMethod::Previous),
            RatingMethodSet::new(RatingMethod::Linear, RatingMethod::Next, RatingMethod::Next),
        ] {
            assert!(series.set_methods(methods).is_err(), "{methods:?} should be rejected");
        }
    }

    #[test]
    fn observers_hear_about_mutations() {
        let series = series(RatingMethodSet::series_default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        series.on_changed(Arc::new(move |_: &RatingSpecId| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        series.add(rating(200, 3.0)).expect("adds");
        series.set_rating_time(Some(day(300)));
        assert!(series.add(rating(200, 3.0)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rate_many_matches_single_calls() {
        let series = series(RatingMethodSet::series_default());
        let times = vec![day(50), day(50), day(100)];
        let values = vec![vec![10.0, 20.0, 10.0]];
        let rated = series.rate_many(&times, &values).expect("rates");
        assert_eq!(rated, vec![15.0, 30.0, 20.0]);
        assert!(series.rate_many(&times, &[vec![1.0]]).is_err());
    }

    #[test]
    fn readers_see_whole_configurations_while_members_change() {
        let owned = series(RatingMethodSet::series_default());
        let series = &owned;
        // day 50 blends to 15, the day 50 member alone gives 30 and the
        // day 0 member alone gives 10
        let expected = [10.0, 15.0, 30.0];

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        (0..500)
                            .map(|_| series.rate(day(50), &[10.0]).expect("rates"))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            scope.spawn(move || {
                for _ in 0..100 {
                    series.add(rating(50, 3.0)).expect("adds");
                    series.set_active(day(50), false).expect("member exists");
                    series.set_active(day(50), true).expect("member exists");
                    series.remove(day(50)).expect("removes");
                    series.set_active(day(100), false).expect("member exists");
                    series.set_active(day(100), true).expect("member exists");
                }
            });

            for reader in readers {
                for value in reader.join().expect("reader finished") {
                    assert!(expected.contains(&value), "unexpected value {value}");
                }
            }
        });

        assert_eq!(series.effective_dates(), vec![day(0), day(100)]);
        assert_eq!(series.rate(day(50), &[10.0]).expect("rates"), 15.0);
    }
}
