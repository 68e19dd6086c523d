mod common;

use common::{day, metadata};
use hydro_rating::{
    LookupTable, Rate, RatingContext, RatingMethodSet, RatingSeries, ShiftCurve, TableRating,
    UsgsShiftedRating,
};

const BASE: [(f64, f64); 4] = [(0.0, 0.0), (5.0, 40.0), (10.0, 150.0), (20.0, 600.0)];

fn usgs(effective_day: i64) -> UsgsShiftedRating {
    UsgsShiftedRating::new(
        metadata("COLU.Stage;Flow.USGS-EXSA.Production", "ft;cfs", day(effective_day)),
        RatingContext::standard(),
        LookupTable::from_pairs(&BASE, RatingMethodSet::default()).expect("valid base"),
    )
    .expect("valid rating")
}

#[test]
fn without_active_shifts_the_base_table_is_used() {
    let table = TableRating::from_pairs(
        metadata("COLU.Stage;Flow.Linear.Production", "ft;cfs", day(0)),
        RatingContext::standard(),
        &BASE,
        RatingMethodSet::default(),
    )
    .expect("valid table");
    let rating = usgs(0)
        .with_shifts([ShiftCurve::new(day(5), &[(0.0, 3.0)])
            .expect("valid shift")
            .with_active(false)])
        .expect("valid shifts");

    for stage in [0.0, 2.5, 7.0, 13.0, 20.0] {
        assert_eq!(
            rating.rate(day(10), &[stage]).expect("usgs rates"),
            table.rate(day(10), &[stage]).expect("table rates")
        );
    }
    for flow in [0.0, 40.0, 95.0, 420.0] {
        assert_eq!(
            rating.reverse_rate(day(10), flow).expect("usgs reverses"),
            table.reverse_rate(day(10), flow).expect("table reverses")
        );
    }
}

#[test]
fn shifted_ratings_reverse_to_the_original_stage() {
    let rating = usgs(0)
        .with_shifts([
            ShiftCurve::new(day(10), &[(0.0, 0.5), (20.0, 0.1)]).expect("valid shift"),
            ShiftCurve::new(day(40), &[(0.0, -0.25), (20.0, 0.4)]).expect("valid shift"),
        ])
        .expect("valid shifts");

    for time in [day(5), day(10), day(25), day(60)] {
        for stage in [1.0, 6.0, 12.0, 18.0] {
            let flow = rating.rate(time, &[stage]).expect("rates");
            let back = rating.reverse_rate(time, flow).expect("reverses");
            assert!((back - stage).abs() < 1e-6, "stage {stage} came back as {back}");
        }
    }
}

#[test]
fn series_blending_starts_at_the_latest_shift() {
    let first = usgs(0)
        .with_shifts([ShiftCurve::new(day(50), &[(0.0, 1.0)]).expect("valid shift")])
        .expect("valid shifts");
    let second = usgs(100);
    let series = RatingSeries::from_ratings(vec![first.into(), second.into()]).expect("valid series");

    let shifted = series.rate(day(50), &[4.0]).expect("rates");
    assert_eq!(shifted, series.rating_at(day(0)).expect("first rating").rate(day(50), &[4.0]).expect("rates"));

    // halfway between the shift date and the next rating
    let midway = series.rate(day(75), &[4.0]).expect("rates");
    let unshifted = series.rating_at(day(100)).expect("second rating").rate(day(75), &[4.0]).expect("rates");
    assert!((midway - (shifted + unshifted) / 2.0).abs() < 1e-9, "midway {midway}");
}

#[test]
fn series_uses_the_lower_rating_until_a_later_shift_starts_the_blend() {
    let first = usgs(0)
        .with_shifts([ShiftCurve::new(day(80), &[(0.0, 1.0)]).expect("valid shift")])
        .expect("valid shifts");
    let lower = first.clone();
    let series = RatingSeries::from_ratings(vec![first.into(), usgs(100).into()]).expect("valid series");

    // the day 80 shift is still phasing in on day 50
    let alone = lower.rate(day(50), &[4.0]).expect("rates");
    assert_eq!(alone, 37.0);
    assert_eq!(series.rate(day(50), &[4.0]).expect("rates"), alone);
    assert_eq!(series.rate(day(80), &[4.0]).expect("rates"), 40.0);

    // halfway from the shift to the next rating: 40 shifted, 32 unshifted
    assert!((series.rate(day(90), &[4.0]).expect("rates") - 36.0).abs() < 1e-9);
}

#[test]
fn series_rating_time_hides_shifts_created_later() {
    let shifted = usgs(0)
        .with_shifts([ShiftCurve::new(day(10), &[(0.0, 1.0)])
            .expect("valid shift")
            .with_create_date(day(40))])
        .expect("valid shifts");
    let series = RatingSeries::from_ratings(vec![shifted.clone().into()]).expect("valid series");
    assert_eq!(series.rate(day(50), &[4.0]).expect("rates"), 40.0);

    series.set_rating_time(Some(day(20)));
    assert_eq!(series.rate(day(50), &[4.0]).expect("rates"), 32.0);

    // members joining later take the series rating time too
    series.replace(shifted.into()).expect("replaces");
    assert_eq!(series.rate(day(50), &[4.0]).expect("rates"), 32.0);

    series.set_rating_time(None);
    assert_eq!(series.rate(day(50), &[4.0]).expect("rates"), 40.0);
}
