#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use hydro_rating::{Rating, RatingContext, RatingMetadata, RatingMethodSet, TableRating};

pub fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base date")
        + Duration::days(offset)
}

pub fn metadata(spec: &str, units: &str, effective: DateTime<Utc>) -> RatingMetadata {
    RatingMetadata::parse("SWT", spec, units, effective).expect("valid metadata")
}

pub fn table(
    spec: &str,
    units: &str,
    effective: DateTime<Utc>,
    pairs: &[(f64, f64)],
    methods: RatingMethodSet,
) -> TableRating {
    TableRating::from_pairs(metadata(spec, units, effective), RatingContext::standard(), pairs, methods)
        .expect("valid table rating")
}

/// Stage to flow rating at `COLU` with `flow = slope * stage` over 0..=100 ft.
pub fn stage_flow(effective_day: i64, slope: f64) -> Rating {
    table(
        "COLU.Stage;Flow.Linear.Production",
        "ft;cfs",
        day(effective_day),
        &[(0.0, 0.0), (100.0, 100.0 * slope)],
        RatingMethodSet::default(),
    )
    .into()
}
