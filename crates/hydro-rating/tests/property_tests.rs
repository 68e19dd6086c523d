mod common;

use common::{day, stage_flow, table};
use hydro_rating::{Rate, RatingMethod, RatingMethodSet, RatingSeries};
use proptest::prelude::*;

fn increasing_pairs() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.5f64..10.0, 0.5f64..50.0), 2..12).prop_map(|steps| {
        let mut x = 0.0;
        let mut y = 0.0;
        steps
            .into_iter()
            .map(|(dx, dy)| {
                x += dx;
                y += dy;
                (x, y)
            })
            .collect()
    })
}

fn linear_table(pairs: &[(f64, f64)]) -> hydro_rating::TableRating {
    table(
        "COLU.Stage;Flow.Linear.Production",
        "ft;cfs",
        day(0),
        pairs,
        RatingMethodSet::new(RatingMethod::Linear, RatingMethod::Error, RatingMethod::Error),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn stored_points_rate_to_their_dependent_values(pairs in increasing_pairs()) {
        let rating = linear_table(&pairs);
        for (x, y) in &pairs {
            prop_assert_eq!(rating.rate(day(0), &[*x]).expect("stored point"), *y);
        }
    }

    #[test]
    fn reverse_rating_inverts_monotonic_tables(pairs in increasing_pairs(), fraction in 0.0f64..1.0) {
        let rating = linear_table(&pairs);
        let first = pairs[0].0;
        let last = pairs[pairs.len() - 1].0;
        let stage = first + fraction * (last - first);

        let flow = rating.rate(day(0), &[stage]).expect("in range");
        let back = rating.reverse_rate(day(0), flow).expect("reverses");
        prop_assert!((back - stage).abs() < 1e-6, "stage {} came back as {}", stage, back);
    }

    #[test]
    fn rated_values_stay_within_the_extents(pairs in increasing_pairs(), fraction in 0.0f64..1.0) {
        let rating = linear_table(&pairs);
        let extents = rating.extents(day(0)).expect("extents");
        let stage = extents[0].0 + fraction * (extents[0].1 - extents[0].0);
        let flow = rating.rate(day(0), &[stage]).expect("in range");
        prop_assert!(flow >= extents[1].0 - 1e-9 && flow <= extents[1].1 + 1e-9);
    }

    #[test]
    fn series_at_an_effective_date_matches_that_rating(
        slopes in prop::collection::vec(0.1f64..20.0, 1..6),
        pick in any::<prop::sample::Index>(),
        stage in 0.0f64..100.0,
    ) {
        let ratings = slopes
            .iter()
            .enumerate()
            .map(|(i, slope)| stage_flow(i as i64 * 30, *slope))
            .collect();
        let series = RatingSeries::from_ratings(ratings).expect("valid series");
        let dates = series.effective_dates();
        let date = dates[pick.index(dates.len())];
        let direct = series.rating_at(date).expect("member rating");

        prop_assert_eq!(
            series.rate(date, &[stage]).expect("series rates"),
            direct.rate(date, &[stage]).expect("rating rates")
        );
    }
}
