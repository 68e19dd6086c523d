use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::method::RatingMethodSet;
use super::point::RatingPoint;
use super::record::{MetadataRecord, TableRecord};
use super::table::LookupTable;
use super::{
    extents_in_data_units, rate_in_data_units, reverse_in_data_units, set_data_units, Rate,
};
use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};
use std::sync::OnceLock;

/// Tabular rating over one or more independent parameters.
#[derive(Debug, Clone)]
pub struct TableRating {
    meta: RatingMetadata,
    ctx: RatingContext,
    table: LookupTable,
    reversed: OnceLock<LookupTable>,
}

impl TableRating {
    pub fn new(meta: RatingMetadata, ctx: RatingContext, table: LookupTable) -> RatingResult<Self> {
        check_depth(&meta, &table)?;
        Ok(Self {
            meta,
            ctx,
            table,
            reversed: OnceLock::new(),
        })
    }

    pub fn from_pairs(
        meta: RatingMetadata,
        ctx: RatingContext,
        pairs: &[(f64, f64)],
        methods: RatingMethodSet,
    ) -> RatingResult<Self> {
        Self::new(meta, ctx, LookupTable::from_pairs(pairs, methods)?)
    }

    pub fn metadata(&self) -> &RatingMetadata {
        &self.meta
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn table(&self) -> &LookupTable {
        &self.table
    }

    /// Units values are exchanged in; `None` restores the rating units.
    pub fn set_data_units(&mut self, units: Option<Vec<String>>) -> RatingResult<()> {
        set_data_units(&mut self.meta, &self.ctx, units)
    }

    pub fn set_points(&mut self, points: Vec<RatingPoint>) -> RatingResult<()> {
        let table = LookupTable::new(points, self.table.methods())?
            .with_extension(self.table.extension_points().to_vec())?;
        self.replace_table(table)
    }

    pub fn set_extension_points(&mut self, points: Vec<RatingPoint>) -> RatingResult<()> {
        let table = self.table.clone().with_extension(points)?;
        self.replace_table(table)
    }

    /// One method set per independent parameter, outermost first.
    pub fn set_methods(&mut self, methods: &[RatingMethodSet]) -> RatingResult<()> {
        let table = self.table.with_methods(methods)?;
        self.replace_table(table)
    }

    pub fn set_effective_date(&mut self, effective_date: DateTime<Utc>) {
        self.meta.effective_date = effective_date;
        self.reversed = OnceLock::new();
    }

    pub fn set_active(&mut self, active: bool) {
        self.meta.active = active;
        self.reversed = OnceLock::new();
    }

    fn replace_table(&mut self, table: LookupTable) -> RatingResult<()> {
        check_depth(&self.meta, &table)?;
        self.table = table;
        self.reversed = OnceLock::new();
        Ok(())
    }

    fn reversed_table(&self) -> RatingResult<&LookupTable> {
        if let Some(reversed) = self.reversed.get() {
            return Ok(reversed);
        }
        let built = self.table.reversed()?;
        Ok(self.reversed.get_or_init(|| built))
    }

    pub fn to_record(&self) -> TableRecord {
        TableRecord {
            meta: MetadataRecord::from(&self.meta),
            methods: self.table.methods_by_level(),
            points: LookupTable::to_rows(self.table.points()),
            extension_points: LookupTable::to_rows(self.table.extension_points()),
        }
    }

    pub fn from_record(record: TableRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let meta = record.meta.into_metadata(ctx)?;
        let table = LookupTable::from_rows(&record.points, &record.methods)?;
        let table = if record.extension_points.is_empty() {
            table
        } else {
            let extension = LookupTable::points_from_rows(&record.extension_points, &record.methods)?;
            table.with_extension(extension)?
        };
        Self::new(meta, ctx.clone(), table)
    }
}

fn check_depth(meta: &RatingMetadata, table: &LookupTable) -> RatingResult<()> {
    if table.depth() != meta.ind_param_count() {
        return Err(RatingError::configuration(format!(
            "rating {} has {} independent parameter(s) but its table spans {}",
            meta.spec_id,
            meta.ind_param_count(),
            table.depth()
        )));
    }
    Ok(())
}

impl Rate for TableRating {
    fn ind_param_count(&self) -> usize {
        self.meta.ind_param_count()
    }

    fn rate(&self, _time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        rate_in_data_units(&self.meta, &self.ctx, ind, |values| self.table.rate(values))
    }

    fn reverse_rate(&self, _time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        if self.ind_param_count() != 1 {
            return Err(RatingError::unsupported(format!(
                "cannot reverse rate {}: it has {} independent parameters",
                self.meta.spec_id,
                self.ind_param_count()
            )));
        }
        reverse_in_data_units(&self.meta, &self.ctx, dep, |value| {
            self.reversed_table()?.rate(&[value])
        })
    }

    fn extents(&self, _time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        extents_in_data_units(&self.meta, &self.ctx, self.table.extents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyPolicy;
    use crate::ratings::method::RatingMethod;
    use crate::ratings::is_undefined;
    use chrono::TimeZone;

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn stage_flow(pairs: &[(f64, f64)], methods: RatingMethodSet) -> TableRating {
        let meta = RatingMetadata::parse("SWT", "COLU.Stage;Flow.Linear.Production", "ft;cfs", at(2020))
            .expect("valid metadata");
        TableRating::from_pairs(meta, RatingContext::standard(), pairs, methods).expect("valid rating")
    }

    #[test]
    fn rates_and_reverse_rates_a_linear_table() {
        let rating = stage_flow(&[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default());
        assert_eq!(rating.rate(at(2021), &[5.0]).expect("rates"), 50.0);
        assert_eq!(rating.reverse_rate(at(2021), 25.0).expect("reverses"), 2.5);
    }

    #[test]
    fn mutation_clears_the_reversed_cache() {
        let mut rating = stage_flow(&[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default());
        assert_eq!(rating.reverse_rate(at(2021), 50.0).expect("reverses"), 5.0);

        rating
            .set_points(vec![RatingPoint::new(0.0, 0.0), RatingPoint::new(10.0, 200.0)])
            .expect("valid points");
        assert_eq!(rating.reverse_rate(at(2021), 50.0).expect("reverses"), 2.5);

        rating
            .set_methods(&[RatingMethodSet::new(
                RatingMethod::Linear,
                RatingMethod::Null,
                RatingMethod::Null,
            )])
            .expect("valid methods");
        assert!(is_undefined(rating.rate(at(2021), &[11.0]).expect("null")));
    }

    #[test]
    fn wrong_parameter_count_is_invalid_input() {
        let rating = stage_flow(&[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default());
        match rating.rate(at(2021), &[1.0, 2.0]) {
            Err(RatingError::InvalidInput(_)) => {}
            other => panic!("expected invalid input, got {other:?}"),
        }
    }

    #[test]
    fn data_units_convert_inputs_and_outputs() {
        let mut rating = stage_flow(&[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default());
        rating
            .set_data_units(Some(vec!["m".to_string(), "cfs".to_string()]))
            .expect("convertible units");

        let flow = rating.rate(at(2021), &[1.524]).expect("rates");
        assert!((flow - 50.0).abs() < 1e-9);
        let stage = rating.reverse_rate(at(2021), 50.0).expect("reverses");
        assert!((stage - 1.524).abs() < 1e-9);

        match rating.set_data_units(Some(vec!["cfs".to_string(), "cfs".to_string()])) {
            Err(RatingError::UnsafeOperation(_)) => {}
            other => panic!("expected unsafe operation, got {other:?}"),
        }
        match rating.set_data_units(Some(vec!["ft".to_string()])) {
            Err(RatingError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn permissive_ratings_pass_unconvertible_values_through() {
        let meta = RatingMetadata::parse("SWT", "COLU.Stage;Flow.Linear.Production", "ft;cfs", at(2020))
            .expect("valid metadata");
        let ctx = RatingContext::standard().with_safety(SafetyPolicy::silent());
        let mut rating = TableRating::from_pairs(meta, ctx, &[(0.0, 0.0), (10.0, 100.0)], RatingMethodSet::default())
            .expect("valid rating");

        rating
            .set_data_units(Some(vec!["cfs".to_string(), "cfs".to_string()]))
            .expect("permitted");
        assert_eq!(rating.rate(at(2021), &[5.0]).expect("rates unconverted"), 50.0);
    }
}
