use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::record::{ExpressionRecord, MetadataRecord};
use super::source::input_index;
use super::{rate_in_data_units, set_data_units, Rate};
use crate::error::{RatingError, RatingResult};
use crate::expression::{Bindings, Expression};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Rating computed by an algebraic expression of the independent values.
///
/// Inputs bind to the expression's variables in input-number order, so `I2`
/// precedes `I10`. Other names follow in name order.
#[derive(Debug, Clone)]
pub struct ExpressionRating {
    meta: RatingMetadata,
    ctx: RatingContext,
    expression: Arc<dyn Expression>,
    variables: Vec<String>,
}

impl ExpressionRating {
    pub fn new(meta: RatingMetadata, ctx: RatingContext, text: &str) -> RatingResult<Self> {
        let expression = ctx.parser().parse_expression(text)?;
        let mut variables = expression.variables();
        variables.sort_by(|a, b| {
            (input_index(a).unwrap_or(usize::MAX), a).cmp(&(input_index(b).unwrap_or(usize::MAX), b))
        });

        if variables.len() != meta.ind_param_count() {
            return Err(RatingError::configuration(format!(
                "expression \"{text}\" has {} variable(s) but rating {} has {} independent parameter(s)",
                variables.len(),
                meta.spec_id,
                meta.ind_param_count()
            )));
        }

        Ok(Self {
            meta,
            ctx,
            expression,
            variables,
        })
    }

    pub fn metadata(&self) -> &RatingMetadata {
        &self.meta
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn expression_text(&self) -> &str {
        self.expression.text()
    }

    pub fn set_data_units(&mut self, units: Option<Vec<String>>) -> RatingResult<()> {
        set_data_units(&mut self.meta, &self.ctx, units)
    }

    pub fn set_effective_date(&mut self, effective_date: DateTime<Utc>) {
        self.meta.effective_date = effective_date;
    }

    pub fn set_active(&mut self, active: bool) {
        self.meta.active = active;
    }

    fn evaluate(&self, values: &[f64]) -> RatingResult<f64> {
        let bindings: Bindings = self
            .variables
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect();
        Ok(self.expression.evaluate(&bindings)?)
    }

    pub fn to_record(&self) -> ExpressionRecord {
        ExpressionRecord {
            meta: MetadataRecord::from(&self.meta),
            expression: self.expression.text().to_string(),
        }
    }

    pub fn from_record(record: ExpressionRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let meta = record.meta.into_metadata(ctx)?;
        Self::new(meta, ctx.clone(), &record.expression)
    }
}

impl Rate for ExpressionRating {
    fn ind_param_count(&self) -> usize {
        self.meta.ind_param_count()
    }

    fn rate(&self, _time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        rate_in_data_units(&self.meta, &self.ctx, ind, |values| self.evaluate(values))
    }

    fn reverse_rate(&self, _time: DateTime<Utc>, _dep: f64) -> RatingResult<f64> {
        Err(RatingError::unsupported(format!(
            "expression rating {} cannot be reverse rated",
            self.meta.spec_id
        )))
    }

    fn extents(&self, _time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        Ok(vec![(f64::NEG_INFINITY, f64::INFINITY); self.ind_param_count() + 1])
    }
}
