use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::record::{MetadataRecord, TransitionalRecord};
use super::source::{check_source_cycles, SourceRating};
use super::{is_undefined, rate_in_data_units, set_data_units, Rate, UNDEFINED_VALUE};
use crate::error::{RatingError, RatingResult};
use crate::expression::{Bindings, Condition, Expression};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Input(usize),
    Source(usize),
}

/// Variable names of a formula with what each one binds to.
type Operands = Vec<(String, Operand)>;

/// Rating that picks an evaluation by testing ordered conditions.
///
/// `evaluations[i]` applies when `conditions[i]` is the first condition to
/// hold; the last evaluation is the default.
#[derive(Debug, Clone)]
pub struct TransitionalRating {
    meta: RatingMetadata,
    ctx: RatingContext,
    conditions: Vec<(Arc<dyn Condition>, Operands)>,
    evaluations: Vec<(Arc<dyn Expression>, Operands)>,
    sources: Vec<SourceRating>,
}

impl TransitionalRating {
    pub fn new<S: AsRef<str>>(
        meta: RatingMetadata,
        ctx: RatingContext,
        conditions: &[S],
        evaluations: &[S],
        sources: Vec<SourceRating>,
    ) -> RatingResult<Self> {
        if evaluations.len() != conditions.len() + 1 {
            return Err(RatingError::configuration(format!(
                "transitional rating {} has {} condition(s) and {} evaluation(s); expected {} evaluation(s)",
                meta.spec_id,
                conditions.len(),
                evaluations.len(),
                conditions.len() + 1
            )));
        }
        check_sources(&meta, &ctx, &sources)?;

        let conditions = conditions
            .iter()
            .map(|text| -> RatingResult<_> {
                let condition = ctx.parser().parse_condition(text.as_ref())?;
                let operands = resolve(&meta, sources.len(), condition.text(), condition.variables())?;
                Ok((condition, operands))
            })
            .collect::<RatingResult<Vec<_>>>()?;
        let evaluations = evaluations
            .iter()
            .map(|text| -> RatingResult<_> {
                let expression = ctx.parser().parse_expression(text.as_ref())?;
                let operands = resolve(&meta, sources.len(), expression.text(), expression.variables())?;
                Ok((expression, operands))
            })
            .collect::<RatingResult<Vec<_>>>()?;

        check_source_cycles(&meta, &sources)?;
        Ok(Self {
            meta,
            ctx,
            conditions,
            evaluations,
            sources,
        })
    }

    pub fn metadata(&self) -> &RatingMetadata {
        &self.meta
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn sources(&self) -> &[SourceRating] {
        &self.sources
    }

    pub fn condition_texts(&self) -> Vec<String> {
        self.conditions
            .iter()
            .map(|(condition, _)| condition.text().to_string())
            .collect()
    }

    pub fn evaluation_texts(&self) -> Vec<String> {
        self.evaluations
            .iter()
            .map(|(expression, _)| expression.text().to_string())
            .collect()
    }

    /// Replaces the source ratings; every `Rn` in use must still exist.
    pub fn set_sources(&mut self, sources: Vec<SourceRating>) -> RatingResult<()> {
        check_sources(&self.meta, &self.ctx, &sources)?;
        let highest = self
            .conditions
            .iter()
            .map(|(_, operands)| operands)
            .chain(self.evaluations.iter().map(|(_, operands)| operands))
            .flatten()
            .filter_map(|(_, operand)| match operand {
                Operand::Source(index) => Some(index + 1),
                Operand::Input(_) => None,
            })
            .max()
            .unwrap_or(0);
        if highest > sources.len() {
            return Err(RatingError::configuration(format!(
                "transitional rating {} references R{highest} but only {} source rating(s) were supplied",
                self.meta.spec_id,
                sources.len()
            )));
        }
        check_source_cycles(&self.meta, &sources)?;
        self.sources = sources;
        Ok(())
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

    fn bind(
        &self,
        time: DateTime<Utc>,
        ind: &[f64],
        operands: &Operands,
        cache: &mut [Option<f64>],
    ) -> RatingResult<Bindings> {
        let mut bindings = Bindings::new();
        for (name, operand) in operands {
            let value = match *operand {
                Operand::Input(index) => ind[index],
                Operand::Source(index) => match cache[index] {
                    Some(value) => value,
                    None => {
                        let value = self.rate_source(time, index, ind)?;
                        cache[index] = Some(value);
                        value
                    }
                },
            };
            bindings.insert(name.clone(), value);
        }
        Ok(bindings)
    }

    fn rate_source(&self, time: DateTime<Utc>, index: usize, ind: &[f64]) -> RatingResult<f64> {
        let source = &self.sources[index];
        let values = ind
            .iter()
            .zip(self.meta.units_id.independent_units().iter().zip(source.units()))
            .map(|(&value, (from, to))| self.ctx.convert(value, from, to))
            .collect::<RatingResult<Vec<_>>>()?;
        source.rate(time, &values)
    }

    fn evaluate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        let mut cache = vec![None; self.sources.len()];
        let mut selected = self.evaluations.len() - 1;
        for (index, (condition, operands)) in self.conditions.iter().enumerate() {
            let bindings = self.bind(time, ind, operands, &mut cache)?;
            if condition.test(&bindings)? {
                selected = index;
                break;
            }
        }

        let (expression, operands) = &self.evaluations[selected];
        let bindings = self.bind(time, ind, operands, &mut cache)?;
        if bindings.values().copied().any(is_undefined) {
            return Ok(UNDEFINED_VALUE);
        }
        Ok(expression.evaluate(&bindings)?)
    }

    pub fn to_record(&self) -> TransitionalRecord {
        TransitionalRecord {
            meta: MetadataRecord::from(&self.meta),
            conditions: self.condition_texts(),
            evaluations: self.evaluation_texts(),
            sources: self.sources.iter().map(SourceRating::to_record).collect(),
        }
    }

    pub fn from_record(record: TransitionalRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let meta = record.meta.into_metadata(ctx)?;
        let sources = record
            .sources
            .into_iter()
            .map(|source| SourceRating::from_record(source, ctx))
            .collect::<RatingResult<Vec<_>>>()?;
        Self::new(
            meta,
            ctx.clone(),
            record.conditions.as_slice(),
            record.evaluations.as_slice(),
            sources,
        )
    }
}

fn check_sources(meta: &RatingMetadata, ctx: &RatingContext, sources: &[SourceRating]) -> RatingResult<()> {
    for (index, source) in sources.iter().enumerate() {
        if source.ind_param_count() != meta.ind_param_count() {
            return Err(RatingError::configuration(format!(
                "source rating R{} takes {} input(s) but transitional rating {} supplies {}",
                index + 1,
                source.ind_param_count(),
                meta.spec_id,
                meta.ind_param_count()
            )));
        }
        for (own, theirs) in meta.units_id.independent_units().iter().zip(source.units()) {
            ctx.check_unit_pair(own, theirs)?;
        }
    }
    Ok(())
}

fn resolve(
    meta: &RatingMetadata,
    source_count: usize,
    text: &str,
    variables: Vec<String>,
) -> RatingResult<Operands> {
    variables
        .into_iter()
        .map(|name| -> RatingResult<_> {
            let operand = name
                .strip_prefix('I')
                .and_then(|digits| digits.parse::<usize>().ok())
                .filter(|n| (1..=meta.ind_param_count()).contains(n))
                .map(|n| Operand::Input(n - 1))
                .or_else(|| {
                    name.strip_prefix('R')
                        .and_then(|digits| digits.parse::<usize>().ok())
                        .filter(|n| (1..=source_count).contains(n))
                        .map(|n| Operand::Source(n - 1))
                })
                .ok_or_else(|| {
                    RatingError::configuration(format!(
                        "\"{text}\" uses {name}; transitional rating {} accepts I1..I{} and R1..R{source_count}",
                        meta.spec_id,
                        meta.ind_param_count()
                    ))
                })?;
            Ok((name, operand))
        })
        .collect()
}

impl Rate for TransitionalRating {
    fn ind_param_count(&self) -> usize {
        self.meta.ind_param_count()
    }

    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        rate_in_data_units(&self.meta, &self.ctx, ind, |values| self.evaluate(time, values))
    }

    fn reverse_rate(&self, _time: DateTime<Utc>, _dep: f64) -> RatingResult<f64> {
        Err(RatingError::unsupported(format!(
            "transitional rating {} cannot be reverse rated",
            self.meta.spec_id
        )))
    }

    fn extents(&self, _time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        Err(RatingError::unsupported(format!(
            "transitional rating {} has no extents",
            self.meta.spec_id
        )))
    }
}
