use super::method::{interpolate, Direction, LogOffsets, RatingMethod, RatingMethodSet};
use super::point::{PointValue, RatingPoint};
use super::record::PointRecord;
use super::{approx_eq, approx_gt, approx_lt, is_undefined, UNDEFINED_VALUE};
use crate::error::{RangeBound, RatingError, RatingResult};

/// Bracketing (or boundary) pair a value is interpolated along.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Segment {
    pub(crate) x1: f64,
    pub(crate) x2: f64,
    pub(crate) y1: f64,
    pub(crate) y2: f64,
}

/// Monotonic lookup table for one independent parameter, recursively nested
/// for the remaining parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    points: Vec<RatingPoint>,
    extension: Vec<RatingPoint>,
    effective: Vec<RatingPoint>,
    methods: RatingMethodSet,
    direction: Direction,
}

fn sorted_direction(points: &[RatingPoint]) -> RatingResult<Direction> {
    let direction = match points {
        [first, second, ..] if approx_lt(first.independent, second.independent) => {
            Direction::Increasing
        }
        [first, second, ..] if approx_gt(first.independent, second.independent) => {
            Direction::Decreasing
        }
        [first, second, ..] => {
            return Err(RatingError::configuration(format!(
                "independent values {} and {} are not distinct",
                first.independent, second.independent
            )))
        }
        _ => Direction::Increasing,
    };

    for pair in points.windows(2) {
        let (a, b) = (pair[0].independent, pair[1].independent);
        let ordered = match direction {
            Direction::Increasing => approx_lt(a, b),
            Direction::Decreasing => approx_gt(a, b),
        };
        if !ordered {
            return Err(RatingError::configuration(format!(
                "independent values are not strictly {}: {a} then {b}",
                direction.label()
            )));
        }
    }
    Ok(direction)
}

fn check_values(points: &[RatingPoint]) -> RatingResult<usize> {
    let Some(first) = points.first() else {
        return Err(RatingError::configuration("a rating table needs at least one point"));
    };
    let depth = first.depth();

    for point in points {
        if !point.independent.is_finite() || is_undefined(point.independent) {
            return Err(RatingError::configuration(format!(
                "independent value {} is not a usable number",
                point.independent
            )));
        }
        if let PointValue::Leaf(dependent) = point.value {
            if !dependent.is_finite() || is_undefined(dependent) {
                return Err(RatingError::configuration(format!(
                    "dependent value {dependent} at {} is not a usable number",
                    point.independent
                )));
            }
        }
        if point.depth() != depth {
            return Err(RatingError::configuration(format!(
                "point at {} spans {} parameter(s), expected {depth}",
                point.independent,
                point.depth()
            )));
        }
    }
    Ok(depth)
}

impl LookupTable {
    pub fn new(points: Vec<RatingPoint>, methods: RatingMethodSet) -> RatingResult<Self> {
        check_values(&points)?;
        let direction = sorted_direction(&points)?;
        methods.validate_for_table(direction)?;

        Ok(Self {
            effective: Vec::new(),
            extension: Vec::new(),
            points,
            methods,
            direction,
        })
    }

    /// Builds a single-parameter table from `(independent, dependent)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)], methods: RatingMethodSet) -> RatingResult<Self> {
        Self::new(pairs.iter().copied().map(RatingPoint::from).collect(), methods)
    }

    /// Merges extension points lying strictly outside the base domain.
    pub fn with_extension(mut self, extension: Vec<RatingPoint>) -> RatingResult<Self> {
        if extension.is_empty() {
            self.extension.clear();
            self.effective.clear();
            return Ok(self);
        }

        let depth = check_values(&extension)?;
        if depth != self.depth() {
            return Err(RatingError::configuration(format!(
                "extension points span {depth} parameter(s), the table spans {}",
                self.depth()
            )));
        }
        let direction = sorted_direction(&extension)?;
        if extension.len() > 1 && direction != self.direction {
            return Err(RatingError::configuration(format!(
                "extension points are {} but the table is {}",
                direction.label(),
                self.direction.label()
            )));
        }

        let (first, last) = self.domain();
        let before = |x: f64| match self.direction {
            Direction::Increasing => approx_lt(x, first),
            Direction::Decreasing => approx_gt(x, first),
        };
        let after = |x: f64| match self.direction {
            Direction::Increasing => approx_gt(x, last),
            Direction::Decreasing => approx_lt(x, last),
        };

        let mut effective: Vec<RatingPoint> = extension
            .iter()
            .filter(|point| before(point.independent))
            .cloned()
            .collect();
        effective.extend(self.points.iter().cloned());
        effective.extend(
            extension
                .iter()
                .filter(|point| after(point.independent))
                .cloned(),
        );

        self.extension = extension;
        self.effective = effective;
        Ok(self)
    }

    pub fn points(&self) -> &[RatingPoint] {
        &self.points
    }

    pub fn extension_points(&self) -> &[RatingPoint] {
        &self.extension
    }

    /// Base points with any extension points merged in.
    pub fn effective_points(&self) -> &[RatingPoint] {
        if self.effective.is_empty() {
            &self.points
        } else {
            &self.effective
        }
    }

    pub fn methods(&self) -> RatingMethodSet {
        self.methods
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn depth(&self) -> usize {
        self.points.first().map_or(1, RatingPoint::depth)
    }

    /// Method sets from this level down through the nested tables.
    pub fn methods_by_level(&self) -> Vec<RatingMethodSet> {
        let mut methods = vec![self.methods];
        if let Some(RatingPoint {
            value: PointValue::Nested(nested),
            ..
        }) = self.points.first()
        {
            methods.extend(nested.methods_by_level());
        }
        methods
    }

    /// Rebuilds the table with one method set per level.
    pub fn with_methods(&self, methods: &[RatingMethodSet]) -> RatingResult<Self> {
        let Some((own, rest)) = methods.split_first() else {
            return Err(RatingError::configuration("no rating methods supplied"));
        };
        if methods.len() != self.depth() {
            return Err(RatingError::configuration(format!(
                "{} method set(s) supplied for a table of {} parameter(s)",
                methods.len(),
                self.depth()
            )));
        }

        let points = self
            .points
            .iter()
            .map(|point| match &point.value {
                PointValue::Leaf(_) => Ok(point.clone()),
                PointValue::Nested(nested) => Ok(RatingPoint {
                    value: PointValue::Nested(nested.with_methods(rest)?),
                    ..point.clone()
                }),
            })
            .collect::<RatingResult<Vec<_>>>()?;

        Self::new(points, *own)?.with_extension(self.extension.clone())
    }

    fn domain(&self) -> (f64, f64) {
        let first = self.points.first().map_or(0.0, |p| p.independent);
        let last = self.points.last().map_or(0.0, |p| p.independent);
        (first, last)
    }

    /// Rates `values` (one per level) with no log offsets.
    pub fn rate(&self, values: &[f64]) -> RatingResult<f64> {
        self.rate_with_offsets(values, &|_| Ok(LogOffsets::default()))
    }

    /// Rates `values`, asking `offsets` for the log offsets of the segment
    /// used at this level whenever a log method interpolates.
    pub(crate) fn rate_with_offsets(
        &self,
        values: &[f64],
        offsets: &dyn Fn(&Segment) -> RatingResult<LogOffsets>,
    ) -> RatingResult<f64> {
        let Some((&x, rest)) = values.split_first() else {
            return Err(RatingError::invalid_input("no value supplied for table lookup"));
        };
        if values.len() != self.depth() {
            return Err(RatingError::invalid_input(format!(
                "table expects {} value(s), got {}",
                self.depth(),
                values.len()
            )));
        }
        if is_undefined(x) {
            return Ok(UNDEFINED_VALUE);
        }

        let points = self.effective_points();
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(RatingError::lookup("rating table has no points"));
        };
        let increasing = self.direction == Direction::Increasing;

        let below = if increasing {
            approx_lt(x, first.independent)
        } else {
            approx_gt(x, first.independent)
        };
        if below {
            return self.out_of_range(RangeBound::Low, x, rest, offsets);
        }
        let above = if increasing {
            approx_gt(x, last.independent)
        } else {
            approx_lt(x, last.independent)
        };
        if above {
            return self.out_of_range(RangeBound::High, x, rest, offsets);
        }

        let hi = points.partition_point(|point| {
            if increasing {
                approx_lt(point.independent, x)
            } else {
                approx_gt(point.independent, x)
            }
        });
        let (lo_point, hi_point) = match (hi.checked_sub(1).and_then(|lo| points.get(lo)), points.get(hi)) {
            (_, Some(point)) if approx_eq(point.independent, x) => return point_value(point, rest),
            (Some(lo_point), Some(hi_point)) => (lo_point, hi_point),
            _ => {
                return Err(RatingError::lookup(format!(
                    "value {x} could not be bracketed"
                )))
            }
        };

        let lower_is_lo = increasing;
        match self.methods.in_range {
            RatingMethod::Null => Ok(UNDEFINED_VALUE),
            RatingMethod::Error => Err(RatingError::lookup(format!(
                "value {x} does not match a table point and the in-range method is ERROR"
            ))),
            RatingMethod::Previous => point_value(lo_point, rest),
            RatingMethod::Next => point_value(hi_point, rest),
            RatingMethod::Lower if lower_is_lo => point_value(lo_point, rest),
            RatingMethod::Lower => point_value(hi_point, rest),
            RatingMethod::Higher if lower_is_lo => point_value(hi_point, rest),
            RatingMethod::Higher => point_value(lo_point, rest),
            RatingMethod::Closest | RatingMethod::Nearest => {
                let lo_distance = (x - lo_point.independent).abs();
                let hi_distance = (hi_point.independent - x).abs();
                if approx_lt(lo_distance, hi_distance) {
                    point_value(lo_point, rest)
                } else {
                    point_value(hi_point, rest)
                }
            }
            method => interpolate_between(method, x, lo_point, hi_point, rest, offsets),
        }
    }

    fn out_of_range(
        &self,
        bound: RangeBound,
        x: f64,
        rest: &[f64],
        offsets: &dyn Fn(&Segment) -> RatingResult<LogOffsets>,
    ) -> RatingResult<f64> {
        let points = self.effective_points();
        let method = match bound {
            RangeBound::Low => self.methods.out_range_low,
            RangeBound::High => self.methods.out_range_high,
        };

        let (edge, neighbor) = match bound {
            RangeBound::Low => (points.first(), points.get(1)),
            RangeBound::High => (
                points.last(),
                points.len().checked_sub(2).and_then(|i| points.get(i)),
            ),
        };
        let Some(edge) = edge else {
            return Err(RatingError::lookup("rating table has no points"));
        };

        match method {
            RatingMethod::Null => Ok(UNDEFINED_VALUE),
            RatingMethod::Error => Err(RatingError::out_of_range(bound, format!("value {x}"))),
            method if method.is_interpolating() => {
                let Some(neighbor) = neighbor else {
                    return Err(RatingError::lookup(format!(
                        "cannot extrapolate value {x} from a single-point table"
                    )));
                };
                match bound {
                    RangeBound::Low => interpolate_between(method, x, edge, neighbor, rest, offsets),
                    RangeBound::High => interpolate_between(method, x, neighbor, edge, rest, offsets),
                }
            }
            _ => point_value(edge, rest),
        }
    }

    /// `(min, max)` for each independent parameter followed by the dependent one.
    pub fn extents(&self) -> Vec<(f64, f64)> {
        let points = self.effective_points();
        let mut own = (f64::INFINITY, f64::NEG_INFINITY);
        let mut rest: Vec<(f64, f64)> = Vec::new();

        for point in points {
            own = (own.0.min(point.independent), own.1.max(point.independent));
            let nested = match &point.value {
                PointValue::Leaf(value) => vec![(*value, *value)],
                PointValue::Nested(table) => table.extents(),
            };
            if rest.is_empty() {
                rest = nested;
            } else {
                for (envelope, (lo, hi)) in rest.iter_mut().zip(nested) {
                    *envelope = (envelope.0.min(lo), envelope.1.max(hi));
                }
            }
        }

        let mut extents = vec![own];
        extents.extend(rest);
        extents
    }

    /// Table with the independent and dependent columns exchanged.
    pub fn reversed(&self) -> RatingResult<Self> {
        if self.depth() != 1 {
            return Err(RatingError::unsupported(format!(
                "cannot reverse a table of {} independent parameters",
                self.depth()
            )));
        }

        let swap = |points: &[RatingPoint]| -> Vec<RatingPoint> {
            points
                .iter()
                .filter_map(|point| {
                    point.dependent().map(|dependent| RatingPoint {
                        independent: dependent,
                        value: PointValue::Leaf(point.independent),
                        note: point.note.clone(),
                    })
                })
                .collect()
        };

        Self::new(swap(&self.points), self.methods.with_axes_swapped())?
            .with_extension(swap(&self.extension))
    }

    /// Flattens the table into rows of `[ind1, ind2, …, dep]`.
    pub fn to_rows(points: &[RatingPoint]) -> Vec<PointRecord> {
        let mut rows = Vec::new();
        for point in points {
            match &point.value {
                PointValue::Leaf(dependent) => rows.push(PointRecord {
                    values: vec![point.independent, *dependent],
                    note: point.note.clone(),
                }),
                PointValue::Nested(table) => {
                    for row in Self::to_rows(table.points()) {
                        let mut values = vec![point.independent];
                        values.extend(row.values);
                        rows.push(PointRecord {
                            values,
                            note: row.note,
                        });
                    }
                }
            }
        }
        rows
    }

    /// Inverse of [`LookupTable::to_rows`]: consecutive rows sharing their
    /// first value form one nested point.
    pub fn points_from_rows(
        rows: &[PointRecord],
        methods: &[RatingMethodSet],
    ) -> RatingResult<Vec<RatingPoint>> {
        let width = methods.len() + 1;
        if let Some(row) = rows.iter().find(|row| row.values.len() != width) {
            return Err(RatingError::configuration(format!(
                "point row {:?} has {} value(s), expected {width}",
                row.values,
                row.values.len()
            )));
        }

        let Some((_, nested_methods)) = methods.split_first() else {
            return Err(RatingError::configuration("no rating methods supplied"));
        };
        if nested_methods.is_empty() {
            return Ok(rows
                .iter()
                .map(|row| RatingPoint {
                    independent: row.values[0],
                    value: PointValue::Leaf(row.values[1]),
                    note: row.note.clone(),
                })
                .collect());
        }

        let mut points = Vec::new();
        let mut start = 0;
        while start < rows.len() {
            let key = rows[start].values[0];
            let end = rows[start..]
                .iter()
                .position(|row| !approx_eq(row.values[0], key))
                .map_or(rows.len(), |offset| start + offset);

            let group: Vec<PointRecord> = rows[start..end]
                .iter()
                .map(|row| PointRecord {
                    values: row.values[1..].to_vec(),
                    note: row.note.clone(),
                })
                .collect();
            let nested = LookupTable::from_rows(&group, nested_methods)?;
            points.push(RatingPoint::nested(key, nested));
            start = end;
        }
        Ok(points)
    }

    pub fn from_rows(rows: &[PointRecord], methods: &[RatingMethodSet]) -> RatingResult<Self> {
        let points = Self::points_from_rows(rows, methods)?;
        let own = methods
            .first()
            .copied()
            .ok_or_else(|| RatingError::configuration("no rating methods supplied"))?;
        Self::new(points, own)
    }
}

fn point_value(point: &RatingPoint, rest: &[f64]) -> RatingResult<f64> {
    match &point.value {
        PointValue::Leaf(value) => Ok(*value),
        PointValue::Nested(table) => table.rate(rest),
    }
}

fn interpolate_between(
    method: RatingMethod,
    x: f64,
    first: &RatingPoint,
    second: &RatingPoint,
    rest: &[f64],
    offsets: &dyn Fn(&Segment) -> RatingResult<LogOffsets>,
) -> RatingResult<f64> {
    let y1 = point_value(first, rest)?;
    let y2 = point_value(second, rest)?;
    if is_undefined(y1) || is_undefined(y2) {
        return Ok(UNDEFINED_VALUE);
    }

    let segment = Segment {
        x1: first.independent,
        x2: second.independent,
        y1,
        y2,
    };
    let offsets = if method.is_logarithmic() {
        offsets(&segment)?
    } else {
        LogOffsets::default()
    };

    Ok(interpolate(
        method,
        x,
        (segment.x1, segment.x2),
        (segment.y1, segment.y2),
        offsets,
    ))
}
