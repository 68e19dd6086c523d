//! Unit conversion capability consumed by the rating engine.
//!
//! Ratings only ever talk to [`UnitConverter`]; [`UnitTable`] is the linear
//! conversion table shipped with the crate.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitsError {
    #[error("unknown unit \"{0}\"")]
    UnknownUnit(String),
    #[error("cannot convert from \"{from}\" to \"{to}\"")]
    Incompatible { from: String, to: String },
}

/// Conversion between named units.
pub trait UnitConverter: Send + Sync + fmt::Debug {
    fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitsError>;

    fn can_convert(&self, from: &str, to: &str) -> bool;

    fn is_known(&self, unit: &str) -> bool;
}

/// Physical dimension a unit measures; conversions never cross dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Length,
    Area,
    Volume,
    Flow,
    Temperature,
    Dimensionless,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct UnitDefinition {
    dimension: Dimension,
    factor: f64,
    offset: f64,
}

impl UnitDefinition {
    fn to_base(self, value: f64) -> f64 {
        value * self.factor + self.offset
    }

    fn from_base(self, value: f64) -> f64 {
        (value - self.offset) / self.factor
    }
}

/// Table of linear unit definitions keyed by unit name (case-sensitive).
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    units: HashMap<String, UnitDefinition>,
}

const CUBIC_FOOT_M3: f64 = 0.028_316_846_592;
const ACRE_FOOT_M3: f64 = 1_233.481_837_547_52;
const GALLON_M3: f64 = 0.003_785_411_784;

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units commonly found in stage, flow and storage ratings.
    pub fn standard() -> Self {
        use Dimension::*;

        Self::new()
            .with_unit("m", Length, 1.0, 0.0)
            .with_unit("cm", Length, 0.01, 0.0)
            .with_unit("mm", Length, 0.001, 0.0)
            .with_unit("km", Length, 1_000.0, 0.0)
            .with_unit("ft", Length, 0.3048, 0.0)
            .with_unit("in", Length, 0.0254, 0.0)
            .with_unit("mi", Length, 1_609.344, 0.0)
            .with_unit("m2", Area, 1.0, 0.0)
            .with_unit("km2", Area, 1.0e6, 0.0)
            .with_unit("ha", Area, 1.0e4, 0.0)
            .with_unit("ft2", Area, 0.092_903_04, 0.0)
            .with_unit("acre", Area, 4_046.856_422_4, 0.0)
            .with_unit("mi2", Area, 2_589_988.110_336, 0.0)
            .with_unit("m3", Volume, 1.0, 0.0)
            .with_unit("dam3", Volume, 1_000.0, 0.0)
            .with_unit("ft3", Volume, CUBIC_FOOT_M3, 0.0)
            .with_unit("ac-ft", Volume, ACRE_FOOT_M3, 0.0)
            .with_unit("kaf", Volume, ACRE_FOOT_M3 * 1_000.0, 0.0)
            .with_unit("gal", Volume, GALLON_M3, 0.0)
            .with_unit("mgal", Volume, GALLON_M3 * 1.0e6, 0.0)
            .with_unit("cms", Flow, 1.0, 0.0)
            .with_unit("m3/s", Flow, 1.0, 0.0)
            .with_unit("cfs", Flow, CUBIC_FOOT_M3, 0.0)
            .with_unit("kcfs", Flow, CUBIC_FOOT_M3 * 1_000.0, 0.0)
            .with_unit("gpm", Flow, GALLON_M3 / 60.0, 0.0)
            .with_unit("mgd", Flow, GALLON_M3 * 1.0e6 / 86_400.0, 0.0)
            .with_unit("C", Temperature, 1.0, 0.0)
            .with_unit("F", Temperature, 5.0 / 9.0, -32.0 * 5.0 / 9.0)
            .with_unit("K", Temperature, 1.0, -273.15)
            .with_unit("n/a", Dimensionless, 1.0, 0.0)
            .with_unit("%", Dimensionless, 0.01, 0.0)
    }

    /// Registers a unit: `base = value * factor + offset`.
    pub fn with_unit(
        mut self,
        name: impl Into<String>,
        dimension: Dimension,
        factor: f64,
        offset: f64,
    ) -> Self {
        self.units.insert(
            name.into(),
            UnitDefinition {
                dimension,
                factor,
                offset,
            },
        );
        self
    }

    pub fn dimension(&self, unit: &str) -> Option<Dimension> {
        self.units.get(unit).map(|definition| definition.dimension)
    }

    fn definition(&self, unit: &str) -> Result<UnitDefinition, UnitsError> {
        self.units
            .get(unit)
            .copied()
            .ok_or_else(|| UnitsError::UnknownUnit(unit.to_string()))
    }
}

impl UnitConverter for UnitTable {
    fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitsError> {
        if from == to {
            return Ok(value);
        }

        let source = self.definition(from)?;
        let target = self.definition(to)?;
        if source.dimension != target.dimension {
            return Err(UnitsError::Incompatible {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(target.from_base(source.to_base(value)))
    }

    fn can_convert(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        matches!(
            (self.dimension(from), self.dimension(to)),
            (Some(a), Some(b)) if a == b
        )
    }

    fn is_known(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }
}
