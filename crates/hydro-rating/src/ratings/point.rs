use super::table::LookupTable;

/// Dependent side of a rating point: a value, or a table over the remaining parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Leaf(f64),
    Nested(LookupTable),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingPoint {
    pub independent: f64,
    pub value: PointValue,
    pub note: Option<String>,
}

impl RatingPoint {
    pub fn new(independent: f64, dependent: f64) -> Self {
        Self {
            independent,
            value: PointValue::Leaf(dependent),
            note: None,
        }
    }

    pub fn nested(independent: f64, table: LookupTable) -> Self {
        Self {
            independent,
            value: PointValue::Nested(table),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Number of independent parameters this point spans.
    pub fn depth(&self) -> usize {
        match &self.value {
            PointValue::Leaf(_) => 1,
            PointValue::Nested(table) => 1 + table.depth(),
        }
    }

    pub fn dependent(&self) -> Option<f64> {
        match self.value {
            PointValue::Leaf(value) => Some(value),
            PointValue::Nested(_) => None,
        }
    }
}

impl From<(f64, f64)> for RatingPoint {
    fn from((independent, dependent): (f64, f64)) -> Self {
        Self::new(independent, dependent)
    }
}
