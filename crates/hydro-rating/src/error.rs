use crate::expression::ExpressionError;
use crate::units::UnitsError;
use std::fmt;

/// Which side of a rating's domain a value fell outside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Low,
    High,
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Low => f.write_str("low"),
            RangeBound::High => f.write_str("high"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RatingError {
    #[error("invalid rating configuration: {0}")]
    Configuration(String),
    #[error("unsafe operation: {0}")]
    UnsafeOperation(String),
    #[error("{detail} is out of range {bound}")]
    Range { bound: RangeBound, detail: String },
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("cycle detected in source ratings: {}", .path.join(" --> "))]
    Cycle { path: Vec<String> },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

impl RatingError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub(crate) fn out_of_range(bound: RangeBound, detail: impl Into<String>) -> Self {
        Self::Range {
            bound,
            detail: detail.into(),
        }
    }

    /// Short machine-friendly label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RatingError::Configuration(_) => "configuration",
            RatingError::UnsafeOperation(_) => "unsafe_operation",
            RatingError::Range { .. } => "range",
            RatingError::Lookup(_) => "lookup",
            RatingError::Cycle { .. } => "cycle",
            RatingError::Unsupported(_) => "unsupported",
            RatingError::InvalidInput(_) => "invalid_input",
            RatingError::Units(_) => "units",
            RatingError::Expression(_) => "expression",
        }
    }
}

pub type RatingResult<T> = Result<T, RatingError>;
