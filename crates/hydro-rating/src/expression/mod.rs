//! Algebraic expression and boolean condition capability.
//!
//! The rating variants only depend on the [`Expression`], [`Condition`] and
//! [`ExpressionParser`] traits. [`MathParser`] is the bundled implementation.

mod lexer;
mod parser;

pub use parser::{MathParser, ParsedExpression};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Variable values keyed by canonical (upper-case) variable name.
pub type Bindings = HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at offset {offset} in \"{text}\"")]
    UnexpectedCharacter {
        ch: char,
        offset: usize,
        text: String,
    },
    #[error("malformed number \"{literal}\" in \"{text}\"")]
    MalformedNumber { literal: String, text: String },
    #[error("unexpected {found} in \"{text}\"")]
    UnexpectedToken { found: String, text: String },
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("function {name} takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("variable {0} is not bound")]
    UnboundVariable(String),
}

/// A parsed algebraic expression.
pub trait Expression: Send + Sync + fmt::Debug {
    /// Source text the expression was parsed from.
    fn text(&self) -> &str;

    /// Free variable names, canonical and sorted.
    fn variables(&self) -> Vec<String>;

    fn evaluate(&self, bindings: &Bindings) -> Result<f64, ExpressionError>;
}

/// A parsed boolean condition.
pub trait Condition: Send + Sync + fmt::Debug {
    fn text(&self) -> &str;

    fn variables(&self) -> Vec<String>;

    fn test(&self, bindings: &Bindings) -> Result<bool, ExpressionError>;
}

pub trait ExpressionParser: Send + Sync + fmt::Debug {
    fn parse_expression(&self, text: &str) -> Result<Arc<dyn Expression>, ExpressionError>;

    fn parse_condition(&self, text: &str) -> Result<Arc<dyn Condition>, ExpressionError>;
}

/// Canonical spelling of a variable name: upper-case, without a `$` sigil.
pub fn canonical_variable(name: &str) -> String {
    name.trim().trim_start_matches('$').to_ascii_uppercase()
}
