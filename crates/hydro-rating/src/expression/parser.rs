use super::lexer::{tokenize, Operator, Token};
use super::{Bindings, Condition, Expression, ExpressionError, ExpressionParser};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "ABS" => Function::Abs,
            "SQRT" => Function::Sqrt,
            "EXP" => Function::Exp,
            "LN" => Function::Ln,
            "LOG" | "LOG10" => Function::Log10,
            "SIN" => Function::Sin,
            "COS" => Function::Cos,
            "TAN" => Function::Tan,
            "FLOOR" => Function::Floor,
            "CEIL" => Function::Ceil,
            "ROUND" => Function::Round,
            "MIN" => Function::Min,
            "MAX" => Function::Max,
            _ => return None,
        };
        Some(function)
    }

    const fn is_variadic(self) -> bool {
        matches!(self, Function::Min | Function::Max)
    }

    fn apply(self, args: &[f64]) -> f64 {
        let x = args.first().copied().unwrap_or(f64::NAN);
        match self {
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Abs => x.abs(),
            Function::Sqrt => x.sqrt(),
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
            Function::Log10 => x.log10(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Floor => x.floor(),
            Function::Ceil => x.ceil(),
            Function::Round => x.round(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(String),
    Negate(Box<Node>),
    Not(Box<Node>),
    Binary {
        op: Operator,
        left: Box<Node>,
        right: Box<Node>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
}

fn truth(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

impl Node {
    fn evaluate(&self, bindings: &Bindings) -> Result<f64, ExpressionError> {
        let value = match self {
            Node::Number(value) => *value,
            Node::Variable(name) => *bindings
                .get(name)
                .ok_or_else(|| ExpressionError::UnboundVariable(name.clone()))?,
            Node::Negate(inner) => -inner.evaluate(bindings)?,
            Node::Not(inner) => truth(inner.evaluate(bindings)? == 0.0),
            Node::Binary { op, left, right } => {
                let a = left.evaluate(bindings)?;
                match op {
                    Operator::And if a == 0.0 => return Ok(0.0),
                    Operator::Or if a != 0.0 => return Ok(1.0),
                    _ => {}
                }
                let b = right.evaluate(bindings)?;
                match op {
                    Operator::Add => a + b,
                    Operator::Sub => a - b,
                    Operator::Mul => a * b,
                    Operator::Div => a / b,
                    Operator::Rem => a % b,
                    Operator::Pow => a.powf(b),
                    Operator::Lt => truth(a < b),
                    Operator::Le => truth(a <= b),
                    Operator::Gt => truth(a > b),
                    Operator::Ge => truth(a >= b),
                    Operator::Eq => truth(a == b),
                    Operator::Ne => truth(a != b),
                    Operator::And | Operator::Or | Operator::Not => truth(b != 0.0),
                }
            }
            Node::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&values)
            }
        };
        Ok(value)
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Number(_) => {}
            Node::Variable(name) => {
                out.insert(name.clone());
            }
            Node::Negate(inner) | Node::Not(inner) => inner.collect_variables(out),
            Node::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Node::Call { args, .. } => args.iter().for_each(|arg| arg.collect_variables(out)),
        }
    }
}

/// Recursive-descent parser over the token stream.
///
/// Precedence, loosest first: `OR`, `AND`, `NOT`, comparisons, `+ -`,
/// `* / %`, unary minus, `^` (right associative).
struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self, ExpressionError> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            position: 0,
        })
    }

    fn parse(mut self) -> Result<Node, ExpressionError> {
        let node = self.parse_or()?;
        match self.peek() {
            None => Ok(node),
            Some(token) => Err(self.unexpected(Some(token.clone()))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[Operator]) -> Option<Operator> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.position += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn unexpected(&self, token: Option<Token>) -> ExpressionError {
        ExpressionError::UnexpectedToken {
            found: token.map_or_else(|| "end of input".to_string(), |t| t.describe()),
            text: self.text.to_string(),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[Operator],
        next: fn(&mut Self) -> Result<Node, ExpressionError>,
    ) -> Result<Node, ExpressionError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Node, ExpressionError> {
        self.binary_level(&[Operator::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node, ExpressionError> {
        self.binary_level(&[Operator::And], Self::parse_not)
    }

    fn parse_not(&mut self) -> Result<Node, ExpressionError> {
        if self.eat_op(&[Operator::Not]).is_some() {
            return Ok(Node::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.parse_sum()?;
        let comparisons = [
            Operator::Lt,
            Operator::Le,
            Operator::Gt,
            Operator::Ge,
            Operator::Eq,
            Operator::Ne,
        ];
        match self.eat_op(&comparisons) {
            Some(op) => Ok(Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(self.parse_sum()?),
            }),
            None => Ok(left),
        }
    }

    fn parse_sum(&mut self) -> Result<Node, ExpressionError> {
        self.binary_level(&[Operator::Add, Operator::Sub], Self::parse_term)
    }

    fn parse_term(&mut self) -> Result<Node, ExpressionError> {
        self.binary_level(
            &[Operator::Mul, Operator::Div, Operator::Rem],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Node, ExpressionError> {
        match self.eat_op(&[Operator::Sub, Operator::Add]) {
            Some(Operator::Sub) => Ok(Node::Negate(Box::new(self.parse_unary()?))),
            Some(_) => self.parse_unary(),
            None => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.parse_primary()?;
        if self.eat_op(&[Operator::Pow]).is_some() {
            let exponent = self.parse_unary()?;
            return Ok(Node::Binary {
                op: Operator::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, ExpressionError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Node::Number(value)),
            Some(Token::LeftParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RightParen) => Ok(inner),
                    other => Err(self.unexpected(other)),
                }
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LeftParen)) {
                    self.position += 1;
                    return self.parse_call(name);
                }
                Ok(match name.as_str() {
                    "PI" => Node::Number(std::f64::consts::PI),
                    "E" => Node::Number(std::f64::consts::E),
                    _ => Node::Variable(name),
                })
            }
            other => Err(self.unexpected(other)),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Node, ExpressionError> {
        let function =
            Function::lookup(&name).ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;

        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RightParen)) {
            self.position += 1;
        } else {
            loop {
                args.push(self.parse_or()?);
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RightParen) => break,
                    other => return Err(self.unexpected(other)),
                }
            }
        }

        let arity_ok = if function.is_variadic() {
            !args.is_empty()
        } else {
            args.len() == 1
        };
        if !arity_ok {
            return Err(ExpressionError::Arity {
                name,
                expected: (if function.is_variadic() { "1 or more" } else { "1" }).to_string(),
                found: args.len(),
            });
        }

        Ok(Node::Call { function, args })
    }
}

/// An expression tree produced by [`MathParser`]. Usable both as an
/// [`Expression`] and as a [`Condition`] (non-zero is true).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpression {
    text: String,
    root: Node,
    variables: Vec<String>,
}

impl ParsedExpression {
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let root = Parser::new(text)?.parse()?;
        let mut names = BTreeSet::new();
        root.collect_variables(&mut names);
        Ok(Self {
            text: text.trim().to_string(),
            root,
            variables: names.into_iter().collect(),
        })
    }
}

impl Expression for ParsedExpression {
    fn text(&self) -> &str {
        &self.text
    }

    fn variables(&self) -> Vec<String> {
        self.variables.clone()
    }

    fn evaluate(&self, bindings: &Bindings) -> Result<f64, ExpressionError> {
        self.root.evaluate(bindings)
    }
}

impl Condition for ParsedExpression {
    fn text(&self) -> &str {
        &self.text
    }

    fn variables(&self) -> Vec<String> {
        self.variables.clone()
    }

    fn test(&self, bindings: &Bindings) -> Result<bool, ExpressionError> {
        Ok(self.root.evaluate(bindings)? != 0.0)
    }
}

/// Bundled [`ExpressionParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MathParser;

impl ExpressionParser for MathParser {
    fn parse_expression(&self, text: &str) -> Result<Arc<dyn Expression>, ExpressionError> {
        Ok(Arc::new(ParsedExpression::parse(text)?))
    }

    fn parse_condition(&self, text: &str) -> Result<Arc<dyn Condition>, ExpressionError> {
        Ok(Arc::new(ParsedExpression::parse(text)?))
    }
}
