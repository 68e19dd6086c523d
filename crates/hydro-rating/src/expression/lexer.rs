use super::ExpressionError;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
}

impl Operator {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Rem => "%",
            Operator::Pow => "^",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
        }
    }

    fn keyword(word: &str) -> Option<Self> {
        match word {
            "AND" => Some(Operator::And),
            "OR" => Some(Operator::Or),
            "NOT" => Some(Operator::Not),
            "LT" => Some(Operator::Lt),
            "LE" => Some(Operator::Le),
            "GT" => Some(Operator::Gt),
            "GE" => Some(Operator::Ge),
            "EQ" => Some(Operator::Eq),
            "NE" => Some(Operator::Ne),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Ident(String),
    Op(Operator),
    LeftParen,
    RightParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(value) => format!("number {value}"),
            Token::Ident(name) => format!("identifier {name}"),
            Token::Op(op) => format!("operator {}", op.symbol()),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut chars = text.char_indices().peekable();
    let mut tokens = Vec::new();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            tokens.push(read_number(text, &mut chars)?);
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' {
            tokens.push(read_word(&mut chars));
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, c)| c);
        let token = match (ch, next) {
            ('+', _) => Token::Op(Operator::Add),
            ('-', _) => Token::Op(Operator::Sub),
            ('*', Some('*')) => {
                chars.next();
                Token::Op(Operator::Pow)
            }
            ('*', _) => Token::Op(Operator::Mul),
            ('/', _) => Token::Op(Operator::Div),
            ('%', _) => Token::Op(Operator::Rem),
            ('^', _) => Token::Op(Operator::Pow),
            ('(', _) => Token::LeftParen,
            (')', _) => Token::RightParen,
            (',', _) => Token::Comma,
            ('<', Some('=')) => {
                chars.next();
                Token::Op(Operator::Le)
            }
            ('<', Some('>')) => {
                chars.next();
                Token::Op(Operator::Ne)
            }
            ('<', _) => Token::Op(Operator::Lt),
            ('>', Some('=')) => {
                chars.next();
                Token::Op(Operator::Ge)
            }
            ('>', _) => Token::Op(Operator::Gt),
            ('=', Some('=')) => {
                chars.next();
                Token::Op(Operator::Eq)
            }
            ('=', _) => Token::Op(Operator::Eq),
            ('!', Some('=')) => {
                chars.next();
                Token::Op(Operator::Ne)
            }
            ('!', _) => Token::Op(Operator::Not),
            ('&', Some('&')) | ('|', Some('|')) => {
                chars.next();
                Token::Op(if ch == '&' { Operator::And } else { Operator::Or })
            }
            ('&', _) => Token::Op(Operator::And),
            ('|', _) => Token::Op(Operator::Or),
            _ => {
                return Err(ExpressionError::UnexpectedCharacter {
                    ch,
                    offset,
                    text: text.to_string(),
                })
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn read_number(
    text: &str,
    chars: &mut Peekable<CharIndices<'_>>,
) -> Result<Token, ExpressionError> {
    let mut literal = String::new();

    while let Some(&(_, ch)) = chars.peek() {
        if ch.is_ascii_digit() || ch == '.' {
            literal.push(ch);
            chars.next();
        } else {
            break;
        }
    }

    if let Some(&(offset, marker)) = chars.peek() {
        if marker == 'e' || marker == 'E' {
            let rest = &text[offset + 1..];
            let mut rest_chars = rest.chars();
            let exponent_follows = match rest_chars.next() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => rest_chars.next().is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_follows {
                literal.push(marker);
                chars.next();
                if let Some(&(_, sign)) = chars.peek() {
                    if sign == '+' || sign == '-' {
                        literal.push(sign);
                        chars.next();
                    }
                }
                while let Some(&(_, ch)) = chars.peek() {
                    if !ch.is_ascii_digit() {
                        break;
                    }
                    literal.push(ch);
                    chars.next();
                }
            }
        }
    }

    literal
        .parse::<f64>()
        .map(Token::Number)
        .map_err(|_| ExpressionError::MalformedNumber {
            literal,
            text: text.to_string(),
        })
}

fn read_word(chars: &mut Peekable<CharIndices<'_>>) -> Token {
    let mut word = String::new();

    if let Some(&(_, '$')) = chars.peek() {
        chars.next();
    }
    while let Some(&(_, ch)) = chars.peek() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch.to_ascii_uppercase());
            chars.next();
        } else {
            break;
        }
    }

    match Operator::keyword(&word) {
        Some(op) => Token::Op(op),
        None => Token::Ident(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_mixed_input() {
        let tokens = tokenize("2.5e-1 * $i1 >= 10 and !(r2 <> 3)").expect("tokenizes");
        assert_eq!(
            tokens,
            vec![
                Token::Number(0.25),
                Token::Op(Operator::Mul),
                Token::Ident("I1".to_string()),
                Token::Op(Operator::Ge),
                Token::Number(10.0),
                Token::Op(Operator::And),
                Token::Op(Operator::Not),
                Token::LeftParen,
                Token::Ident("R2".to_string()),
                Token::Op(Operator::Ne),
                Token::Number(3.0),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn exponent_marker_without_digits_is_an_identifier() {
        let tokens = tokenize("2E").expect("tokenizes");
        assert_eq!(
            tokens,
            vec![Token::Number(2.0), Token::Ident("E".to_string())]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        match tokenize("I1 # 2") {
            Err(ExpressionError::UnexpectedCharacter { ch, offset, .. }) => {
                assert_eq!(ch, '#');
                assert_eq!(offset, 3);
            }
            other => panic!("expected unexpected character, got {other:?}"),
        }
    }
}
