//! Recursive-descent expression evaluator.
//!
//! Evaluates one expression directly against a token slice and a starting
//! offset — there is no intermediate expression tree. Precedence is
//! encoded as a chain of methods, lowest first: `or_expr` → `and_expr` →
//! `not_expr` → `comparison` → `add_expr` → `mul_expr` → `unary_expr` →
//! `pow_expr` → `atom`, mirroring the classic precedence-climbing parser
//! shape, just evaluating values instead of building nodes.
//!
//! Anything that needs interpreter state — a variable, an array slot,
//! `RND`, `PEEK`, the cursor column, or a user-function call — goes
//! through [`EvalHost`] rather than a concrete interpreter type, so the
//! evaluator can be driven in tests against a mock host.

use crate::error::{BasicError, Result};
use crate::lexer::Token;
use crate::value::{format_number, parse_val, Value};

/// The callback surface the evaluator needs from whatever owns runtime
/// state. Implemented by the interpreter; a test can implement it with a
/// plain struct backed by a `HashMap`.
pub trait EvalHost {
    fn get_variable(&mut self, name: &str) -> Value;
    fn get_array_value(&mut self, name: &str, indices: &[i64]) -> Result<Value>;
    fn random(&mut self, arg: f64) -> f64;
    fn peek(&mut self, addr: i64) -> Result<i64>;
    fn cursor_column(&mut self) -> i64;
    fn call_user_function(&mut self, name: &str, arg: Value) -> Result<Value>;
}

/// Evaluates one expression starting at `pos` in `tokens`, returning the
/// value and the offset of the first unconsumed token.
pub fn evaluate(tokens: &[Token], pos: usize, host: &mut dyn EvalHost) -> Result<(Value, usize)> {
    let mut e = Evaluator { tokens, pos, host };
    let value = e.or_expr()?;
    Ok((value, e.pos))
}

struct Evaluator<'a> {
    tokens: &'a [Token],
    pos: usize,
    host: &'a mut dyn EvalHost,
}

enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::EndOfLine)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Token, label: &str) -> Result<()> {
        if self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(BasicError::Syntax(Some(format!("EXPECTED {}", label))))
        }
    }

    fn or_expr(&mut self) -> Result<Value> {
        let mut left = self.and_expr()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let right = self.and_expr()?;
            let result = left.truthy()? || right.truthy()?;
            left = Value::Number(if result { 1.0 } else { 0.0 });
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value> {
        let mut left = self.not_expr()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let right = self.not_expr()?;
            let result = left.truthy()? && right.truthy()?;
            left = Value::Number(if result { 1.0 } else { 0.0 });
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Value> {
        if matches!(self.peek(), Token::Not) {
            self.advance();
            let inner = self.not_expr()?;
            Ok(Value::Number(if inner.truthy()? { 0.0 } else { 1.0 }))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Value> {
        let mut left = self.add_expr()?;
        loop {
            let op = match self.peek() {
                Token::Equal => CmpOp::Eq,
                Token::NotEqual => CmpOp::Ne,
                Token::Less => CmpOp::Lt,
                Token::Greater => CmpOp::Gt,
                Token::LessEqual => CmpOp::Le,
                Token::GreaterEqual => CmpOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.add_expr()?;
            left = Value::Number(compare(&left, &op, &right)?);
        }
        Ok(left)
    }

    fn add_expr(&mut self) -> Result<Value> {
        let mut left = self.mul_expr()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    let right = self.mul_expr()?;
                    left = add(left, right)?;
                }
                Token::Minus => {
                    self.advance();
                    let right = self.mul_expr()?;
                    left = Value::Number(left.as_number()? - right.as_number()?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn mul_expr(&mut self) -> Result<Value> {
        let mut left = self.unary_expr()?;
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    let right = self.unary_expr()?;
                    left = Value::Number(left.as_number()? * right.as_number()?);
                }
                Token::Slash => {
                    self.advance();
                    let right = self.unary_expr()?;
                    let divisor = right.as_number()?;
                    if divisor == 0.0 {
                        return Err(BasicError::DivisionByZero);
                    }
                    left = Value::Number(left.as_number()? / divisor);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Value> {
        match self.peek() {
            Token::Plus => {
                self.advance();
                Ok(Value::Number(self.unary_expr()?.as_number()?))
            }
            Token::Minus => {
                self.advance();
                Ok(Value::Number(-self.unary_expr()?.as_number()?))
            }
            _ => self.pow_expr(),
        }
    }

    /// `^` is right-associative: the right operand is reparsed at the
    /// unary level so `2^-3` and `2^3^2` (= `2^(3^2)`) both work.
    fn pow_expr(&mut self) -> Result<Value> {
        let left = self.atom()?;
        if matches!(self.peek(), Token::Caret) {
            self.advance();
            let right = self.unary_expr()?;
            Ok(Value::Number(left.as_number()?.powf(right.as_number()?)))
        } else {
            Ok(left)
        }
    }

    fn atom(&mut self) -> Result<Value> {
        match self.advance() {
            Token::Number(n) => Ok(Value::Number(n)),
            Token::Str(s) => Ok(Value::Str(s)),
            Token::LParen => {
                let v = self.or_expr()?;
                self.expect(&Token::RParen, ")")?;
                Ok(v)
            }

            Token::Abs => self.unary_numeric(f64::abs),
            Token::Int => self.unary_numeric(f64::floor),
            Token::Sqr => self.unary_numeric(f64::sqrt),
            Token::Sgn => self.unary_numeric(|x| {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }),
            Token::Sin => self.unary_numeric(f64::sin),
            Token::Cos => self.unary_numeric(f64::cos),
            Token::Tan => self.unary_numeric(f64::tan),
            Token::Atn => self.unary_numeric(f64::atan),
            Token::Log => self.unary_numeric(f64::ln),
            Token::Exp => self.unary_numeric(f64::exp),

            Token::Rnd => {
                let arg = self.paren_expr()?.as_number()?;
                Ok(Value::Number(self.host.random(arg)))
            }
            Token::Peek => {
                let addr = self.paren_expr()?.as_number()? as i64;
                Ok(Value::Number(self.host.peek(addr)? as f64))
            }
            Token::Pos => {
                self.paren_expr()?;
                Ok(Value::Number(self.host.cursor_column() as f64))
            }

            Token::Len => {
                let s = self.paren_expr()?;
                Ok(Value::Number(s.as_str()?.chars().count() as f64))
            }
            Token::Val => {
                let s = self.paren_expr()?;
                Ok(Value::Number(parse_val(s.as_str()?)))
            }
            Token::StrDollar => {
                let n = self.paren_expr()?.as_number()?;
                let full = format_number(n);
                Ok(Value::Str(full.strip_prefix(' ').unwrap_or(&full).to_string()))
            }
            Token::ChrDollar => {
                let n = self.paren_expr()?.as_number()?;
                let byte = n as i64 as u8 as char;
                Ok(Value::Str(byte.to_string()))
            }
            Token::Asc => {
                let s = self.paren_expr()?;
                let s = s.as_str()?;
                let ch = s.chars().next().ok_or(BasicError::IllegalQuantity)?;
                Ok(Value::Number(ch as u32 as f64))
            }
            Token::LeftDollar => {
                let (s, n) = self.two_arg_string_int()?;
                let n = n.max(0) as usize;
                Ok(Value::Str(s.chars().take(n).collect()))
            }
            Token::RightDollar => {
                let (s, n) = self.two_arg_string_int()?;
                let n = n.max(0) as usize;
                let chars: Vec<char> = s.chars().collect();
                let start = chars.len().saturating_sub(n);
                Ok(Value::Str(chars[start..].iter().collect()))
            }
            Token::MidDollar => self.mid_dollar(),
            Token::Tab => {
                let n = self.paren_expr()?.as_number()? as i64;
                let current = self.host.cursor_column();
                let pad = (n - current).max(0) as usize;
                Ok(Value::Str(" ".repeat(pad)))
            }
            Token::Spc => {
                let n = self.paren_expr()?.as_number()? as i64;
                Ok(Value::Str(" ".repeat(n.max(0) as usize)))
            }

            Token::Fn => {
                let name = match self.advance() {
                    Token::Identifier(name) => name,
                    _ => return Err(BasicError::Syntax(Some("EXPECTED FUNCTION NAME".to_string()))),
                };
                let arg = self.paren_expr()?;
                self.host.call_user_function(&name, arg)
            }

            Token::Identifier(name) => {
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let indices = self.index_list()?;
                    self.host.get_array_value(&name, &indices)
                } else {
                    Ok(self.host.get_variable(&name))
                }
            }

            _ => Err(BasicError::Syntax(Some("UNEXPECTED TOKEN".to_string()))),
        }
    }

    fn unary_numeric(&mut self, f: impl Fn(f64) -> f64) -> Result<Value> {
        let arg = self.paren_expr()?.as_number()?;
        Ok(Value::Number(f(arg)))
    }

    fn paren_expr(&mut self) -> Result<Value> {
        self.expect(&Token::LParen, "(")?;
        let v = self.or_expr()?;
        self.expect(&Token::RParen, ")")?;
        Ok(v)
    }

    fn two_arg_string_int(&mut self) -> Result<(String, i64)> {
        self.expect(&Token::LParen, "(")?;
        let s = self.or_expr()?.as_str()?.to_string();
        self.expect(&Token::Comma, ",")?;
        let n = self.or_expr()?.as_number()? as i64;
        self.expect(&Token::RParen, ")")?;
        Ok((s, n))
    }

    fn mid_dollar(&mut self) -> Result<Value> {
        self.expect(&Token::LParen, "(")?;
        let s = self.or_expr()?.as_str()?.to_string();
        self.expect(&Token::Comma, ",")?;
        let start = self.or_expr()?.as_number()? as i64;
        let chars: Vec<char> = s.chars().collect();
        let start_idx = (start - 1).clamp(0, chars.len() as i64) as usize;

        let len = if matches!(self.peek(), Token::Comma) {
            self.advance();
            let requested = self.or_expr()?.as_number()? as i64;
            requested.max(0) as usize
        } else {
            chars.len() - start_idx
        };
        self.expect(&Token::RParen, ")")?;

        let end_idx = (start_idx + len).min(chars.len());
        Ok(Value::Str(chars[start_idx..end_idx].iter().collect()))
    }

    fn index_list(&mut self) -> Result<Vec<i64>> {
        let mut indices = Vec::new();
        loop {
            let v = self.or_expr()?.as_number()? as i64;
            indices.push(v);
            if matches!(self.peek(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RParen, ")")?;
        Ok(indices)
    }
}

fn compare(left: &Value, op: &CmpOp, right: &Value) -> Result<f64> {
    let result = match (left, right) {
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Gt => a > b,
            CmpOp::Le => a <= b,
            CmpOp::Ge => a >= b,
        },
        _ => {
            let a = left.as_number()?;
            let b = right.as_number()?;
            match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Gt => a > b,
                CmpOp::Le => a <= b,
                CmpOp::Ge => a >= b,
            }
        }
    };
    Ok(if result { 1.0 } else { 0.0 })
}

/// `+`: numeric addition unless either side is a string, in which case
/// the result concatenates, formatting any numeric side with `PRINT`
/// rules first.
fn add(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Value::Str(a), Value::Number(b)) => Ok(Value::Str(a + &format_number(b))),
        (Value::Number(a), Value::Str(b)) => Ok(Value::Str(format_number(a) + &b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use std::collections::HashMap;

    struct MockHost {
        vars: HashMap<String, Value>,
        column: i64,
    }

    impl EvalHost for MockHost {
        fn get_variable(&mut self, name: &str) -> Value {
            self.vars
                .get(name)
                .cloned()
                .unwrap_or_else(|| Value::default_for_name(name))
        }
        fn get_array_value(&mut self, _name: &str, _indices: &[i64]) -> Result<Value> {
            Ok(Value::Number(0.0))
        }
        fn random(&mut self, _arg: f64) -> f64 {
            0.5
        }
        fn peek(&mut self, _addr: i64) -> Result<i64> {
            Ok(0)
        }
        fn cursor_column(&mut self) -> i64 {
            self.column
        }
        fn call_user_function(&mut self, name: &str, _arg: Value) -> Result<Value> {
            Err(BasicError::UndefinedFunction(name.to_string()))
        }
    }

    fn eval_str(src: &str) -> Value {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let mut host = MockHost {
            vars: HashMap::new(),
            column: 1,
        };
        evaluate(&tokens, 0, &mut host).unwrap().0
    }

    #[test]
    fn precedence_matches_classic_arithmetic() {
        assert_eq!(eval_str("1+2*3"), Value::Number(7.0));
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(eval_str("2^3^2"), Value::Number(512.0));
    }

    #[test]
    fn division_by_zero_errors() {
        let tokens = Lexer::new("1/0").tokenize().unwrap();
        let mut host = MockHost {
            vars: HashMap::new(),
            column: 1,
        };
        assert_eq!(
            evaluate(&tokens, 0, &mut host).unwrap_err(),
            BasicError::DivisionByZero
        );
    }

    #[test]
    fn string_comparison_is_ordinal() {
        assert_eq!(eval_str("\"APPLE\"<\"BANANA\""), Value::Number(1.0));
    }

    #[test]
    fn numeric_comparison_uses_ieee_equality() {
        assert_eq!(eval_str("3=3"), Value::Number(1.0));
        assert_eq!(eval_str("3<>3"), Value::Number(0.0));
    }

    #[test]
    fn concatenation_formats_numeric_side() {
        assert_eq!(eval_str("\"X=\"+7"), Value::Str("X= 7 ".to_string()));
    }

    #[test]
    fn left_and_right_dollar() {
        assert_eq!(eval_str("LEFT$(\"HELLO\",3)"), Value::Str("HEL".to_string()));
        assert_eq!(eval_str("RIGHT$(\"HELLO\",3)"), Value::Str("LLO".to_string()));
    }

    #[test]
    fn mid_dollar_defaults_to_rest_of_string() {
        assert_eq!(eval_str("MID$(\"HELLO\",2)"), Value::Str("ELLO".to_string()));
        assert_eq!(eval_str("MID$(\"HELLO\",2,2)"), Value::Str("EL".to_string()));
    }

    #[test]
    fn asc_of_empty_string_is_illegal_quantity() {
        let tokens = Lexer::new("ASC(\"\")").tokenize().unwrap();
        let mut host = MockHost {
            vars: HashMap::new(),
            column: 1,
        };
        assert_eq!(
            evaluate(&tokens, 0, &mut host).unwrap_err(),
            BasicError::IllegalQuantity
        );
    }

    #[test]
    fn not_and_or_reduce_to_zero_or_one() {
        assert_eq!(eval_str("NOT 0"), Value::Number(1.0));
        assert_eq!(eval_str("1 AND 0"), Value::Number(0.0));
        assert_eq!(eval_str("1 OR 0"), Value::Number(1.0));
    }
}
