//! Lexical analyzer for Applesoft BASIC
//!
//! This module implements the tokenization phase of the BASIC runtime. It
//! converts one raw source line into a stream of tokens that the expression
//! evaluator and the interpreter's statement dispatcher consume directly —
//! there is no separate parse-tree stage between lexing and execution.
//!
//! ## Tokenization process
//!
//! 1. **Character processing**: scans the line character by character.
//! 2. **Token recognition**: numbers, strings, identifiers, keywords,
//!    built-in function names, operators and punctuation.
//! 3. **Keyword folding**: identifiers are matched case-insensitively
//!    against the keyword table, including the `?` alias for `PRINT` and
//!    dollar-suffixed names like `STR$`.
//! 4. **REM handling**: a recognized `REM` keyword swallows the remainder
//!    of the line verbatim into its token.
//!
//! Lexing never touches interpreter state and never spans more than one
//! line; a missing closing quote simply ends the string at end of line
//! rather than erroring.

use crate::error::{BasicError, Result};

/// Every token the lexer can produce. Carries literal payloads for
/// `Number`, `Str`, `Identifier` and `Rem`; every keyword, built-in
/// function and punctuation mark is its own unit variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === LITERALS ===
    /// Numeric literal, already parsed to a double.
    Number(f64),
    /// String literal with the surrounding quotes stripped.
    Str(String),
    /// Variable or array name, normalized to upper case, sigil included.
    Identifier(String),
    /// `REM` followed by the rest of the line, stored verbatim.
    Rem(String),

    // === STATEMENT KEYWORDS ===
    Print,
    Let,
    Goto,
    Gosub,
    Return,
    For,
    To,
    Step,
    Next,
    If,
    Then,
    Dim,
    Data,
    Read,
    Restore,
    Def,
    Fn,
    On,
    End,
    Stop,
    Input,
    Home,
    Htab,
    Vtab,
    Poke,
    Call,
    Run,
    List,
    New,
    Save,
    Load,
    Del,
    Get,

    // === LOGICAL OPERATORS ===
    And,
    Or,
    Not,

    // === BUILT-IN FUNCTIONS ===
    Abs,
    Int,
    Sqr,
    Sgn,
    Sin,
    Cos,
    Tan,
    Atn,
    Log,
    Exp,
    Rnd,
    Peek,
    Pos,
    Len,
    Val,
    StrDollar,
    ChrDollar,
    Asc,
    LeftDollar,
    RightDollar,
    MidDollar,
    Tab,
    Spc,

    // === OPERATORS ===
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // === PUNCTUATION ===
    LParen,
    RParen,
    Comma,
    Semicolon,
    Colon,

    // === SPECIALS ===
    /// A bare `$` that never completed an identifier.
    Dollar,
    /// Terminates every token sequence the lexer produces.
    EndOfLine,
}

/// Scans one source line into a `Token` sequence.
///
/// The lexer owns no state beyond its position in the current line: every
/// call to [`Lexer::tokenize`] is independent of any previous call.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(line: &str) -> Self {
        Self {
            input: line.chars().collect(),
            position: 0,
        }
    }

    /// Tokenizes the whole line, always ending with `Token::EndOfLine`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::EndOfLine;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        if self.is_at_end() {
            return Ok(Token::EndOfLine);
        }

        let c = self.advance();

        match c {
            '(' => Ok(Token::LParen),
            ')' => Ok(Token::RParen),
            ',' => Ok(Token::Comma),
            ';' => Ok(Token::Semicolon),
            ':' => Ok(Token::Colon),
            '+' => Ok(Token::Plus),
            '-' => Ok(Token::Minus),
            '*' => Ok(Token::Star),
            '/' => Ok(Token::Slash),
            '^' => Ok(Token::Caret),
            '?' => Ok(Token::Print),
            '=' => Ok(Token::Equal),
            '<' => {
                if self.peek() == '=' {
                    self.advance();
                    Ok(Token::LessEqual)
                } else if self.peek() == '>' {
                    self.advance();
                    Ok(Token::NotEqual)
                } else {
                    Ok(Token::Less)
                }
            }
            '>' => {
                if self.peek() == '=' {
                    self.advance();
                    Ok(Token::GreaterEqual)
                } else {
                    Ok(Token::Greater)
                }
            }
            '"' => self.string_literal(),
            '$' => Ok(Token::Dollar),
            c if c.is_ascii_digit() || c == '.' => self.number_literal(c),
            c if c.is_ascii_alphabetic() => self.identifier_or_keyword(c),
            _ => Err(BasicError::Syntax(Some("UNEXPECTED CHARACTER".to_string()))),
        }
    }

    /// Scans a number literal: optional leading `.`, a digit run, an
    /// optional `.` plus digits, and an optional exponent.
    fn number_literal(&mut self, first: char) -> Result<Token> {
        let mut text = String::from(first);

        if first != '.' {
            while self.peek().is_ascii_digit() {
                text.push(self.advance());
            }
            if self.peek() == '.' {
                text.push(self.advance());
                while self.peek().is_ascii_digit() {
                    text.push(self.advance());
                }
            }
        } else {
            while self.peek().is_ascii_digit() {
                text.push(self.advance());
            }
        }

        if self.peek() == 'e' || self.peek() == 'E' {
            let mut lookahead = self.position + 1;
            if lookahead < self.input.len()
                && (self.input[lookahead] == '+' || self.input[lookahead] == '-')
            {
                lookahead += 1;
            }
            if lookahead < self.input.len() && self.input[lookahead].is_ascii_digit() {
                text.push(self.advance());
                if self.peek() == '+' || self.peek() == '-' {
                    text.push(self.advance());
                }
                while self.peek().is_ascii_digit() {
                    text.push(self.advance());
                }
            }
        }

        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| BasicError::Syntax(Some("MALFORMED NUMBER".to_string())))
    }

    /// Scans a string literal. A missing closing quote simply ends the
    /// string at end of line rather than failing.
    fn string_literal(&mut self) -> Result<Token> {
        let mut text = String::new();
        while !self.is_at_end() && self.peek() != '"' {
            text.push(self.advance());
        }
        if self.peek() == '"' {
            self.advance();
        }
        Ok(Token::Str(text))
    }

    /// Scans an identifier or keyword: a letter, then letters and digits,
    /// then an optional single trailing `$` that always terminates the
    /// scan. `REM` additionally swallows the rest of the line.
    fn identifier_or_keyword(&mut self, first: char) -> Result<Token> {
        let mut text = String::from(first);
        while self.peek().is_ascii_alphanumeric() {
            text.push(self.advance());
        }
        if self.peek() == '$' {
            text.push(self.advance());
        }

        let upper = text.to_ascii_uppercase();
        if upper == "REM" {
            let rest: String = self.input[self.position..].iter().collect();
            self.position = self.input.len();
            return Ok(Token::Rem(rest));
        }

        Ok(match upper.as_str() {
            "PRINT" => Token::Print,
            "LET" => Token::Let,
            "GOTO" => Token::Goto,
            "GOSUB" => Token::Gosub,
            "RETURN" => Token::Return,
            "FOR" => Token::For,
            "TO" => Token::To,
            "STEP" => Token::Step,
            "NEXT" => Token::Next,
            "IF" => Token::If,
            "THEN" => Token::Then,
            "DIM" => Token::Dim,
            "DATA" => Token::Data,
            "READ" => Token::Read,
            "RESTORE" => Token::Restore,
            "DEF" => Token::Def,
            "FN" => Token::Fn,
            "ON" => Token::On,
            "END" => Token::End,
            "STOP" => Token::Stop,
            "INPUT" => Token::Input,
            "HOME" => Token::Home,
            "HTAB" => Token::Htab,
            "VTAB" => Token::Vtab,
            "POKE" => Token::Poke,
            "CALL" => Token::Call,
            "RUN" => Token::Run,
            "LIST" => Token::List,
            "NEW" => Token::New,
            "SAVE" => Token::Save,
            "LOAD" => Token::Load,
            "DEL" => Token::Del,
            "GET" => Token::Get,
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "ABS" => Token::Abs,
            "INT" => Token::Int,
            "SQR" => Token::Sqr,
            "SGN" => Token::Sgn,
            "SIN" => Token::Sin,
            "COS" => Token::Cos,
            "TAN" => Token::Tan,
            "ATN" => Token::Atn,
            "LOG" => Token::Log,
            "EXP" => Token::Exp,
            "RND" => Token::Rnd,
            "PEEK" => Token::Peek,
            "POS" => Token::Pos,
            "LEN" => Token::Len,
            "VAL" => Token::Val,
            "STR$" => Token::StrDollar,
            "CHR$" => Token::ChrDollar,
            "ASC" => Token::Asc,
            "LEFT$" => Token::LeftDollar,
            "RIGHT$" => Token::RightDollar,
            "MID$" => Token::MidDollar,
            "TAB" => Token::Tab,
            "SPC" => Token::Spc,
            _ => Token::Identifier(upper),
        })
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek() == ' ' {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn advance(&mut self) -> char {
        let c = self.input[self.position];
        self.position += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.input[self.position]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(s: &str) -> Vec<Token> {
        Lexer::new(s).tokenize().unwrap()
    }

    #[test]
    fn arithmetic_line() {
        assert_eq!(
            lex("PRINT 1+2*3"),
            vec![
                Token::Print,
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.0),
                Token::Star,
                Token::Number(3.0),
                Token::EndOfLine,
            ]
        );
    }

    #[test]
    fn question_mark_is_print_alias() {
        assert_eq!(lex("?1")[0], Token::Print);
    }

    #[test]
    fn string_literal_unterminated_ends_at_eol() {
        assert_eq!(
            lex("PRINT \"HELLO"),
            vec![Token::Print, Token::Str("HELLO".to_string()), Token::EndOfLine]
        );
    }

    #[test]
    fn dollar_suffixed_identifier_and_builtin() {
        assert_eq!(
            lex("A$=LEFT$(B$,3)"),
            vec![
                Token::Identifier("A$".to_string()),
                Token::Equal,
                Token::LeftDollar,
                Token::LParen,
                Token::Identifier("B$".to_string()),
                Token::Comma,
                Token::Number(3.0),
                Token::RParen,
                Token::EndOfLine,
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(lex("print")[0], Token::Print);
        assert_eq!(lex("Print")[0], Token::Print);
    }

    #[test]
    fn rem_consumes_rest_of_line() {
        assert_eq!(
            lex("REM this: is, all one token"),
            vec![
                Token::Rem(" this: is, all one token".to_string()),
                Token::EndOfLine
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(lex("<=")[0], Token::LessEqual);
        assert_eq!(lex("<>")[0], Token::NotEqual);
        assert_eq!(lex(">=")[0], Token::GreaterEqual);
        assert_eq!(lex("<")[0], Token::Less);
        assert_eq!(lex(">")[0], Token::Greater);
    }

    #[test]
    fn leading_dot_number() {
        assert_eq!(lex(".5")[0], Token::Number(0.5));
    }

    #[test]
    fn exponent_number() {
        assert_eq!(lex("1.5E-3")[0], Token::Number(1.5e-3));
    }

    #[test]
    fn unrecognized_character_is_syntax_error() {
        let err = Lexer::new("@").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "?SYNTAX ERROR: UNEXPECTED CHARACTER");
    }
}
