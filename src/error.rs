//! Error Handling for the Applesoft BASIC runtime
//!
//! This module defines the error system shared by the lexer, the expression
//! evaluator and the interpreter. Errors are split into two families, as
//! Applesoft programs distinguish between the two at the REPL:
//!
//! - `BasicError` — domain errors. These are the classic `?...ERROR` forms
//!   (syntax, division by zero, undefined line, out of data, ...). They
//!   abort the current RUN or immediate-mode statement.
//! - `StopEvent` — not an error at all, but a request to halt cleanly
//!   (the `STOP` statement, or falling off the end of the program). It
//!   carries the line number so the caller can print `BREAK IN <line>`.
//!
//! Both are caught in exactly one place: the interpreter's RUN loop (and,
//! for immediate-mode statements, `ExecuteDirect`). Nothing below that
//! boundary is expected to catch them.

use std::error::Error;
use std::fmt;

/// Domain errors raised by the lexer, evaluator or interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum BasicError {
    /// Lexical or grammatical syntax error, with optional detail.
    ///
    /// Carries `None` for the bare `?SYNTAX ERROR` form and `Some(detail)`
    /// for `?SYNTAX ERROR: <detail>`, where the caller has already composed
    /// `detail` (e.g. `"EXPECTED )"`, `"UNEXPECTED CHARACTER"`).
    Syntax(Option<String>),

    /// Division by zero inside the evaluator.
    DivisionByZero,

    /// Illegal quantity passed to a built-in (e.g. `ASC("")`).
    IllegalQuantity,

    /// `GOTO`/`GOSUB`/`RUN` target line number that doesn't exist.
    UndefinedStatement,

    /// `FN` call to a name that was never `DEF FN`'d.
    UndefinedFunction(String),

    /// `RETURN` with an empty GOSUB stack.
    ReturnWithoutGosub,

    /// `NEXT` naming a variable with no matching `FOR` frame.
    NextWithoutFor,

    /// `READ` past the end of the DATA pool.
    OutOfData,

    /// `READ` of a non-numeric DATA item into a numeric variable.
    TypeMismatch,

    /// Array index out of declared bounds, or axis-count mismatch.
    BadSubscript,

    /// `LOAD` of a file that doesn't exist.
    FileNotFound,

    /// Anything else (host I/O failures, etc.), surfaced as `?ERROR: <detail>`.
    Other(String),
}

impl fmt::Display for BasicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BasicError::Syntax(None) => write!(f, "?SYNTAX ERROR"),
            BasicError::Syntax(Some(detail)) => write!(f, "?SYNTAX ERROR: {}", detail),
            BasicError::DivisionByZero => write!(f, "?DIVISION BY ZERO ERROR"),
            BasicError::IllegalQuantity => write!(f, "?ILLEGAL QUANTITY ERROR"),
            BasicError::UndefinedStatement => write!(f, "?UNDEF'D STATEMENT ERROR"),
            BasicError::UndefinedFunction(name) => {
                write!(f, "?UNDEF'D FUNCTION ERROR: FN{}", name)
            }
            BasicError::ReturnWithoutGosub => write!(f, "?RETURN WITHOUT GOSUB ERROR"),
            BasicError::NextWithoutFor => write!(f, "?NEXT WITHOUT FOR ERROR"),
            BasicError::OutOfData => write!(f, "?OUT OF DATA ERROR"),
            BasicError::TypeMismatch => write!(f, "?TYPE MISMATCH ERROR"),
            BasicError::BadSubscript => write!(f, "?BAD SUBSCRIPT ERROR"),
            BasicError::FileNotFound => write!(f, "?FILE NOT FOUND"),
            BasicError::Other(detail) => write!(f, "?ERROR: {}", detail),
        }
    }
}

impl Error for BasicError {}

impl From<std::io::Error> for BasicError {
    fn from(err: std::io::Error) -> Self {
        BasicError::Other(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BasicError>;

/// Raised by `STOP` and by falling off the end of a program. Not a domain
/// error: it halts the RUN loop cleanly and reports `BREAK IN <line>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopEvent {
    pub line: i64,
}

impl fmt::Display for StopEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BREAK IN {}", self.line)
    }
}

/// Everything that can end a single `RUN`: a domain error or an explicit
/// `STOP`/end-of-program.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Error(BasicError),
    Stopped(StopEvent),
}

impl From<BasicError> for RunOutcome {
    fn from(err: BasicError) -> Self {
        RunOutcome::Error(err)
    }
}

impl From<StopEvent> for RunOutcome {
    fn from(stop: StopEvent) -> Self {
        RunOutcome::Stopped(stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_display_matches_literal() {
        assert_eq!(BasicError::Syntax(None).to_string(), "?SYNTAX ERROR");
        assert_eq!(
            BasicError::Syntax(Some("EXPECTED )".to_string())).to_string(),
            "?SYNTAX ERROR: EXPECTED )"
        );
    }

    #[test]
    fn undefined_function_includes_name() {
        assert_eq!(
            BasicError::UndefinedFunction("SQ".to_string()).to_string(),
            "?UNDEF'D FUNCTION ERROR: FNSQ"
        );
    }

    #[test]
    fn stop_event_display() {
        assert_eq!(StopEvent { line: 100 }.to_string(), "BREAK IN 100");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let basic_err: BasicError = io_err.into();
        assert!(matches!(basic_err, BasicError::Other(_)));
    }
}
