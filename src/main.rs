//! Applesoft BASIC — an interactive REPL for the classic Apple ][ dialect.
//!
//! ## Architecture Overview
//!
//! - **lexer**: Tokenizes one line of source into a `Token` sequence.
//! - **evaluator**: Recursive-descent expression grammar over a token
//!   slice, parameterized over an `EvalHost` capability trait.
//! - **interpreter**: Owns all runtime state (program store, variables,
//!   arrays, FOR/GOSUB stacks, DATA pool, memory) and dispatches
//!   statements line by line.
//! - **value**: The `Number`/`Str` runtime value and Applesoft's
//!   particular numeric formatting rules.
//! - **io**: `Screen`/`LineReader` capability traits so the interpreter
//!   never talks to stdout/stdin directly.
//! - **error**: The `BasicError`/`StopEvent`/`RunOutcome` error model
//!   shared by the lexer, evaluator and interpreter.
//!
//! Lines typed at the `]` prompt that begin with digits are stored into
//! the program; anything else runs immediately.

mod error;
mod evaluator;
mod interpreter;
mod io;
mod lexer;
mod value;

use interpreter::Interpreter;
use io::{RustylineReader, TerminalScreen};
use std::process;

fn main() {
    let input = match RustylineReader::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("?ERROR: {}", e);
            process::exit(1);
        }
    };
    let prompt_reader = match RustylineReader::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("?ERROR: {}", e);
            process::exit(1);
        }
    };
    let mut interp = Interpreter::new(TerminalScreen::new(), input);

    println!("APPLESOFT BASIC");
    println!();

    run_repl(&mut interp, prompt_reader);
}

fn run_repl(interp: &mut Interpreter<TerminalScreen, RustylineReader>, mut prompt_reader: RustylineReader) {
    loop {
        print!("]");
        let _ = std::io::Write::flush(&mut std::io::stdout());
        match prompt_reader.read_line() {
            None => break,
            Some(line) => {
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    continue;
                }
                let upper = trimmed.trim();
                if upper.eq_ignore_ascii_case("quit") || upper.eq_ignore_ascii_case("exit") {
                    break;
                }
                if starts_with_digit(trimmed) {
                    interp.parse_and_store(trimmed);
                } else {
                    interp.execute_direct(trimmed);
                }
            }
        }
    }
}

fn starts_with_digit(line: &str) -> bool {
    line.trim_start().chars().next().is_some_and(|c| c.is_ascii_digit())
}
