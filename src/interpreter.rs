//! The statement interpreter: program store, runtime state, and line
//! dispatch.
//!
//! This owns every piece of mutable state the expression evaluator is not
//! allowed to touch directly: the program store, variable and array
//! tables, the FOR and GOSUB stacks, the DATA pool, the user-function
//! table, the 64 KiB memory vector, and the RNG. It implements
//! [`EvalHost`] so the evaluator can read variables, read array
//! elements, roll `RND`, `PEEK` memory, ask for the cursor column, and
//! invoke user functions without holding a reference back to this type.
//!
//! Line dispatch works this way: before a line's statements run,
//! `program_index` is pre-advanced to the next line. A statement that
//! jumps (`GOTO`/`GOSUB`/`RETURN`/`ON`/a `FOR` re-entry from `NEXT`)
//! never executes its target inline — it resolves the target to an
//! index into `self.order`, points `program_index` at it (and, for a
//! same-line `FOR`/`NEXT` re-entry, records the token offset to resume
//! at in `resume_token`), and returns [`StmtResult::Jump`]. The actual
//! dispatch of that target line happens one level up, in whichever plain
//! loop is driving execution ([`Interpreter::run_inner`] for `RUN`,
//! [`Interpreter::drive_direct`] for immediate mode) — so a `GOTO`/
//! `GOSUB` chain of any length, including an ordinary backward-branching
//! main loop, advances iteratively rather than recursing one Rust stack
//! frame per BASIC iteration. The anchor `GOSUB` records is still "the
//! line after this one" even when issued mid-line, not "the next
//! statement" — preserved deliberately, not a bug to fix.

use crate::error::{BasicError, Result, RunOutcome, StopEvent};
use crate::evaluator::{self, EvalHost};
use crate::io::{LineReader, Screen};
use crate::lexer::{Lexer, Token};
use crate::value::{parse_val, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};

struct ForFrame {
    var: String,
    limit: f64,
    step: f64,
    /// Index into `self.order` of the line the `FOR` header itself is
    /// on, paired with the token offset just past that header. Together
    /// they let `NEXT` resume a same-line loop body in place instead of
    /// falling to whatever follows the `FOR` line.
    reentry_line: usize,
    reentry_pos: usize,
}

struct ArrayVar {
    dims: Vec<usize>,
    data: Vec<Value>,
}

#[derive(Clone)]
struct UserFunction {
    param: String,
    body: Vec<Token>,
}

/// What a statement handler resolved to: "keep going on this line"
/// (`Continue`); "this line's execution is finished" (`Done`), carrying
/// whether the whole RUN should halt cleanly; or "control transfers
/// elsewhere" (`Jump`), meaning `program_index`/`resume_token` are
/// already set to where it should go next and the caller's driving loop
/// needs to pick it up from there.
enum StmtResult {
    Continue,
    Done(bool),
    Jump,
}

pub struct Interpreter<S: Screen, L: LineReader> {
    program: BTreeMap<i64, String>,
    order: Vec<i64>,
    program_index: usize,
    current_line: i64,
    tokens: Vec<Token>,
    token_pos: usize,
    /// Token offset the *next* `execute_at_index` call should resume at,
    /// instead of starting the line fresh at 0. Set by a same-line
    /// `FOR`/`NEXT` re-entry, consumed (and cleared) the moment that
    /// line is next dispatched.
    resume_token: Option<usize>,
    /// Whether the statement that just finished this line transferred
    /// control elsewhere (`StmtResult::Jump`) rather than falling off
    /// the end of the line or halting. `execute_direct` uses this to
    /// decide whether to keep following a chain of jumps.
    jumped: bool,

    variables: HashMap<String, Value>,
    arrays: HashMap<String, ArrayVar>,
    for_stack: Vec<ForFrame>,
    gosub_stack: Vec<usize>,
    data_pool: Vec<String>,
    data_pointer: usize,
    user_functions: HashMap<String, UserFunction>,
    memory: Vec<u8>,
    rng: StdRng,

    screen: S,
    input: L,
}

impl<S: Screen, L: LineReader> Interpreter<S, L> {
    pub fn new(screen: S, input: L) -> Self {
        Self {
            program: BTreeMap::new(),
            order: Vec::new(),
            program_index: 0,
            current_line: 0,
            tokens: Vec::new(),
            token_pos: 0,
            resume_token: None,
            jumped: false,
            variables: HashMap::new(),
            arrays: HashMap::new(),
            for_stack: Vec::new(),
            gosub_stack: Vec::new(),
            data_pool: Vec::new(),
            data_pointer: 0,
            user_functions: HashMap::new(),
            memory: vec![0u8; 65536],
            rng: StdRng::from_entropy(),
            screen,
            input,
        }
    }

    // === Program entry ===

    pub fn store_line(&mut self, n: i64, text: &str) {
        if text.trim().is_empty() {
            self.program.remove(&n);
        } else {
            self.program.insert(n, text.to_string());
        }
    }

    /// Accepts a raw line: if it begins with digits, those form the line
    /// number and the remainder is stored as that line's text (an empty
    /// remainder deletes the line). Lines not led by a digit are
    /// silently ignored — callers route those to
    /// [`Interpreter::execute_direct`] instead.
    pub fn parse_and_store(&mut self, raw: &str) {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let digits_end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
        if digits_end == 0 {
            return;
        }
        if let Ok(n) = raw[..digits_end].parse::<i64>() {
            self.store_line(n, raw[digits_end..].trim_start());
        }
    }

    pub fn list(&self) -> Vec<(i64, String)> {
        self.program.iter().map(|(n, t)| (*n, t.clone())).collect()
    }

    pub fn new_program(&mut self) {
        self.program.clear();
        self.clear_runtime_state();
        self.user_functions.clear();
    }

    fn clear_runtime_state(&mut self) {
        self.variables.clear();
        self.arrays.clear();
        self.for_stack.clear();
        self.gosub_stack.clear();
        self.data_pool.clear();
        self.data_pointer = 0;
    }

    // === RUN ===

    pub fn run(&mut self, start: Option<i64>) {
        self.clear_runtime_state();
        self.rebuild_data_pool();
        match self.run_inner(start) {
            Ok(()) => {}
            Err(RunOutcome::Stopped(ev)) => self.report(&ev.to_string()),
            Err(RunOutcome::Error(e)) => self.report(&format!("{} IN {}", e, self.current_line)),
        }
    }

    fn report(&mut self, message: &str) {
        self.screen.write_newline();
        self.screen.write_str(message);
        self.screen.write_newline();
    }

    fn run_inner(&mut self, start: Option<i64>) -> std::result::Result<(), RunOutcome> {
        self.order = self.program.keys().copied().collect();
        let mut idx = match start {
            None => 0,
            Some(n) => self
                .order
                .iter()
                .position(|&ln| ln >= n)
                .ok_or(BasicError::UndefinedStatement)?,
        };
        loop {
            if idx >= self.order.len() {
                return Ok(());
            }
            let halted = self.execute_at_index(idx)?;
            if halted {
                return Ok(());
            }
            idx = self.program_index;
        }
    }

    /// Harvests the DATA pool by scanning every stored line's raw text
    /// for a statement-leading `DATA` keyword (outside quotes) and
    /// splitting what follows on commas, stripping quotes, trimming each
    /// item.
    fn rebuild_data_pool(&mut self) {
        self.data_pool.clear();
        self.data_pointer = 0;
        let lines: Vec<String> = self.program.values().cloned().collect();
        for line in lines {
            harvest_data_items(&line, &mut self.data_pool);
        }
    }

    /// Executes the line at `idx` in `self.order`. A jump triggered by
    /// one of its statements does not recurse into the target line: it
    /// resolves the target and returns, leaving `program_index` (and
    /// maybe `resume_token`) pointing at where to go next. `idx` past
    /// the end of the program is simply the end of the run.
    fn execute_at_index(&mut self, idx: usize) -> std::result::Result<bool, RunOutcome> {
        if idx >= self.order.len() {
            return Ok(false);
        }
        let line_no = self.order[idx];
        self.program_index = idx + 1;
        self.current_line = line_no;
        let text = self.program.get(&line_no).cloned().unwrap_or_default();
        self.tokens = Lexer::new(&text).tokenize().map_err(RunOutcome::Error)?;
        self.token_pos = self.resume_token.take().unwrap_or(0);
        self.execute_statements_on_current_line()
    }

    /// Resolves `target` to its index in `self.order` and points
    /// `program_index` there, clearing any pending mid-line resume
    /// offset. The structural primitive behind `GOTO`, `GOSUB`,
    /// `RETURN`, `ON`, and the `IF...THEN <line>` shorthand — it only
    /// ever records *where* to go next; the caller's driving loop is
    /// what actually gets there, so a backward jump never grows the
    /// Rust call stack.
    fn set_jump_target(&mut self, target: i64) -> Result<()> {
        let idx = self
            .order
            .iter()
            .position(|&ln| ln == target)
            .ok_or(BasicError::UndefinedStatement)?;
        self.program_index = idx;
        self.resume_token = None;
        Ok(())
    }

    /// Executes an immediate-mode line: the same statement pipeline as a
    /// stored line, but errors print without a line suffix. A
    /// `GOTO`/`GOSUB` here still jumps into the stored program and keeps
    /// following whatever chain of further jumps it leads to, but
    /// (unlike `RUN`) stops the moment a line finishes without jumping
    /// again — there is no "rest of immediate mode" to fall through to.
    pub fn execute_direct(&mut self, raw: &str) {
        let tokens = match Lexer::new(raw).tokenize() {
            Ok(tokens) => tokens,
            Err(e) => {
                self.report(&e.to_string());
                return;
            }
        };
        self.order = self.program.keys().copied().collect();
        self.tokens = tokens;
        self.token_pos = 0;
        self.resume_token = None;
        match self.drive_direct() {
            Ok(()) => {}
            Err(RunOutcome::Stopped(ev)) => self.report(&ev.to_string()),
            Err(RunOutcome::Error(e)) => self.report(&e.to_string()),
        }
    }

    /// Runs the already-loaded immediate-mode tokens, then iteratively
    /// follows any chain of jumps into the stored program the same way
    /// `run_inner` does, stopping as soon as a line completes without
    /// jumping again (rather than falling through to "the next line",
    /// which immediate mode has none of).
    fn drive_direct(&mut self) -> std::result::Result<(), RunOutcome> {
        let halted = self.execute_statements_on_current_line()?;
        if halted || !self.jumped {
            return Ok(());
        }
        loop {
            let idx = self.program_index;
            if idx >= self.order.len() {
                return Ok(());
            }
            let halted = self.execute_at_index(idx)?;
            if halted || !self.jumped {
                return Ok(());
            }
        }
    }

    /// Runs statements on the already-loaded line starting at
    /// `self.token_pos`, either to the line's end or until one
    /// transfers control elsewhere. Resets `self.jumped` up front so
    /// each call reports fresh state.
    fn execute_statements_on_current_line(&mut self) -> std::result::Result<bool, RunOutcome> {
        self.jumped = false;
        loop {
            if matches!(self.peek_token(), Token::Colon) {
                self.token_pos += 1;
                continue;
            }
            if matches!(self.peek_token(), Token::EndOfLine) {
                return Ok(false);
            }
            match self.execute_one_statement()? {
                StmtResult::Done(halted) => return Ok(halted),
                StmtResult::Jump => {
                    self.jumped = true;
                    return Ok(false);
                }
                StmtResult::Continue => {}
            }
        }
    }

    fn peek_token(&self) -> Token {
        self.tokens.get(self.token_pos).cloned().unwrap_or(Token::EndOfLine)
    }

    fn next_token(&mut self) -> Token {
        let t = self.peek_token();
        if self.token_pos < self.tokens.len() {
            self.token_pos += 1;
        }
        t
    }

    fn expect_token(&mut self, want: &Token, label: &str) -> Result<()> {
        if &self.peek_token() == want {
            self.token_pos += 1;
            Ok(())
        } else {
            Err(BasicError::Syntax(Some(format!("EXPECTED {}", label))))
        }
    }

    /// Evaluates one expression starting at `pos`, advancing `token_pos`
    /// to the offset the evaluator stopped at. Swaps `self.tokens` out
    /// for the duration of the call so the evaluator can borrow `self`
    /// as its [`EvalHost`] without conflicting with the token slice it
    /// reads from.
    fn eval_at(&mut self, pos: usize) -> Result<Value> {
        let tokens = std::mem::take(&mut self.tokens);
        let result = evaluator::evaluate(&tokens, pos, self);
        self.tokens = tokens;
        let (value, next_pos) = result?;
        self.token_pos = next_pos;
        Ok(value)
    }

    fn expect_identifier(&mut self, label: &str) -> Result<String> {
        match self.next_token() {
            Token::Identifier(name) => Ok(name),
            _ => Err(BasicError::Syntax(Some(format!("EXPECTED {}", label)))),
        }
    }

    fn execute_one_statement(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        match self.next_token() {
            Token::Print => self.exec_print(),
            Token::Input => self.exec_input(),
            Token::Let => {
                let name = self.expect_identifier("VARIABLE")?;
                self.exec_assignment(name)
            }
            Token::Identifier(name) => self.exec_assignment(name),
            Token::If => self.exec_if(),
            Token::Goto => {
                let target = self.eval_at(self.token_pos)?.as_number()? as i64;
                self.set_jump_target(target)?;
                Ok(StmtResult::Jump)
            }
            Token::Gosub => {
                let target = self.eval_at(self.token_pos)?.as_number()? as i64;
                self.gosub_stack.push(self.program_index);
                self.set_jump_target(target)?;
                Ok(StmtResult::Jump)
            }
            Token::Return => {
                let anchor = self.gosub_stack.pop().ok_or(BasicError::ReturnWithoutGosub)?;
                self.program_index = anchor;
                self.resume_token = None;
                Ok(StmtResult::Jump)
            }
            Token::For => self.exec_for(),
            Token::Next => self.exec_next(),
            Token::Dim => self.exec_dim(),
            Token::Data | Token::Rem(_) => {
                self.token_pos = self.tokens.len().saturating_sub(1);
                Ok(StmtResult::Continue)
            }
            Token::Read => self.exec_read(),
            Token::Restore => {
                self.data_pointer = 0;
                Ok(StmtResult::Continue)
            }
            Token::Def => self.exec_def(),
            Token::On => self.exec_on(),
            Token::Home => {
                self.screen.clear();
                Ok(StmtResult::Continue)
            }
            Token::Htab => {
                let col = self.eval_at(self.token_pos)?.as_number()? as i64;
                self.screen.set_column(col);
                Ok(StmtResult::Continue)
            }
            Token::Vtab => {
                let row = self.eval_at(self.token_pos)?.as_number()? as i64;
                self.screen.set_row(row);
                Ok(StmtResult::Continue)
            }
            Token::Poke => {
                let addr = self.eval_at(self.token_pos)?.as_number()? as i64;
                self.expect_token(&Token::Comma, ",")?;
                let value = self.eval_at(self.token_pos)?.as_number()? as i64;
                let idx = addr.rem_euclid(65536) as usize;
                self.memory[idx] = value.rem_euclid(256) as u8;
                Ok(StmtResult::Continue)
            }
            Token::Call => {
                self.eval_at(self.token_pos)?;
                Ok(StmtResult::Continue)
            }
            Token::Run => {
                let start = if let Token::Number(n) = self.peek_token() {
                    self.token_pos += 1;
                    Some(n as i64)
                } else {
                    None
                };
                self.run(start);
                Ok(StmtResult::Done(true))
            }
            Token::List => {
                for (n, text) in self.list() {
                    self.screen.write_str(&format!("{} {}", n, text));
                    self.screen.write_newline();
                }
                Ok(StmtResult::Continue)
            }
            Token::New => {
                self.new_program();
                Ok(StmtResult::Done(true))
            }
            Token::Save => {
                let name = match self.next_token() {
                    Token::Str(s) => s,
                    _ => return Err(BasicError::Syntax(Some("EXPECTED FILENAME".to_string())).into()),
                };
                self.save_to_file(&name)?;
                Ok(StmtResult::Continue)
            }
            Token::Load => {
                let name = match self.next_token() {
                    Token::Str(s) => s,
                    _ => return Err(BasicError::Syntax(Some("EXPECTED FILENAME".to_string())).into()),
                };
                self.load_from_file(&name)?;
                Ok(StmtResult::Done(true))
            }
            Token::Del => self.exec_del(),
            Token::End => Ok(StmtResult::Done(true)),
            Token::Stop => Err(RunOutcome::Stopped(StopEvent { line: self.current_line })),
            Token::Get => Err(BasicError::Syntax(Some("GET IS UNIMPLEMENTED".to_string())).into()),
            _ => Err(BasicError::Syntax(None).into()),
        }
    }

    fn exec_print(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let mut suppress_newline = false;
        loop {
            match self.peek_token() {
                Token::EndOfLine | Token::Colon => break,
                Token::Comma => {
                    self.token_pos += 1;
                    self.print_zone_pad();
                    suppress_newline = true;
                }
                Token::Semicolon => {
                    self.token_pos += 1;
                    suppress_newline = true;
                }
                _ => {
                    let value = self.eval_at(self.token_pos)?;
                    self.screen.write_str(&value.to_print_string());
                    suppress_newline = false;
                }
            }
        }
        if !suppress_newline {
            self.screen.write_newline();
        }
        Ok(StmtResult::Continue)
    }

    fn print_zone_pad(&mut self) {
        let col = self.screen.cursor_column();
        let pad = ((col - 1) / 16 + 1) * 16 + 1 - col;
        self.screen.write_str(&" ".repeat(pad.max(0) as usize));
    }

    fn exec_input(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let mut prompt = String::new();
        if let Token::Str(s) = self.peek_token() {
            self.token_pos += 1;
            prompt = s;
            match self.peek_token() {
                Token::Semicolon => {
                    self.token_pos += 1;
                    prompt.push_str("? ");
                }
                Token::Comma => {
                    self.token_pos += 1;
                }
                _ => {}
            }
        }
        let mut names = Vec::new();
        loop {
            names.push(self.expect_identifier("VARIABLE")?);
            if matches!(self.peek_token(), Token::Comma) {
                self.token_pos += 1;
            } else {
                break;
            }
        }

        self.screen.write_str(&prompt);
        let mut collected: Vec<String> = Vec::new();
        loop {
            match self.input.read_line() {
                Some(line) => collected.extend(line.split(',').map(|s| s.trim().to_string())),
                None => break,
            }
            if collected.len() >= names.len() {
                break;
            }
            self.screen.write_str("?? ");
        }

        for (name, raw) in names.iter().zip(collected.into_iter()) {
            let value = if name.ends_with('$') {
                Value::Str(raw)
            } else {
                Value::Number(parse_val(&raw))
            };
            self.variables.insert(name.clone(), value);
        }
        Ok(StmtResult::Continue)
    }

    fn exec_assignment(&mut self, name: String) -> std::result::Result<StmtResult, RunOutcome> {
        if matches!(self.peek_token(), Token::LParen) {
            self.token_pos += 1;
            let indices = self.parse_index_list()?;
            self.expect_token(&Token::Equal, "=")?;
            let value = self.eval_at(self.token_pos)?;
            self.set_array_value(&name, &indices, value)?;
        } else {
            self.expect_token(&Token::Equal, "=")?;
            let value = self.eval_at(self.token_pos)?;
            check_sigil(&name, &value)?;
            self.variables.insert(name, value);
        }
        Ok(StmtResult::Continue)
    }

    fn parse_index_list(&mut self) -> Result<Vec<i64>> {
        let mut indices = Vec::new();
        loop {
            let v = self.eval_at(self.token_pos)?;
            indices.push(v.as_number()? as i64);
            if matches!(self.peek_token(), Token::Comma) {
                self.token_pos += 1;
            } else {
                break;
            }
        }
        self.expect_token(&Token::RParen, ")")?;
        Ok(indices)
    }

    fn exec_if(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let cond = self.eval_at(self.token_pos)?.truthy()?;
        self.expect_token(&Token::Then, "THEN")?;
        if !cond {
            return Ok(StmtResult::Done(false));
        }
        if let Token::Number(n) = self.peek_token() {
            self.token_pos += 1;
            self.set_jump_target(n as i64)?;
            return Ok(StmtResult::Jump);
        }
        Ok(StmtResult::Continue)
    }

    fn exec_for(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let var = self.expect_identifier("VARIABLE")?;
        self.expect_token(&Token::Equal, "=")?;
        let start = self.eval_at(self.token_pos)?.as_number()?;
        self.expect_token(&Token::To, "TO")?;
        let limit = self.eval_at(self.token_pos)?.as_number()?;
        let step = if matches!(self.peek_token(), Token::Step) {
            self.token_pos += 1;
            self.eval_at(self.token_pos)?.as_number()?
        } else {
            1.0
        };
        check_sigil(&var, &Value::Number(start))?;
        self.variables.insert(var.clone(), Value::Number(start));
        self.for_stack.push(ForFrame {
            var,
            limit,
            step,
            reentry_line: self.program_index - 1,
            reentry_pos: self.token_pos,
        });
        Ok(StmtResult::Continue)
    }

    fn exec_next(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let named = if let Token::Identifier(name) = self.peek_token() {
            self.token_pos += 1;
            Some(name)
        } else {
            None
        };
        let frame = match named {
            Some(name) => loop {
                match self.for_stack.pop() {
                    Some(f) if f.var == name => break Some(f),
                    Some(_) => continue,
                    None => break None,
                }
            },
            None => self.for_stack.pop(),
        };
        let frame = frame.ok_or(BasicError::NextWithoutFor)?;

        let current = self.variables.get(&frame.var).and_then(|v| v.as_number().ok()).unwrap_or(0.0);
        let next_val = current + frame.step;
        self.variables.insert(frame.var.clone(), Value::Number(next_val));

        let terminated = if frame.step >= 0.0 {
            next_val > frame.limit
        } else {
            next_val < frame.limit
        };

        if terminated {
            Ok(StmtResult::Continue)
        } else {
            let reentry_line = frame.reentry_line;
            let reentry_pos = frame.reentry_pos;
            self.for_stack.push(frame);
            self.program_index = reentry_line;
            self.resume_token = Some(reentry_pos);
            Ok(StmtResult::Jump)
        }
    }

    fn exec_dim(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        loop {
            let name = self.expect_identifier("ARRAY NAME")?;
            self.expect_token(&Token::LParen, "(")?;
            let mut dims = Vec::new();
            loop {
                let bound = self.eval_at(self.token_pos)?.as_number()? as i64;
                dims.push((bound.max(0) as usize) + 1);
                if matches!(self.peek_token(), Token::Comma) {
                    self.token_pos += 1;
                } else {
                    break;
                }
            }
            self.expect_token(&Token::RParen, ")")?;
            let size: usize = dims.iter().product();
            let fill = Value::default_for_name(&name);
            self.arrays.insert(name, ArrayVar { dims, data: vec![fill; size] });

            if matches!(self.peek_token(), Token::Comma) {
                self.token_pos += 1;
            } else {
                break;
            }
        }
        Ok(StmtResult::Continue)
    }

    fn exec_read(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        loop {
            let name = self.expect_identifier("VARIABLE")?;
            if self.data_pointer >= self.data_pool.len() {
                return Err(BasicError::OutOfData.into());
            }
            let raw = self.data_pool[self.data_pointer].clone();
            self.data_pointer += 1;

            let value = if name.ends_with('$') {
                Value::Str(raw)
            } else {
                let n: f64 = raw.trim().parse().map_err(|_| BasicError::TypeMismatch)?;
                Value::Number(n)
            };
            self.variables.insert(name, value);

            if matches!(self.peek_token(), Token::Comma) {
                self.token_pos += 1;
            } else {
                break;
            }
        }
        Ok(StmtResult::Continue)
    }

    fn exec_def(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        self.expect_token(&Token::Fn, "FN")?;
        let name = self.expect_identifier("FUNCTION NAME")?;
        self.expect_token(&Token::LParen, "(")?;
        let param = self.expect_identifier("PARAMETER")?;
        self.expect_token(&Token::RParen, ")")?;
        self.expect_token(&Token::Equal, "=")?;
        let body_start = self.token_pos;
        while !matches!(self.peek_token(), Token::Colon | Token::EndOfLine) {
            self.token_pos += 1;
        }
        let body = self.tokens[body_start..self.token_pos].to_vec();
        self.user_functions.insert(name, UserFunction { param, body });
        Ok(StmtResult::Continue)
    }

    fn exec_on(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let selector = self.eval_at(self.token_pos)?.as_number()? as i64;
        let is_gosub = match self.next_token() {
            Token::Goto => false,
            Token::Gosub => true,
            _ => return Err(BasicError::Syntax(Some("EXPECTED GOTO OR GOSUB".to_string())).into()),
        };
        let mut targets = Vec::new();
        loop {
            match self.next_token() {
                Token::Number(n) => targets.push(n as i64),
                _ => return Err(BasicError::Syntax(Some("EXPECTED LINE NUMBER".to_string())).into()),
            }
            if matches!(self.peek_token(), Token::Comma) {
                self.token_pos += 1;
            } else {
                break;
            }
        }
        if selector >= 1 && (selector as usize) <= targets.len() {
            let target = targets[(selector - 1) as usize];
            if is_gosub {
                self.gosub_stack.push(self.program_index);
            }
            self.set_jump_target(target)?;
            Ok(StmtResult::Jump)
        } else {
            Ok(StmtResult::Continue)
        }
    }

    fn exec_del(&mut self) -> std::result::Result<StmtResult, RunOutcome> {
        let start = self.eval_at(self.token_pos)?.as_number()? as i64;
        let end = if matches!(self.peek_token(), Token::Comma) {
            self.token_pos += 1;
            self.eval_at(self.token_pos)?.as_number()? as i64
        } else {
            start
        };
        let doomed: Vec<i64> = self.program.range(start..=end).map(|(n, _)| *n).collect();
        for n in doomed {
            self.program.remove(&n);
        }
        Ok(StmtResult::Continue)
    }

    fn ensure_array(&mut self, name: &str, index_count: usize) -> &mut ArrayVar {
        self.arrays.entry(name.to_string()).or_insert_with(|| {
            let dims = vec![11usize; index_count];
            let size: usize = dims.iter().product();
            let fill = Value::default_for_name(name);
            ArrayVar { dims, data: vec![fill; size] }
        })
    }

    fn set_array_value(&mut self, name: &str, indices: &[i64], value: Value) -> Result<()> {
        check_sigil(name, &value)?;
        let arr = self.ensure_array(name, indices.len());
        let flat = flat_index(&arr.dims, indices)?;
        arr.data[flat] = value;
        Ok(())
    }

    fn save_to_file(&self, path: &str) -> Result<()> {
        let mut out = String::new();
        for (n, text) in self.program.iter() {
            out.push_str(&n.to_string());
            out.push(' ');
            out.push_str(text);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    fn load_from_file(&mut self, path: &str) -> Result<()> {
        let contents = std::fs::read_to_string(path).map_err(|_| BasicError::FileNotFound)?;
        self.new_program();
        for line in contents.lines() {
            self.parse_and_store(line);
        }
        Ok(())
    }
}

impl<S: Screen, L: LineReader> EvalHost for Interpreter<S, L> {
    fn get_variable(&mut self, name: &str) -> Value {
        self.variables.get(name).cloned().unwrap_or_else(|| Value::default_for_name(name))
    }

    fn get_array_value(&mut self, name: &str, indices: &[i64]) -> Result<Value> {
        let arr = self.ensure_array(name, indices.len());
        let flat = flat_index(&arr.dims, indices)?;
        Ok(arr.data[flat].clone())
    }

    fn random(&mut self, arg: f64) -> f64 {
        if arg < 0.0 {
            self.rng = StdRng::seed_from_u64(arg.to_bits());
        }
        self.rng.gen::<f64>()
    }

    fn peek(&mut self, addr: i64) -> Result<i64> {
        let idx = addr.rem_euclid(65536) as usize;
        Ok(self.memory[idx] as i64)
    }

    fn cursor_column(&mut self) -> i64 {
        self.screen.cursor_column()
    }

    fn call_user_function(&mut self, name: &str, arg: Value) -> Result<Value> {
        let func = self
            .user_functions
            .get(name)
            .cloned()
            .ok_or_else(|| BasicError::UndefinedFunction(name.to_string()))?;
        let previous = self.variables.get(&func.param).cloned();
        self.variables.insert(func.param.clone(), arg);

        let result = evaluator::evaluate(&func.body, 0, self).map(|(v, _)| v);

        match previous {
            Some(v) => {
                self.variables.insert(func.param, v);
            }
            None => {
                self.variables.remove(&func.param);
            }
        }
        result
    }
}

fn check_sigil(name: &str, value: &Value) -> Result<()> {
    match (name.ends_with('$'), value) {
        (true, Value::Number(_)) => Err(BasicError::TypeMismatch),
        (false, Value::Str(_)) => Err(BasicError::TypeMismatch),
        _ => Ok(()),
    }
}

fn flat_index(dims: &[usize], indices: &[i64]) -> Result<usize> {
    if dims.len() != indices.len() {
        return Err(BasicError::BadSubscript);
    }
    for (&idx, &dim) in indices.iter().zip(dims.iter()) {
        if idx < 0 || idx as usize >= dim {
            return Err(BasicError::BadSubscript);
        }
    }
    let mut flat = 0usize;
    for (axis, &dim) in dims.iter().enumerate() {
        flat = flat * dim + indices[axis] as usize;
    }
    Ok(flat)
}

/// Scans one raw program line for a statement-leading `DATA` keyword
/// (case-insensitive, outside quotes) and pushes its comma-separated,
/// quote-stripped, trimmed items onto `pool`.
fn harvest_data_items(line: &str, pool: &mut Vec<String>) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let mut at_stmt_start = true;
    let mut in_quotes = false;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if in_quotes {
            i += 1;
            continue;
        }
        if c == ':' {
            at_stmt_start = true;
            i += 1;
            continue;
        }
        if c == ' ' {
            i += 1;
            continue;
        }
        if at_stmt_start && keyword_at(&chars, i, "DATA") {
            let mut j = i + 4;
            let items_start = j;
            let mut q = false;
            while j < chars.len() {
                let cj = chars[j];
                if cj == '"' {
                    q = !q;
                } else if !q && cj == ':' {
                    break;
                }
                j += 1;
            }
            let segment: String = chars[items_start..j].iter().collect();
            pool.extend(split_data_items(&segment));
            i = j;
            at_stmt_start = false;
            continue;
        }
        at_stmt_start = false;
        i += 1;
    }
}

fn keyword_at(chars: &[char], pos: usize, keyword: &str) -> bool {
    let kw_len = keyword.len();
    if pos + kw_len > chars.len() {
        return false;
    }
    let candidate: String = chars[pos..pos + kw_len].iter().collect();
    if !candidate.eq_ignore_ascii_case(keyword) {
        return false;
    }
    match chars.get(pos + kw_len) {
        Some(c) => !c.is_ascii_alphanumeric(),
        None => true,
    }
}

fn split_data_items(segment: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in segment.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(current.trim().to_string());
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeScreen {
        column: i64,
        out: String,
    }
    impl FakeScreen {
        fn new() -> Self {
            Self { column: 1, out: String::new() }
        }
    }
    impl Screen for FakeScreen {
        fn clear(&mut self) {
            self.column = 1;
        }
        fn set_column(&mut self, col: i64) {
            self.column = col;
        }
        fn set_row(&mut self, _row: i64) {}
        fn cursor_column(&self) -> i64 {
            self.column
        }
        fn write_str(&mut self, s: &str) {
            self.out.push_str(s);
            for ch in s.chars() {
                if ch == '\n' {
                    self.column = 1;
                } else {
                    self.column += 1;
                }
            }
        }
        fn write_newline(&mut self) {
            self.out.push('\n');
            self.column = 1;
        }
    }

    struct FakeInput {
        lines: Vec<String>,
    }
    impl LineReader for FakeInput {
        fn read_line(&mut self) -> Option<String> {
            if self.lines.is_empty() {
                None
            } else {
                Some(self.lines.remove(0))
            }
        }
    }

    fn new_interp() -> Interpreter<FakeScreen, FakeInput> {
        Interpreter::new(FakeScreen::new(), FakeInput { lines: Vec::new() })
    }

    fn run_and_capture(interp: &mut Interpreter<FakeScreen, FakeInput>) -> String {
        interp.run(None);
        interp.screen.out.clone()
    }

    #[test]
    fn arithmetic_print() {
        let mut interp = new_interp();
        interp.store_line(10, "PRINT 1+2*3");
        assert_eq!(run_and_capture(&mut interp), " 7 \n");
    }

    #[test]
    fn for_next_with_semicolons() {
        let mut interp = new_interp();
        interp.store_line(10, "FOR I=1 TO 3 : PRINT I; : NEXT I");
        assert_eq!(run_and_capture(&mut interp), " 1  2  3 ");
    }

    #[test]
    fn for_next_across_lines() {
        let mut interp = new_interp();
        interp.store_line(10, "FOR I=1 TO 3");
        interp.store_line(20, "PRINT I");
        interp.store_line(30, "NEXT I");
        assert_eq!(run_and_capture(&mut interp), " 1 \n 2 \n 3 \n");
    }

    #[test]
    fn backward_goto_loop_terminates_without_overflowing_the_stack() {
        let mut interp = new_interp();
        interp.store_line(10, "N=0");
        interp.store_line(20, "N=N+1");
        interp.store_line(30, "IF N<50000 THEN 20");
        interp.store_line(40, "PRINT N");
        assert_eq!(run_and_capture(&mut interp), " 50000 \n");
    }

    #[test]
    fn gosub_return_anchor_skips_rest_of_gosub_line() {
        let mut interp = new_interp();
        interp.store_line(10, "X=0");
        interp.store_line(20, "GOSUB 100");
        interp.store_line(30, "PRINT X");
        interp.store_line(40, "END");
        interp.store_line(100, "X=42 : RETURN");
        assert_eq!(run_and_capture(&mut interp), " 42 \n");
    }

    #[test]
    fn data_read_round_trip() {
        let mut interp = new_interp();
        interp.store_line(10, "DATA 1,\"HI\",3");
        interp.store_line(20, "READ A,B$,C");
        interp.store_line(30, "PRINT A;\" \";B$;\" \";C");
        assert_eq!(run_and_capture(&mut interp), " 1  HI  3 \n");
    }

    #[test]
    fn def_fn_call() {
        let mut interp = new_interp();
        interp.store_line(10, "DEF FN SQ(X)=X*X");
        interp.store_line(20, "PRINT FN SQ(7)");
        assert_eq!(run_and_capture(&mut interp), " 49 \n");
    }

    #[test]
    fn if_then_line_number_shorthand() {
        let mut interp = new_interp();
        interp.store_line(10, "A=1 : IF A=1 THEN 30");
        interp.store_line(20, "PRINT \"NO\"");
        interp.store_line(30, "PRINT \"YES\"");
        assert_eq!(run_and_capture(&mut interp), "YES\n");
    }

    #[test]
    fn if_false_skips_rest_of_physical_line() {
        let mut interp = new_interp();
        interp.store_line(10, "IF 0 THEN PRINT \"A\": PRINT \"B\"");
        assert_eq!(run_and_capture(&mut interp), "");
    }

    #[test]
    fn list_is_ascending_and_exact() {
        let mut interp = new_interp();
        interp.store_line(30, "PRINT 3");
        interp.store_line(10, "PRINT 1");
        interp.store_line(20, "PRINT 2");
        assert_eq!(
            interp.list(),
            vec![
                (10, "PRINT 1".to_string()),
                (20, "PRINT 2".to_string()),
                (30, "PRINT 3".to_string()),
            ]
        );
    }

    #[test]
    fn storing_empty_text_deletes_line() {
        let mut interp = new_interp();
        interp.store_line(10, "PRINT 1");
        interp.store_line(10, "");
        assert!(interp.list().is_empty());
    }

    #[test]
    fn array_out_of_bounds_is_bad_subscript() {
        let mut interp = new_interp();
        interp.store_line(10, "DIM A(5)");
        interp.store_line(20, "A(10)=1");
        let out = run_and_capture(&mut interp);
        assert!(out.contains("?BAD SUBSCRIPT ERROR"));
    }

    #[test]
    fn auto_dimension_axis_count_mismatch_is_bad_subscript() {
        let mut interp = new_interp();
        interp.store_line(10, "A(1)=5");
        interp.store_line(20, "PRINT A(1,2)");
        let out = run_and_capture(&mut interp);
        assert!(out.contains("?BAD SUBSCRIPT ERROR"));
    }

    #[test]
    fn return_without_gosub_is_reported_with_line() {
        let mut interp = new_interp();
        interp.store_line(10, "RETURN");
        let out = run_and_capture(&mut interp);
        assert_eq!(out.trim(), "?RETURN WITHOUT GOSUB ERROR IN 10");
    }

    #[test]
    fn stop_reports_break_in_line() {
        let mut interp = new_interp();
        interp.store_line(10, "STOP");
        let out = run_and_capture(&mut interp);
        assert_eq!(out.trim(), "BREAK IN 10");
    }

    #[test]
    fn new_clears_program_and_state() {
        let mut interp = new_interp();
        interp.store_line(10, "X=5");
        interp.run(None);
        interp.new_program();
        assert!(interp.list().is_empty());
        assert_eq!(interp.get_variable("X"), Value::Number(0.0));
    }
}
