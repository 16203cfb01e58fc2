//! Terminal and keyboard capabilities.
//!
//! `spec.md` scopes these out of the core as external collaborators: the
//! interpreter only ever talks to a `Screen` and a `LineReader`, never to
//! stdout/stdin directly. This keeps `HOME`/`HTAB`/`VTAB`/`PRINT` column
//! tracking and `INPUT`/`GET` reading swappable (a test harness can supply
//! an in-memory Screen and a scripted LineReader) without touching the
//! interpreter itself.

use std::io::{self, Write};

/// Terminal output the core statement interpreter depends on. Every
/// operation is best-effort: failures are swallowed silently rather than
/// surfaced as BASIC errors, since a real Apple ][ never checked them
/// either.
pub trait Screen {
    fn clear(&mut self);
    fn set_column(&mut self, col: i64);
    fn set_row(&mut self, row: i64);
    fn cursor_column(&self) -> i64;
    fn write_str(&mut self, s: &str);
    fn write_newline(&mut self);
}

/// Blocking single-line read used by `INPUT` and `GET`.
pub trait LineReader {
    /// `None` signals end of input (e.g. Ctrl-D).
    fn read_line(&mut self) -> Option<String>;
}

/// ANSI-backed `Screen`. Column tracking is purely local state — there is
/// no portable way to query a real terminal's cursor position, so `TAB`
/// and `POS` rely on us keeping count ourselves as text is written.
pub struct TerminalScreen {
    column: i64,
}

impl TerminalScreen {
    pub fn new() -> Self {
        Self { column: 1 }
    }
}

impl Default for TerminalScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen for TerminalScreen {
    fn clear(&mut self) {
        print!("\x1b[2J\x1b[H");
        let _ = io::stdout().flush();
        self.column = 1;
    }

    fn set_column(&mut self, col: i64) {
        let col = col.max(1);
        print!("\x1b[{}G", col);
        let _ = io::stdout().flush();
        self.column = col;
    }

    fn set_row(&mut self, row: i64) {
        let row = row.max(1);
        print!("\x1b[{};{}H", row, self.column);
        let _ = io::stdout().flush();
    }

    fn cursor_column(&self) -> i64 {
        self.column
    }

    fn write_str(&mut self, s: &str) {
        print!("{}", s);
        let _ = io::stdout().flush();
        for ch in s.chars() {
            if ch == '\n' {
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn write_newline(&mut self) {
        println!();
        let _ = io::stdout().flush();
        self.column = 1;
    }
}

/// `rustyline`-backed `LineReader`, shared with the REPL shell's own
/// history so `INPUT` reads participate in the same edit buffer as
/// immediate-mode commands.
pub struct RustylineReader {
    editor: rustyline::DefaultEditor,
}

impl RustylineReader {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: rustyline::DefaultEditor::new()?,
        })
    }
}

impl LineReader for RustylineReader {
    fn read_line(&mut self) -> Option<String> {
        match self.editor.readline("") {
            Ok(line) => Some(line),
            Err(_) => None,
        }
    }
}
