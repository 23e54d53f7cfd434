//! Operator input.
//!
//! On a terminal, lines are read in raw mode with `crossterm` so that Ctrl-C
//! arrives as a key press and ends the session cleanly instead of killing the
//! process. Piped input falls back to plain buffered reads; there a Ctrl-C
//! only raises the shell's interrupt flag, which is checked once the pending
//! line arrives.

use std::io::{self, BufRead, IsTerminal, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

/// Result of waiting for one operator line.
#[derive(Debug, PartialEq)]
pub enum Input {
    /// A line without its terminator.
    Line(String),
    /// The operator pressed Ctrl-C.
    Interrupted,
    /// No more input (Ctrl-D on an empty line, or end of piped stdin).
    Closed,
}

/// Source of operator lines for the shell loop.
pub trait LineSource {
    fn read_line(&mut self) -> io::Result<Input>;
}

/// What the terminal should do after a key press.
#[derive(Debug, PartialEq)]
pub enum Edit {
    Insert(char),
    Erase,
    Done(Input),
    Ignore,
}

/// Minimal line editor fed with key events.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn apply(&mut self, key: KeyEvent) -> Edit {
        if key.kind == KeyEventKind::Release {
            return Edit::Ignore;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => {
                self.buffer.clear();
                Edit::Done(Input::Interrupted)
            }
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    Edit::Done(Input::Closed)
                } else {
                    Edit::Ignore
                }
            }
            KeyCode::Char(_) if ctrl => Edit::Ignore,
            KeyCode::Char(c) => {
                self.buffer.push(c);
                Edit::Insert(c)
            }
            KeyCode::Backspace => match self.buffer.pop() {
                Some(_) => Edit::Erase,
                None => Edit::Ignore,
            },
            KeyCode::Enter => Edit::Done(Input::Line(std::mem::take(&mut self.buffer))),
            _ => Edit::Ignore,
        }
    }
}

// Leaves raw mode when dropped, even on an early return.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Reads operator lines from the process's stdin.
#[derive(Debug, Default)]
pub struct Console;

impl Console {
    pub fn new() -> Self {
        Console
    }

    fn read_raw(&mut self) -> io::Result<Input> {
        let mut editor = LineEditor::new();
        let mut stdout = io::stdout();
        let _raw = RawMode::enable()?;

        loop {
            let key = match event::read()? {
                Event::Key(key) => key,
                _ => continue,
            };
            match editor.apply(key) {
                Edit::Insert(c) => write!(stdout, "{}", c)?,
                Edit::Erase => write!(stdout, "\u{8} \u{8}")?,
                Edit::Done(input) => {
                    write!(stdout, "\r\n")?;
                    stdout.flush()?;
                    return Ok(input);
                }
                Edit::Ignore => continue,
            }
            stdout.flush()?;
        }
    }
}

/// Reads one line from buffered input, without its `\n` or `\r\n`.
pub fn read_buffered<R: BufRead>(reader: &mut R) -> io::Result<Input> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(Input::Closed);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Input::Line(line))
}

impl LineSource for Console {
    fn read_line(&mut self) -> io::Result<Input> {
        if io::stdin().is_terminal() {
            self.read_raw()
        } else {
            read_buffered(&mut io::stdin().lock())
        }
    }
}
