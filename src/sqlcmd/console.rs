//! Input line sources
//!
//! The scanner reads through [`LineSource`]. Interactive sessions use
//! [`ReadlineConsole`]; scripts, piped stdin and tests use [`ReaderSource`].

use std::io::{self, BufRead, BufReader, Cursor};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;

use crate::error::SqlcmdError;

/// Why no line could be read
#[derive(Error, Debug)]
pub enum LineError {
    #[error("end of input")]
    Eof,

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<LineError> for SqlcmdError {
    fn from(err: LineError) -> Self {
        match err {
            LineError::Eof => SqlcmdError::EndOfInput,
            LineError::Interrupted => SqlcmdError::Interrupted,
            LineError::Io(source) => SqlcmdError::InputError { source },
        }
    }
}

/// Supplies raw input lines, without their line terminators
pub trait LineSource {
    fn read_line(&mut self) -> Result<String, LineError>;

    /// Prompt shown before the next interactive read
    fn set_prompt(&mut self, _prompt: &str) {}

    fn is_interactive(&self) -> bool {
        false
    }

    /// Read a secret without echoing it; `None` when no terminal is available
    fn read_password(&mut self, _prompt: &str) -> Option<String> {
        None
    }
}

/// Interactive console with line editing and history
pub struct ReadlineConsole {
    editor: DefaultEditor,
    prompt: String,
}

impl ReadlineConsole {
    pub fn new() -> Result<Self, LineError> {
        let editor = DefaultEditor::new().map_err(readline_error)?;
        Ok(Self {
            editor,
            prompt: String::new(),
        })
    }
}

fn readline_error(err: ReadlineError) -> LineError {
    match err {
        ReadlineError::Interrupted => LineError::Interrupted,
        ReadlineError::Eof => LineError::Eof,
        ReadlineError::Io(e) => LineError::Io(e),
        other => LineError::Io(io::Error::other(other.to_string())),
    }
}

impl LineSource for ReadlineConsole {
    fn read_line(&mut self) -> Result<String, LineError> {
        let line = self.editor.readline(&self.prompt).map_err(readline_error)?;
        if !line.trim().is_empty() {
            let _ = self.editor.add_history_entry(line.as_str());
        }
        Ok(line)
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn read_password(&mut self, prompt: &str) -> Option<String> {
        rpassword::prompt_password(prompt).ok()
    }
}

/// Lines from any buffered reader
pub struct ReaderSource<R> {
    reader: R,
    terminal_password: bool,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            terminal_password: false,
        }
    }
}

impl ReaderSource<Cursor<String>> {
    /// Lines of an in-memory script
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(Cursor::new(text.into()))
    }
}

impl ReaderSource<BufReader<io::Stdin>> {
    /// Piped standard input. Passwords are still read from the terminal.
    pub fn stdin() -> Self {
        Self {
            reader: BufReader::new(io::stdin()),
            terminal_password: true,
        }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn read_line(&mut self) -> Result<String, LineError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(LineError::Eof);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    fn read_password(&mut self, prompt: &str) -> Option<String> {
        if self.terminal_password {
            rpassword::prompt_password(prompt).ok()
        } else {
            None
        }
    }
}
