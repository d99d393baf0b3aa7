//! Batch scanner
//!
//! Pulls raw lines from a [`LineSource`], keeps track of whether the text so
//! far ends inside a string or a block comment, and accumulates everything
//! that is not a sqlcmd command into the batch buffer. At most one command
//! is returned per call to [`Batch::next`].

use std::collections::BTreeMap;

use super::commands::{CommandMatcher, MatchedCommand};
use super::console::LineSource;
use super::parse::{find_non_space, grab, is_empty_line, read_variable_reference};
use crate::error::SqlcmdError;

/// Buffer capacity grows in multiples of this many characters
pub const MIN_CAP_INCREASE: usize = 512;

/// Where the scanner is relative to SQL quoting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Normal,
    InString(char),
    InBlockComment,
}

/// Accumulates the text of one batch
#[derive(Debug)]
pub struct Batch {
    /// Unconsumed text of the current input line
    raw: Vec<char>,
    buffer: Vec<char>,
    /// Whether at least one line was appended since the last reset
    has_lines: bool,
    state: ScanState,
    /// Line number within the batch, shown in the prompt
    batch_line: u64,
    /// Lines read since the session started
    line_count: u64,
    /// `$(name)` references found so far, keyed by their offset in `buffer`
    var_map: BTreeMap<usize, String>,
    parse_variables: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            buffer: Vec::new(),
            has_lines: false,
            state: ScanState::Normal,
            batch_line: 1,
            line_count: 0,
            var_map: BTreeMap::new(),
            parse_variables: true,
        }
    }

    /// Turn recognition of `$(name)` references on or off
    pub fn set_parse_variables(&mut self, enabled: bool) {
        self.parse_variables = enabled;
    }

    /// Clear the buffer and the batch line number. `raw`, when given, becomes
    /// the pending input; otherwise the unconsumed remainder is kept.
    pub fn reset(&mut self, raw: Option<Vec<char>>) {
        self.buffer.clear();
        self.has_lines = false;
        self.state = ScanState::Normal;
        self.batch_line = 1;
        self.var_map.clear();
        if let Some(raw) = raw {
            self.raw = raw;
        }
    }

    /// Scan the next unit of input.
    ///
    /// Reads a new line when no raw text is pending. Returns the command found
    /// on the line, if any; text that is not a command is appended to the buffer.
    /// End of input and interrupts from the source are returned as errors.
    pub fn next(
        &mut self,
        source: &mut dyn LineSource,
        commands: &dyn CommandMatcher,
    ) -> Result<Option<MatchedCommand>, SqlcmdError> {
        if self.raw.is_empty() {
            let line = source.read_line()?;
            self.raw = line.chars().collect();
        }
        self.line_count += 1;

        let mut line_vars: Vec<(usize, String)> = Vec::new();
        let mut command = None;
        let mut scanned_command = false;
        let mut failed = false;
        let mut i = 0;
        let len = self.raw.len();

        while i < len {
            let c = self.raw[i];
            let next = grab(&self.raw, i + 1);
            match self.state {
                ScanState::InString(quote) => {
                    match read_string(&self.raw, i, quote, self.parse_variables, &mut line_vars) {
                        Some((end, closed)) => {
                            i = end;
                            if closed {
                                self.state = ScanState::Normal;
                            }
                        }
                        None => {
                            failed = true;
                            break;
                        }
                    }
                }
                ScanState::InBlockComment => {
                    let (end, closed) = read_block_comment(&self.raw, i);
                    i = end;
                    if closed {
                        self.state = ScanState::Normal;
                    }
                }
                ScanState::Normal => {
                    if c == '\'' || c == '"' {
                        self.state = ScanState::InString(c);
                    } else if c == '-' && next == '-' {
                        i = len;
                    } else if c == '/' && next == '*' {
                        self.state = ScanState::InBlockComment;
                        i += 1;
                    } else if c == '$' && next == '(' && self.parse_variables {
                        match read_variable_reference(&self.raw, i + 2) {
                            Some(end) => {
                                let name: String = self.raw[i + 2..end].iter().collect();
                                line_vars.push((i, name));
                                i = end;
                            }
                            None => {
                                failed = true;
                                break;
                            }
                        }
                    } else if !scanned_command {
                        scanned_command = true;
                        let end = command_end(&self.raw, i);
                        let text: String = self.raw[..end].iter().collect();
                        if let Some(cmd) = commands.match_command(&text) {
                            self.raw.drain(i..end);
                            command = Some(cmd);
                            break;
                        }
                    }
                }
            }
            i += 1;
        }

        if failed {
            let line = self.line_count;
            self.reset(None);
            self.raw.clear();
            return Err(SqlcmdError::SyntaxError { line });
        }

        let i = i.min(self.raw.len());
        let empty = is_empty_line(&self.raw[..i]);
        let mut append = self.state != ScanState::Normal || !empty;
        if command.is_some() && empty {
            append = false;
        }

        if append {
            let start = if self.has_lines {
                0
            } else {
                find_non_space(&self.raw[..i])
            };
            let offset = if self.has_lines { self.buffer.len() + 1 } else { 0 };
            for (pos, name) in line_vars {
                self.var_map.insert(pos - start + offset, name);
            }
            let slice: Vec<char> = self.raw[start..i].to_vec();
            self.append(&slice);
            self.batch_line += 1;
        }

        self.raw.drain(..i);
        Ok(command)
    }

    fn append(&mut self, line: &[char]) {
        if !self.has_lines {
            self.buffer.clear();
            self.buffer.extend_from_slice(line);
            self.has_lines = true;
            return;
        }
        let needed = self.buffer.len() + 1 + line.len();
        if needed > self.buffer.capacity() {
            let mut n = needed + 2 * line.len();
            n += MIN_CAP_INCREASE - (n % MIN_CAP_INCREASE);
            self.buffer.reserve_exact(n - self.buffer.len());
        }
        self.buffer.push('\n');
        self.buffer.extend_from_slice(line);
    }

    /// The batch text accumulated so far
    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// The open quote character, `*` inside a block comment, `-` when the
    /// batch has text and `=` when it is empty
    pub fn state(&self) -> char {
        match self.state {
            ScanState::InString(quote) => quote,
            ScanState::InBlockComment => '*',
            ScanState::Normal if !self.buffer.is_empty() => '-',
            ScanState::Normal => '=',
        }
    }

    pub fn scan_state(&self) -> ScanState {
        self.state
    }

    /// Prompt for the next line, such as `1> ` or `3~ ` inside a string or comment
    pub fn prompt(&self) -> String {
        let marker = if self.state == ScanState::Normal { '>' } else { '~' };
        format!("{}{} ", self.batch_line, marker)
    }

    pub fn batch_line(&self) -> u64 {
        self.batch_line
    }

    pub fn set_batch_line(&mut self, line: u64) {
        self.batch_line = line;
    }

    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    /// `$(name)` references by offset in the batch text
    pub fn variable_references(&self) -> &BTreeMap<usize, String> {
        &self.var_map
    }
}

/// End of the command candidate starting at `start`: the first control
/// character other than tab, or the end of the line
fn command_end(r: &[char], start: usize) -> usize {
    let mut end = start;
    while end < r.len() && !(r[end].is_control() && r[end] != '\t') {
        end += 1;
    }
    end
}

/// Scan a quoted string from `start`.
///
/// Returns the index of the closing quote and `true`, or the line length and
/// `false` when the string continues past this line. `None` means a
/// malformed `$(` reference.
fn read_string(
    r: &[char],
    start: usize,
    quote: char,
    parse_variables: bool,
    vars: &mut Vec<(usize, String)>,
) -> Option<(usize, bool)> {
    let end = r.len();
    let mut prev = '\0';
    let mut i = start;
    while i < end {
        let c = r[i];
        let next = grab(r, i + 1);
        if parse_variables && c == '$' && next == '(' {
            let close = read_variable_reference(r, i + 2)?;
            vars.push((i, r[i + 2..close].iter().collect()));
            i = close;
        } else if quote == '\'' && c == '\\' {
            i += 2;
            prev = '\0';
            continue;
        } else if quote == '\'' && c == '\'' && next == '\'' {
            i += 2;
            continue;
        } else if c == quote && (quote == '"' || prev != '\'') {
            return Some((i, true));
        }
        prev = c;
        i += 1;
    }
    Some((end, false))
}

/// Scan a block comment from `start`; returns the index of the closing `/`
/// and `true`, or the line length and `false`
fn read_block_comment(r: &[char], start: usize) -> (usize, bool) {
    let mut i = start + 1;
    while i < r.len() {
        if r[i - 1] == '*' && r[i] == '/' {
            return (i, true);
        }
        i += 1;
    }
    (r.len(), false)
}
