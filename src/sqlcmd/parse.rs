//! Low level text helpers shared by the scanner and the command actions

use crate::error::SqlcmdError;

/// Character at `i`, or NUL past the end
#[inline]
pub(crate) fn grab(r: &[char], i: usize) -> char {
    r.get(i).copied().unwrap_or('\0')
}

/// Characters allowed in a `$(name)` reference
#[inline]
pub fn is_variable_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Scan a variable name starting at `start`, just after `$(`.
///
/// Returns the index of the closing `)`, or `None` when the name runs into an
/// invalid character or the end of the line.
pub fn read_variable_reference(r: &[char], start: usize) -> Option<usize> {
    let mut i = start;
    while i < r.len() {
        let c = r[i];
        if c == ')' {
            return Some(i);
        }
        if !is_variable_char(c) {
            return None;
        }
        i += 1;
    }
    None
}

/// Index of the first non-whitespace character, or `r.len()`
pub(crate) fn find_non_space(r: &[char]) -> usize {
    r.iter().position(|c| !c.is_whitespace()).unwrap_or(r.len())
}

pub(crate) fn is_empty_line(r: &[char]) -> bool {
    r.iter().all(|c| c.is_whitespace())
}

/// Position of a `--` comment in a command argument.
///
/// `quote` tells whether the argument starts inside a double-quoted string;
/// the returned flag tells whether it ends inside one. `""` inside quotes is
/// an escaped quote. A comment only starts after whitespace or at the start.
pub fn comment_start(arg: &[char], mut quote: bool) -> (Option<usize>, bool) {
    let mut space = true;
    let mut i = 0;
    while i < arg.len() {
        let c = arg[i];
        let next = grab(arg, i + 1);
        if quote && c == '"' && next != '"' {
            quote = false;
        } else if quote && c == '"' && next == '"' {
            i += 1;
        } else if !quote && c == '"' {
            quote = true;
        } else if !quote && c == '-' && next == '-' && space {
            return (Some(i), quote);
        }
        space = c.is_whitespace();
        i += 1;
    }
    (None, quote)
}

/// Drop a trailing `-- comment` from command arguments. Arguments after the
/// one holding the comment are dropped too.
pub fn remove_comments(args: Vec<String>) -> Vec<String> {
    let mut quote = false;
    for (i, arg) in args.iter().enumerate() {
        let chars: Vec<char> = arg.chars().collect();
        let (pos, still_quoted) = comment_start(&chars, quote);
        quote = still_quoted;
        if let Some(pos) = pos {
            let mut out: Vec<String> = args[..i].to_vec();
            out.push(chars[..pos].iter().collect());
            return out;
        }
    }
    args
}

/// Parse the value part of `:SETVAR name value`.
///
/// A value in double quotes may contain whitespace; `""` stands for one quote.
/// Unquoted values must be a single token.
pub fn parse_variable_value(s: &str) -> Result<String, SqlcmdError> {
    let invalid = || SqlcmdError::InvalidVariableValue {
        value: s.to_string(),
    };
    let chars: Vec<char> = s.chars().collect();
    if chars.first() != Some(&'"') {
        if chars.iter().any(|c| c.is_whitespace() || *c == '"') {
            return Err(invalid());
        }
        return Ok(s.to_string());
    }
    if chars.len() < 2 || chars[chars.len() - 1] != '"' {
        return Err(invalid());
    }

    let inner = &chars[1..chars.len() - 1];
    let mut value = String::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == '"' {
            if grab(inner, i + 1) != '"' {
                return Err(invalid());
            }
            i += 1;
        }
        value.push(inner[i]);
        i += 1;
    }
    Ok(value)
}

/// Split `:SETVAR` arguments into the name and the raw value text
pub fn split_setvar_arguments(arg: &str) -> (&str, &str) {
    let arg = arg.trim();
    match arg.find(|c: char| c.is_whitespace()) {
        Some(pos) => (&arg[..pos], arg[pos..].trim()),
        None => (arg, ""),
    }
}
